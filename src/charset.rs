//! Character sets accepted on the wire.
//!
//! Documents are always handled as UTF-8 internally; a charset only matters
//! at the codec boundary where bytes are decoded into text and encoded back.

use crate::error::{Result, SoapError};
use std::fmt;

/// Supported charsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Utf8,
    /// UTF-16 with byte order mark; big endian when absent
    Utf16,
    Utf16Le,
    Utf16Be,
    Iso8859_1,
    UsAscii,
}

impl Charset {
    /// Resolve a charset label (case-insensitive, quotes allowed).
    pub fn from_label(label: &str) -> Result<Self> {
        let normalized = label.trim().trim_matches('"').to_ascii_lowercase();
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16" | "utf16" => Ok(Self::Utf16),
            "utf-16le" => Ok(Self::Utf16Le),
            "utf-16be" => Ok(Self::Utf16Be),
            "iso-8859-1" | "iso8859-1" | "latin1" | "l1" => Ok(Self::Iso8859_1),
            "us-ascii" | "ascii" => Ok(Self::UsAscii),
            _ => Err(SoapError::UnsupportedCharset(label.to_string())),
        }
    }

    /// Canonical name used in content types and XML declarations.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::Iso8859_1 => "ISO-8859-1",
            Self::UsAscii => "US-ASCII",
        }
    }

    pub fn is_utf8(&self) -> bool {
        *self == Self::Utf8
    }

    /// Guess the charset of a document that carries no label.
    pub fn sniff(data: &[u8]) -> Self {
        match data {
            [0xFE, 0xFF, ..] => Self::Utf16,
            [0xFF, 0xFE, ..] => Self::Utf16,
            [0x00, b'<', ..] => Self::Utf16Be,
            [b'<', 0x00, ..] => Self::Utf16Le,
            _ => Self::Utf8,
        }
    }

    /// Decode bytes into text.
    pub fn decode(&self, data: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => {
                let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
                String::from_utf8(data.to_vec())
                    .map_err(|e| SoapError::XmlParse(format!("invalid UTF-8: {}", e)))
            }
            Self::Utf16 => match data {
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                _ => decode_utf16(data, u16::from_be_bytes),
            },
            Self::Utf16Le => decode_utf16(data, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(data, u16::from_be_bytes),
            Self::Iso8859_1 => Ok(data.iter().map(|&b| b as char).collect()),
            Self::UsAscii => {
                if let Some(pos) = data.iter().position(|b| !b.is_ascii()) {
                    return Err(SoapError::XmlParse(format!(
                        "non-ASCII byte at offset {} in US-ASCII document",
                        pos
                    )));
                }
                Ok(data.iter().map(|&b| b as char).collect())
            }
        }
    }

    /// Encode text. Characters the charset cannot represent are written as
    /// numeric character references, which is valid in XML content.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf16 => {
                let mut out = vec![0xFE, 0xFF];
                out.extend(text.encode_utf16().flat_map(|u| u.to_be_bytes()));
                out
            }
            Self::Utf16Be => text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect(),
            Self::Utf16Le => text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
            Self::Iso8859_1 => encode_single_byte(text, 0xFF),
            Self::UsAscii => encode_single_byte(text, 0x7F),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn decode_utf16(data: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String> {
    if data.len() % 2 != 0 {
        return Err(SoapError::XmlParse("truncated UTF-16 document".to_string()));
    }
    let units: Vec<u16> = data.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&units).map_err(|e| SoapError::XmlParse(format!("invalid UTF-16: {}", e)))
}

fn encode_single_byte(text: &str, max: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        if code <= max {
            out.push(code as u8);
        } else {
            out.extend_from_slice(format!("&#{};", code).as_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label() {
        assert_eq!(Charset::from_label("utf-8").unwrap(), Charset::Utf8);
        assert_eq!(Charset::from_label("\"UTF-16\"").unwrap(), Charset::Utf16);
        assert_eq!(Charset::from_label("ISO-8859-1").unwrap(), Charset::Iso8859_1);
        let err = Charset::from_label("koi8-r").unwrap_err();
        assert!(matches!(err, SoapError::UnsupportedCharset(_)));
    }

    #[test]
    fn test_utf16_with_bom() {
        let bytes = Charset::Utf16.encode("<a>é</a>");
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(Charset::sniff(&bytes), Charset::Utf16);
        assert_eq!(Charset::Utf16.decode(&bytes).unwrap(), "<a>é</a>");
    }

    #[test]
    fn test_utf16le_without_bom() {
        let bytes = Charset::Utf16Le.encode("<x/>");
        assert_eq!(Charset::sniff(&bytes), Charset::Utf16Le);
        assert_eq!(Charset::Utf16Le.decode(&bytes).unwrap(), "<x/>");
    }

    #[test]
    fn test_latin1_escapes_unmappable() {
        let bytes = Charset::Iso8859_1.encode("é€");
        assert_eq!(bytes[0], 0xE9);
        assert_eq!(&bytes[1..], b"&#8364;");
        assert_eq!(Charset::Iso8859_1.decode(&[0xE9]).unwrap(), "é");
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        assert!(Charset::UsAscii.decode(&[b'a', 0xC3]).is_err());
    }

    #[test]
    fn test_utf8_bom_stripped() {
        assert_eq!(Charset::Utf8.decode(&[0xEF, 0xBB, 0xBF, b'x']).unwrap(), "x");
    }
}
