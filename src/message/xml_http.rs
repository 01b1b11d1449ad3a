//! Content classification for the XML/HTTP binding and opaque content.

use super::{AttachmentSet, HeaderList, Message, PayloadReader};
use crate::codec::MediaType;
use crate::config::SoapVersion;
use crate::error::Result;
use crate::xml::XmlStreamWriter;
use bytes::Bytes;
use std::fmt;
use xmltree::Element;

pub const PLAIN_XML_FLAG: u8 = 1;
pub const MIME_MULTIPART_FLAG: u8 = 2;
pub const FI_ENCODED_FLAG: u8 = 16;

/// Classification of a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    PlainXml,
    MultipartXml,
    FastInfoset,
    MultipartFastInfoset,
    Unknown,
}

impl ContentClass {
    pub fn from_flags(flags: u8) -> Self {
        let multipart = flags & MIME_MULTIPART_FLAG != 0;
        match (multipart, flags & PLAIN_XML_FLAG != 0, flags & FI_ENCODED_FLAG != 0) {
            (false, true, _) => Self::PlainXml,
            (true, true, _) => Self::MultipartXml,
            (false, _, true) => Self::FastInfoset,
            (true, _, true) => Self::MultipartFastInfoset,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainXml => "plain-xml",
            Self::MultipartXml => "multipart-xml",
            Self::FastInfoset => "fast-infoset",
            Self::MultipartFastInfoset => "multipart-fast-infoset",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a parsed content type into the flag bits above.
pub fn identify_content_type(ct: &MediaType) -> u8 {
    if ct.is("multipart", "related") {
        return match ct.param("type") {
            Some(t) if is_xml_type_str(t) => MIME_MULTIPART_FLAG | PLAIN_XML_FLAG,
            Some(t) if is_fast_infoset_type_str(t) => MIME_MULTIPART_FLAG | FI_ENCODED_FLAG,
            _ => 0,
        };
    }
    if is_xml_type(&ct.primary, &ct.sub) {
        PLAIN_XML_FLAG
    } else if is_fast_infoset_type(&ct.primary, &ct.sub) {
        FI_ENCODED_FLAG
    } else {
        0
    }
}

/// Classify a content-type header value.
pub fn identify(content_type: &str) -> Result<ContentClass> {
    let ct = MediaType::parse(content_type)?;
    Ok(ContentClass::from_flags(identify_content_type(&ct)))
}

/// True when the content type (possibly multipart) carries Fast Infoset.
pub fn is_fast_infoset(content_type: &str) -> bool {
    MediaType::parse(content_type)
        .map(|ct| identify_content_type(&ct) & FI_ENCODED_FLAG != 0)
        .unwrap_or(false)
}

fn is_xml_type(primary: &str, sub: &str) -> bool {
    (primary == "text" && sub == "xml")
        || (primary == "application" && sub == "xml")
        || (primary == "application" && sub.ends_with("+xml"))
}

fn is_xml_type_str(t: &str) -> bool {
    let t = t.to_ascii_lowercase();
    t.starts_with("text/xml")
        || t.starts_with("application/xml")
        || (t.starts_with("application/") && t.contains("+xml"))
}

fn is_fast_infoset_type(primary: &str, sub: &str) -> bool {
    primary == "application" && sub == "fastinfoset"
}

fn is_fast_infoset_type_str(t: &str) -> bool {
    t.to_ascii_lowercase().starts_with("application/fastinfoset")
}

/// Content the XML binding does not understand, kept as opaque bytes.
#[derive(Debug, Clone)]
pub struct UnknownContent {
    content_type: String,
    data: Bytes,
    headers: HeaderList,
    attachments: AttachmentSet,
}

impl UnknownContent {
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
            headers: HeaderList::new(),
            attachments: AttachmentSet::new(),
        }
    }
}

impl Message for UnknownContent {
    fn soap_version(&self) -> Option<SoapVersion> {
        None
    }

    fn headers(&self) -> &HeaderList {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    fn attachments_mut(&mut self) -> &mut AttachmentSet {
        &mut self.attachments
    }

    fn payload_local_part(&self) -> Option<&str> {
        None
    }

    fn payload_namespace_uri(&self) -> Option<&str> {
        None
    }

    fn read_payload_as_source(&mut self) -> Result<Option<Element>> {
        Ok(None)
    }

    fn read_payload(&mut self) -> Result<Option<PayloadReader>> {
        Ok(None)
    }

    fn write_payload_to(&mut self, _w: &mut XmlStreamWriter) -> Result<()> {
        Ok(())
    }

    fn copy(&self) -> Result<Box<dyn Message>> {
        Ok(Box::new(self.clone()))
    }

    fn raw_content(&self) -> Option<(&str, &Bytes)> {
        Some((&self.content_type, &self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(identify("text/xml").unwrap(), ContentClass::PlainXml);
        assert_eq!(
            identify("text/xml; charset=utf-8").unwrap(),
            ContentClass::PlainXml
        );
        assert_eq!(
            identify("multipart/related; type=\"application/xop+xml\"").unwrap(),
            ContentClass::MultipartXml
        );
        assert_eq!(
            identify("application/fastinfoset").unwrap(),
            ContentClass::FastInfoset
        );
        assert_eq!(
            identify("multipart/related; type=\"application/fastinfoset\"").unwrap(),
            ContentClass::MultipartFastInfoset
        );
        assert_eq!(identify("image/png").unwrap(), ContentClass::Unknown);
    }

    #[test]
    fn test_xml_suffix_and_case() {
        assert_eq!(
            identify("Application/SOAP+XML").unwrap(),
            ContentClass::PlainXml
        );
        assert_eq!(identify("application/xml").unwrap(), ContentClass::PlainXml);
        assert_eq!(identify("multipart/related").unwrap(), ContentClass::Unknown);
    }

    #[test]
    fn test_unknown_content_is_opaque() {
        let msg = UnknownContent::new("image/png", vec![0x89u8, b'P']);
        assert!(!msg.has_payload());
        let (ct, data) = msg.raw_content().unwrap();
        assert_eq!(ct, "image/png");
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_is_fast_infoset() {
        assert!(is_fast_infoset("application/fastinfoset"));
        assert!(!is_fast_infoset("text/xml"));
    }
}
