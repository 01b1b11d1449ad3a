//! `multipart/related` framing for messages with attachments.

use super::{Codec, ContentType, MediaType};
use crate::error::{Result, SoapError};
use crate::message::{Attachment, Message};
use crate::packet::Packet;
use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub const MULTIPART_RELATED: &str = "multipart/related";

/// Codec for the root part of a multipart message.
pub trait RootCodec: Send + Sync {
    /// MIME type named by the multipart `type` parameter.
    fn root_mime_type(&self) -> &str;

    /// Content type of the root part for `packet`.
    fn root_content_type(&self, packet: &Packet) -> ContentType;

    /// Serialize the root part (the message without its attachments).
    fn write_root(&self, packet: &mut Packet) -> Result<Vec<u8>>;

    /// Decode the root part into a message.
    fn decode_root(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        packet: &mut Packet,
    ) -> Result<Box<dyn Message>>;
}

/// One body part of a multipart document.
#[derive(Debug, Clone)]
pub struct MimePart {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MimePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Content-ID without angle brackets.
    pub fn content_id(&self) -> Option<&str> {
        self.header("Content-ID").map(|id| {
            let id = id.trim();
            id.strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'))
                .unwrap_or(id)
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Body with any transfer encoding removed.
    pub fn decoded_body(&self) -> Result<Bytes> {
        match self
            .header("Content-Transfer-Encoding")
            .map(|e| e.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("binary") | Some("8bit") | Some("7bit") => Ok(self.body.clone()),
            Some("base64") => {
                let compact: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map(Bytes::from)
                    .map_err(|e| SoapError::Mime(format!("invalid base64 part: {}", e)))
            }
            Some(other) => Err(SoapError::Mime(format!(
                "unsupported transfer encoding {}",
                other
            ))),
        }
    }

    /// Convert into an attachment, keeping custom MIME headers.
    pub fn into_attachment(self) -> Result<Attachment> {
        let data = self.decoded_body()?;
        let content_type = self
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let mut attachment = match self.content_id() {
            Some(id) => Attachment::new(id, content_type, data),
            None => Attachment::with_generated_id(content_type, data),
        };
        for (name, value) in &self.headers {
            if !is_framing_header(name) {
                attachment.add_mime_header(name.clone(), value.clone());
            }
        }
        Ok(attachment)
    }
}

fn is_framing_header(name: &str) -> bool {
    ["Content-Type", "Content-Id", "Content-Transfer-Encoding"]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// New boundary string.
pub fn generate_boundary() -> String {
    format!("uuid:{}", uuid::Uuid::new_v4())
}

fn writeln(out: &mut Vec<u8>, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Write a multipart document: the root part with `root_headers`, then one
/// part per attachment, then the closing delimiter.
pub fn write_multipart<'a>(
    out: &mut Vec<u8>,
    boundary: &str,
    root_headers: &[(&str, &str)],
    root: &[u8],
    attachments: impl IntoIterator<Item = &'a Attachment>,
) {
    writeln(out, &format!("--{}", boundary));
    for (name, value) in root_headers {
        writeln(out, &format!("{}: {}", name, value));
    }
    writeln(out, "");
    out.extend_from_slice(root);
    writeln(out, "");

    for att in attachments {
        writeln(out, &format!("--{}", boundary));
        let cid = att.content_id();
        if cid.starts_with('<') {
            writeln(out, &format!("Content-Id: {}", cid));
        } else {
            writeln(out, &format!("Content-Id: <{}>", cid));
        }
        writeln(out, &format!("Content-Type: {}", att.content_type()));
        for (name, value) in att.mime_headers() {
            if !name.eq_ignore_ascii_case("Content-Type") && !name.eq_ignore_ascii_case("Content-Id")
            {
                writeln(out, &format!("{}: {}", name, value));
            }
        }
        writeln(out, "Content-Transfer-Encoding: binary");
        writeln(out, "");
        out.extend_from_slice(att.data());
        writeln(out, "");
    }
    out.extend_from_slice(format!("--{}--", boundary).as_bytes());
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Split a multipart document into its parts.
pub fn parse_multipart(data: &Bytes, boundary: &str) -> Result<Vec<MimePart>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut pos = find(data, &delimiter, 0)
        .ok_or_else(|| SoapError::Mime(format!("boundary {} not found", boundary)))?
        + delimiter.len();

    let mut parts = Vec::new();
    loop {
        if data[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        pos = skip_line(data, pos)?;

        let end = find(data, &delimiter, pos)
            .ok_or_else(|| SoapError::Mime("missing closing boundary".to_string()))?;
        let mut body_end = end;
        if body_end >= pos + 2 && &data[body_end - 2..body_end] == b"\r\n" {
            body_end -= 2;
        } else if body_end > pos && data[body_end - 1] == b'\n' {
            body_end -= 1;
        }
        parts.push(parse_part(data.slice(pos..body_end))?);
        pos = end + delimiter.len();
        if pos >= data.len() {
            return Err(SoapError::Mime("truncated multipart document".to_string()));
        }
    }
}

/// Position after the end of the current line.
fn skip_line(data: &[u8], pos: usize) -> Result<usize> {
    data[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| pos + p + 1)
        .ok_or_else(|| SoapError::Mime("truncated boundary line".to_string()))
}

fn parse_part(raw: Bytes) -> Result<MimePart> {
    let (head_end, body_start) = if raw.starts_with(b"\r\n") {
        (0, 2)
    } else if raw.starts_with(b"\n") {
        (0, 1)
    } else if let Some(p) = find(&raw, b"\r\n\r\n", 0) {
        (p, p + 4)
    } else if let Some(p) = find(&raw, b"\n\n", 0) {
        (p, p + 2)
    } else {
        return Err(SoapError::Mime("part has no header terminator".to_string()));
    };

    let head = std::str::from_utf8(&raw[..head_end])
        .map_err(|_| SoapError::Mime("non-ASCII part headers".to_string()))?;
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(MimePart {
        headers,
        body: raw.slice(body_start..),
    })
}

/// Pick the root part: the one named by `start`, else the first.
pub fn take_root(parts: &mut Vec<MimePart>, start: Option<&str>) -> Result<MimePart> {
    if parts.is_empty() {
        return Err(SoapError::Mime("multipart document has no parts".to_string()));
    }
    let index = start
        .map(|s| {
            let s = s.trim();
            s.strip_prefix('<').and_then(|s| s.strip_suffix('>')).unwrap_or(s)
        })
        .and_then(|id| parts.iter().position(|p| p.content_id() == Some(id)))
        .unwrap_or(0);
    Ok(parts.remove(index))
}

/// SOAP with attachments: the envelope as root part, attachments as the
/// following parts. Messages without attachments go out as the bare root.
#[derive(Clone)]
pub struct MimeCodec {
    root: Arc<dyn RootCodec>,
}

impl MimeCodec {
    pub fn new(root: Arc<dyn RootCodec>) -> Self {
        Self { root }
    }

    fn has_attachments(packet: &Packet) -> bool {
        packet
            .message()
            .is_some_and(|m| !m.attachments().is_empty())
    }
}

impl Codec for MimeCodec {
    fn mime_type(&self) -> &str {
        MULTIPART_RELATED
    }

    fn static_content_type(&self, packet: &mut Packet) -> Result<ContentType> {
        if let Some(ct) = &packet.content_type {
            return Ok(ct.clone());
        }
        let root_ct = self.root.root_content_type(packet);
        let ct = if Self::has_attachments(packet) {
            ContentType::new(format!(
                "{}; type=\"{}\"; boundary=\"{}\"",
                MULTIPART_RELATED,
                self.root.root_mime_type(),
                generate_boundary()
            ))
            .with_soap_action(root_ct.soap_action)
            .with_accept(root_ct.accept)
        } else {
            root_ct
        };
        packet.content_type = Some(ct.clone());
        Ok(ct)
    }

    fn encode(&self, packet: &mut Packet, out: &mut Vec<u8>) -> Result<ContentType> {
        let ct = self.static_content_type(packet)?;
        let boundary = match ct.boundary() {
            Some(b) if Self::has_attachments(packet) => b,
            _ => {
                out.extend_from_slice(&self.root.write_root(packet)?);
                return Ok(ct);
            }
        };

        let root_ct = self.root.root_content_type(packet);
        let root = self.root.write_root(packet)?;
        let attachments = packet
            .message()
            .map(|m| m.attachments().clone())
            .unwrap_or_default();
        write_multipart(
            out,
            &boundary,
            &[("Content-Type", root_ct.content_type.as_str())],
            &root,
            &attachments,
        );
        debug!(
            boundary = %boundary,
            attachments = attachments.len(),
            "Encoded multipart message"
        );
        Ok(ct)
    }

    fn decode(&self, data: Bytes, content_type: Option<&str>, packet: &mut Packet) -> Result<()> {
        let media = content_type
            .map(MediaType::parse)
            .transpose()?
            .filter(|m| m.is("multipart", "related"))
            .ok_or_else(|| SoapError::UnsupportedMedia {
                content_type: content_type.unwrap_or_default().to_string(),
                expected: vec![MULTIPART_RELATED.to_string()],
            })?;
        let boundary = media
            .param("boundary")
            .ok_or_else(|| SoapError::Mime("multipart content type has no boundary".to_string()))?;

        let mut parts = parse_multipart(&data, boundary)?;
        let root = take_root(&mut parts, media.param("start"))?;
        let root_body = root.decoded_body()?;
        let mut message = self.root.decode_root(&root_body, root.content_type(), packet)?;
        for part in parts {
            message.attachments_mut().add(part.into_attachment()?);
        }
        packet.set_message(Some(message));
        Ok(())
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
