//! Codec for the XML/HTTP binding: bare payloads, no envelope.

use super::mime::RootCodec;
use super::{Codec, ContentType, MediaType, MimeCodec};
use crate::charset::Charset;
use crate::error::Result;
use crate::message::xml_http::{identify_content_type, ContentClass, UnknownContent};
use crate::message::{DomMessage, EmptyMessage, Message};
use crate::packet::Packet;
use crate::xml::XmlWriterFactory;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub const XML_CONTENT_TYPE: &str = "text/xml";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Root part of an XML/HTTP message: the payload document itself.
#[derive(Debug, Clone)]
pub struct PlainXmlCodec {
    writers: Arc<XmlWriterFactory>,
}

impl PlainXmlCodec {
    pub fn new(writers: Arc<XmlWriterFactory>) -> Self {
        Self { writers }
    }
}

impl RootCodec for PlainXmlCodec {
    fn root_mime_type(&self) -> &str {
        XML_CONTENT_TYPE
    }

    fn root_content_type(&self, _packet: &Packet) -> ContentType {
        ContentType::new(XML_CONTENT_TYPE)
    }

    fn write_root(&self, packet: &mut Packet) -> Result<Vec<u8>> {
        let message = match packet.message_mut() {
            Some(m) => m,
            None => return Ok(Vec::new()),
        };
        let mut writer = self.writers.create();
        let written = message
            .write_to(&mut writer)
            .and_then(|_| writer.take_bytes());
        self.writers.recycle(writer);
        written
    }

    fn decode_root(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        _packet: &mut Packet,
    ) -> Result<Box<dyn Message>> {
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Box::new(EmptyMessage::new(None)));
        }
        let label = content_type
            .and_then(|ct| MediaType::parse(ct).ok())
            .and_then(|m| m.param("charset").map(String::from));
        let charset = match label {
            Some(l) => Charset::from_label(&l)?,
            None => Charset::sniff(data),
        };
        if charset.is_utf8() {
            return Ok(Box::new(DomMessage::from_xml(None, data)?));
        }
        let text = charset.decode(data)?;
        Ok(Box::new(DomMessage::from_xml(
            None,
            strip_declaration(&text).as_bytes(),
        )?))
    }
}

/// Drop an XML declaration whose encoding no longer matches the text.
fn strip_declaration(text: &str) -> &str {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    match trimmed.strip_prefix("<?xml") {
        Some(rest) => rest.find("?>").map(|end| &rest[end + 2..]).unwrap_or(trimmed),
        None => trimmed,
    }
}

/// Encodes payloads as `text/xml` (multipart when attachments exist) and
/// decodes by content classification. Unrecognized content is kept opaque.
#[derive(Clone)]
pub struct XmlHttpCodec {
    plain: Arc<PlainXmlCodec>,
    mime: MimeCodec,
}

impl XmlHttpCodec {
    pub fn new(writers: Arc<XmlWriterFactory>) -> Self {
        let plain = Arc::new(PlainXmlCodec::new(writers));
        Self {
            mime: MimeCodec::new(plain.clone()),
            plain,
        }
    }
}

impl Codec for XmlHttpCodec {
    fn mime_type(&self) -> &str {
        XML_CONTENT_TYPE
    }

    fn static_content_type(&self, packet: &mut Packet) -> Result<ContentType> {
        if let Some((ct, _)) = packet.message().and_then(|m| m.raw_content()) {
            let ct = ContentType::new(ct);
            packet.content_type = Some(ct.clone());
            return Ok(ct);
        }
        self.mime.static_content_type(packet)
    }

    fn encode(&self, packet: &mut Packet, out: &mut Vec<u8>) -> Result<ContentType> {
        if let Some((ct, data)) = packet.message().and_then(|m| m.raw_content()) {
            out.extend_from_slice(data);
            let ct = ContentType::new(ct);
            packet.content_type = Some(ct.clone());
            return Ok(ct);
        }
        self.mime.encode(packet, out)
    }

    fn decode(&self, data: Bytes, content_type: Option<&str>, packet: &mut Packet) -> Result<()> {
        let ct = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        if data.is_empty() {
            packet.set_message(Some(Box::new(EmptyMessage::new(None))));
            return Ok(());
        }
        let class = MediaType::parse(ct)
            .map(|m| ContentClass::from_flags(identify_content_type(&m)))
            .unwrap_or(ContentClass::Unknown);
        debug!(content_type = %ct, class = %class, "Decoding XML/HTTP message");
        match class {
            ContentClass::PlainXml => {
                let message = self.plain.decode_root(&data, Some(ct), packet)?;
                packet.set_message(Some(message));
                Ok(())
            }
            ContentClass::MultipartXml => self.mime.decode(data, Some(ct), packet),
            _ => {
                packet.set_message(Some(Box::new(UnknownContent::new(ct, data))));
                Ok(())
            }
        }
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

impl std::fmt::Debug for XmlHttpCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlHttpCodec").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Attachment;

    fn codec() -> XmlHttpCodec {
        XmlHttpCodec::new(Arc::new(XmlWriterFactory::default()))
    }

    #[test]
    fn test_payload_only() {
        let codec = codec();
        let msg = DomMessage::from_xml(None, b"<order id=\"7\"/>").unwrap();
        let mut packet = Packet::new(Some(Box::new(msg)));
        let mut out = Vec::new();
        let ct = codec.encode(&mut packet, &mut out).unwrap();
        assert_eq!(ct.content_type, "text/xml");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<order"));
        assert!(!text.contains("Envelope"));
    }

    #[test]
    fn test_decode_classes() {
        let codec = codec();

        let mut p = Packet::new(None);
        codec
            .decode(Bytes::from_static(b"<a><b/></a>"), Some("application/xml"), &mut p)
            .unwrap();
        assert_eq!(p.message().unwrap().payload_local_part(), Some("a"));

        let mut p = Packet::new(None);
        codec
            .decode(Bytes::from_static(&[0x89, b'P', b'N', b'G']), Some("image/png"), &mut p)
            .unwrap();
        let (ct, data) = p.message().unwrap().raw_content().unwrap();
        assert_eq!(ct, "image/png");
        assert_eq!(data.len(), 4);

        let mut p = Packet::new(None);
        codec.decode(Bytes::from_static(b"raw"), None, &mut p).unwrap();
        assert_eq!(
            p.message().unwrap().raw_content().unwrap().0,
            "application/octet-stream"
        );

        let mut p = Packet::new(None);
        codec.decode(Bytes::new(), Some("text/xml"), &mut p).unwrap();
        assert!(!p.message().unwrap().has_payload());
    }

    #[test]
    fn test_raw_content_written_as_is() {
        let codec = codec();
        let mut packet = Packet::new(Some(Box::new(UnknownContent::new(
            "image/png",
            vec![1u8, 2, 3],
        ))));
        let mut out = Vec::new();
        let ct = codec.encode(&mut packet, &mut out).unwrap();
        assert_eq!(ct.content_type, "image/png");
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_multipart_xml() {
        let codec = codec();
        let mut msg = DomMessage::from_xml(None, b"<doc/>").unwrap();
        msg.attachments_mut()
            .add(Attachment::new("p1", "text/plain", "x"));
        let mut packet = Packet::new(Some(Box::new(msg)));
        let mut out = Vec::new();
        let ct = codec.encode(&mut packet, &mut out).unwrap();
        assert!(ct
            .content_type
            .starts_with("multipart/related; type=\"text/xml\"; boundary="));

        let mut decoded = Packet::new(None);
        codec
            .decode(Bytes::from(out), Some(&ct.content_type), &mut decoded)
            .unwrap();
        let msg = decoded.message().unwrap();
        assert_eq!(msg.payload_local_part(), Some("doc"));
        assert_eq!(msg.attachments().len(), 1);
    }

    #[test]
    fn test_latin1_document() {
        let codec = codec();
        let mut p = Packet::new(None);
        let data = Charset::Iso8859_1.encode("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><n>caf\u{e9}</n>");
        codec
            .decode(Bytes::from(data), Some("text/xml; charset=ISO-8859-1"), &mut p)
            .unwrap();
        let payload = p.message_mut().unwrap().read_payload_as_source().unwrap().unwrap();
        assert_eq!(payload.get_text().unwrap(), "caf\u{e9}");
    }
}
