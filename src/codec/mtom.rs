//! MTOM/XOP codec.
//!
//! Outbound, binary content written through [`XmlStreamWriter::write_binary`]
//! leaves the envelope as `xop:Include` references to separate MIME parts.
//! Inbound, references are resolved and the referenced bytes inlined as
//! base64 again, so the decoded message reads like a plain one. The parts
//! stay available as attachments.
//!
//! [`XmlStreamWriter::write_binary`]: crate::xml::XmlStreamWriter::write_binary

use super::mime::{generate_boundary, parse_multipart, take_root, write_multipart, MULTIPART_RELATED};
use super::{Codec, ContentType, MediaType, SoapCodec};
use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::message::AttachmentSet;
use crate::packet::{keys, Packet};
use crate::xml::XOP_NS;
use base64::Engine;
use bytes::Bytes;
use quick_xml::events::{BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Writer};
use tracing::debug;

pub const XOP_MIME_TYPE: &str = "application/xop+xml";

#[derive(Debug, Clone)]
pub struct MtomCodec {
    soap: SoapCodec,
    threshold: usize,
}

impl MtomCodec {
    pub fn new(soap: SoapCodec, threshold: usize) -> Self {
        Self { soap, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn root_part_type(&self, packet: &Packet) -> String {
        let charset = self.soap.packet_charset(packet);
        let version = self.soap.version();
        let mut ct = format!(
            "{}; charset={}; type=\"{}\"",
            XOP_MIME_TYPE,
            if charset.is_utf8() { "utf-8" } else { charset.name() },
            version.content_type()
        );
        if let (SoapVersion::Soap12, Some(action)) = (version, packet.soap_action.as_deref()) {
            if !action.is_empty() {
                ct.push_str(&format!("; action=\"{}\"", action));
            }
        }
        ct
    }
}

impl Codec for MtomCodec {
    fn mime_type(&self) -> &str {
        XOP_MIME_TYPE
    }

    fn static_content_type(&self, packet: &mut Packet) -> Result<ContentType> {
        if let Some(ct) = &packet.content_type {
            return Ok(ct.clone());
        }
        let soap_ct = self.soap.content_type_for(packet, self.soap.packet_charset(packet));
        let version = self.soap.version();
        let mut content_type = format!(
            "{}; start=\"<rootpart*{}@soap-runtime>\"; type=\"{}\"; boundary=\"{}\"; start-info=\"{}\"",
            MULTIPART_RELATED,
            uuid::Uuid::new_v4(),
            XOP_MIME_TYPE,
            generate_boundary(),
            version.content_type()
        );
        if let (SoapVersion::Soap12, Some(action)) = (version, packet.soap_action.as_deref()) {
            if !action.is_empty() {
                content_type.push_str(&format!("; action=\"{}\"", action));
            }
        }
        let ct = ContentType::new(content_type)
            .with_soap_action(soap_ct.soap_action)
            .with_accept(soap_ct.accept);
        packet.content_type = Some(ct.clone());
        Ok(ct)
    }

    fn encode(&self, packet: &mut Packet, out: &mut Vec<u8>) -> Result<ContentType> {
        let ct = self.static_content_type(packet)?;
        if !packet.has_message() {
            return Ok(ct);
        }
        let media = ct.media_type()?;
        let boundary = media
            .param("boundary")
            .ok_or_else(|| SoapError::Mime("MTOM content type has no boundary".to_string()))?;
        let root_id = media.param("start").unwrap_or("<rootpart@soap-runtime>");

        let root_type = self.root_part_type(packet);
        let charset = self.soap.packet_charset(packet);
        packet.remove(keys::DECODED_CHARSET)?;
        let (root, xop_parts) = self.soap.write_envelope(packet, charset, Some(self.threshold))?;

        let mut attachments: AttachmentSet = xop_parts.into_iter().collect();
        if let Some(msg) = packet.message() {
            for att in msg.attachments() {
                attachments.add(att.clone());
            }
        }
        write_multipart(
            out,
            boundary,
            &[
                ("Content-Id", root_id),
                ("Content-Type", root_type.as_str()),
                ("Content-Transfer-Encoding", "binary"),
            ],
            &root,
            &attachments,
        );
        debug!(
            boundary = %boundary,
            parts = attachments.len(),
            "Encoded MTOM message"
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
        let attachments = parts
            .into_iter()
            .map(|p| p.into_attachment())
            .collect::<Result<AttachmentSet>>()?;

        // The envelope's own content type is carried in the root part's
        // `type` parameter.
        let root_media = MediaType::parse(root.content_type().unwrap_or(XOP_MIME_TYPE))?;
        if !root_media.is("application", "xop+xml") {
            return Err(SoapError::UnsupportedMedia {
                content_type: root_media.base_type(),
                expected: vec![XOP_MIME_TYPE.to_string()],
            });
        }
        let inner_type = root_media
            .param("type")
            .or_else(|| media.param("start-info"))
            .unwrap_or(self.soap.version().content_type());
        let inner_ct = match root_media.param("charset") {
            Some(charset) => format!("{}; charset={}", inner_type, charset),
            None => inner_type.to_string(),
        };

        let root_body = root.decoded_body()?;
        let charset = self.soap.check_inbound(&root_body, Some(&inner_ct), packet)?;
        let text = charset.decode(&root_body)?;
        let inlined = inline_xop(&text, &attachments)?;
        let message = self.soap.parse_text(&inlined)?.with_attachments(attachments);
        packet.set_message(Some(Box::new(message)));
        Ok(())
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

/// Replace each `xop:Include` with the base64 text of the part it names.
pub fn inline_xop(xml: &str, attachments: &AttachmentSet) -> Result<String> {
    let mut reader = NsReader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut skip_depth = 0usize;

    loop {
        let (ns, event) = reader.read_resolved_event().map_err(SoapError::xml)?;
        let is_include = matches!(ns, ResolveResult::Bound(n) if n.as_ref() == XOP_NS.as_bytes());
        match event {
            Event::Eof => break,
            _ if skip_depth > 0 => match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                _ => {}
            },
            Event::Start(ref e) | Event::Empty(ref e)
                if is_include && e.local_name().as_ref() == b"Include" =>
            {
                let href = e
                    .try_get_attribute("href")
                    .map_err(SoapError::xml)?
                    .ok_or_else(|| SoapError::InvalidEnvelope("xop:Include without href".to_string()))?
                    .unescape_value()
                    .map_err(SoapError::xml)?
                    .into_owned();
                let part = attachments.get(&href).ok_or_else(|| {
                    SoapError::Mime(format!("xop:Include references missing part {}", href))
                })?;
                let text = base64::engine::general_purpose::STANDARD.encode(part.data());
                writer
                    .write_event(Event::Text(BytesText::from_escaped(text)))
                    .map_err(SoapError::xml)?;
                if matches!(event, Event::Start(_)) {
                    skip_depth = 1;
                }
            }
            other => writer.write_event(other).map_err(SoapError::xml)?,
        }
    }
    String::from_utf8(writer.into_inner()).map_err(SoapError::xml)
}
