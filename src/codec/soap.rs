//! Plain SOAP envelope codec.

use super::mime::RootCodec;
use super::{Codec, ContentType, MediaType};
use crate::charset::Charset;
use crate::config::{ContentNegotiation, SoapVersion};
use crate::error::{Result, SoapError};
use crate::message::{Attachment, Message, StreamMessage};
use crate::packet::{keys, Packet};
use crate::parser::parse_envelope;
use crate::xml::XmlWriterFactory;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

const FAST_INFOSET_ACCEPT: &str = "application/fastinfoset, ";

/// Encodes a packet's message as a SOAP envelope and decodes envelopes into
/// stream messages.
#[derive(Debug, Clone)]
pub struct SoapCodec {
    version: SoapVersion,
    writers: Arc<XmlWriterFactory>,
    serialization_encoding: Option<Charset>,
    content_negotiation: ContentNegotiation,
}

impl SoapCodec {
    pub fn new(version: SoapVersion, writers: Arc<XmlWriterFactory>) -> Self {
        Self {
            version,
            writers,
            serialization_encoding: None,
            content_negotiation: ContentNegotiation::None,
        }
    }

    /// Pin the outbound charset.
    pub fn with_serialization_encoding(mut self, charset: Option<Charset>) -> Self {
        self.serialization_encoding = charset;
        self
    }

    pub fn with_content_negotiation(mut self, mode: ContentNegotiation) -> Self {
        self.content_negotiation = mode;
        self
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn writers(&self) -> &Arc<XmlWriterFactory> {
        &self.writers
    }

    /// Content types `decode` accepts.
    pub fn expected_content_types(&self) -> Vec<String> {
        vec![self.version.content_type().to_string()]
    }

    /// `Accept` header sent with requests.
    pub fn accept(&self) -> String {
        let base = match self.version {
            SoapVersion::Soap11 => "text/xml, multipart/related",
            SoapVersion::Soap12 => "application/soap+xml, multipart/related",
        };
        match self.content_negotiation {
            ContentNegotiation::None => base.to_string(),
            _ => format!("{}{}", FAST_INFOSET_ACCEPT, base),
        }
    }

    /// Charset an outbound packet is written in: the pinned one, else the
    /// request's charset for server responses, else UTF-8.
    pub fn packet_charset(&self, packet: &Packet) -> Charset {
        if let Some(pinned) = self.serialization_encoding {
            return pinned;
        }
        if packet.server_side {
            if let Some(label) = packet.property_str(keys::DECODED_CHARSET) {
                return Charset::from_label(&label).unwrap_or(Charset::Utf8);
            }
        }
        Charset::Utf8
    }

    /// Content type for `packet` written in `charset`.
    pub fn content_type_for(&self, packet: &Packet, charset: Charset) -> ContentType {
        let mime = self.version.content_type();
        let base = if charset.is_utf8() {
            format!("{}; charset=utf-8", mime)
        } else {
            format!("{}; charset={}", mime, charset.name())
        };
        let action = packet.soap_action.as_deref().unwrap_or("");
        let (content_type, soap_action) = match self.version {
            SoapVersion::Soap11 => (base, Some(format!("\"{}\"", action))),
            SoapVersion::Soap12 if action.is_empty() => (base, None),
            SoapVersion::Soap12 => (format!("{}; action=\"{}\"", base, action), None),
        };
        ContentType::new(content_type)
            .with_soap_action(soap_action)
            .with_accept(Some(self.accept()))
    }

    /// Write the packet's envelope in `charset`. With `mtom_threshold` set,
    /// binary content at or above it is written as XOP references and the
    /// extracted parts are returned.
    pub fn write_envelope(
        &self,
        packet: &mut Packet,
        charset: Charset,
        mtom_threshold: Option<usize>,
    ) -> Result<(Vec<u8>, Vec<Attachment>)> {
        let message = match packet.message_mut() {
            Some(m) => m,
            None => return Ok((Vec::new(), Vec::new())),
        };
        let mut writer = self.writers.create();
        if let Some(threshold) = mtom_threshold {
            writer.enable_mtom(threshold);
        }
        let written = writer
            .start_document(charset.name())
            .and_then(|_| message.write_to(&mut writer))
            .and_then(|_| writer.end_document())
            .and_then(|_| writer.take_bytes());
        let parts = writer.take_mtom_attachments();
        self.writers.recycle(writer);
        let bytes = written?;

        if charset.is_utf8() {
            return Ok((bytes, parts));
        }
        let text = String::from_utf8(bytes).map_err(SoapError::xml)?;
        Ok((charset.encode(&text), parts))
    }

    /// Check the content type and charset of an inbound envelope, then
    /// parse it. Records the charset on the packet.
    pub fn decode_envelope(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        packet: &mut Packet,
    ) -> Result<StreamMessage> {
        let charset = self.check_inbound(data, content_type, packet)?;
        let text = charset.decode(data)?;
        self.parse_text(&text)
    }

    /// Reject content types and charsets this codec cannot read. Returns
    /// the charset to decode with and records its label on the packet.
    pub fn check_inbound(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        packet: &mut Packet,
    ) -> Result<Charset> {
        let media = match content_type {
            Some(ct) => {
                let media = MediaType::parse(ct).map_err(|_| self.unsupported(ct))?;
                if !self.is_supported(&media) {
                    return Err(self.unsupported(ct));
                }
                Some(media)
            }
            None => None,
        };

        match media.as_ref().and_then(|m| m.param("charset")) {
            Some(label) => {
                let charset = Charset::from_label(label)?;
                packet.put(keys::DECODED_CHARSET, label.to_string())?;
                Ok(charset)
            }
            None => {
                packet.remove(keys::DECODED_CHARSET)?;
                Ok(Charset::sniff(data))
            }
        }
    }

    /// Parse a decoded envelope.
    pub fn parse_text(&self, text: &str) -> Result<StreamMessage> {
        let envelope = parse_envelope(text, self.version)?;
        debug!(
            version = self.version.as_str(),
            headers = envelope.headers.len(),
            has_payload = envelope.payload.is_some(),
            "Decoded SOAP envelope"
        );
        StreamMessage::from_envelope(envelope)
    }

    fn is_supported(&self, media: &MediaType) -> bool {
        let base = media.base_type();
        self.expected_content_types().iter().any(|e| *e == base)
    }

    fn unsupported(&self, content_type: &str) -> SoapError {
        SoapError::UnsupportedMedia {
            content_type: content_type.to_string(),
            expected: self.expected_content_types(),
        }
    }
}

impl Codec for SoapCodec {
    fn mime_type(&self) -> &str {
        self.version.content_type()
    }

    fn static_content_type(&self, packet: &mut Packet) -> Result<ContentType> {
        if let Some(ct) = &packet.content_type {
            return Ok(ct.clone());
        }
        let ct = self.content_type_for(packet, self.packet_charset(packet));
        packet.content_type = Some(ct.clone());
        Ok(ct)
    }

    fn encode(&self, packet: &mut Packet, out: &mut Vec<u8>) -> Result<ContentType> {
        let charset = self.packet_charset(packet);
        let ct = match &packet.content_type {
            Some(ct) => ct.clone(),
            None => self.content_type_for(packet, charset),
        };
        if packet.has_message() {
            out.extend_from_slice(&self.write_root(packet)?);
        }
        packet.content_type = Some(ct.clone());
        Ok(ct)
    }

    fn decode(&self, data: Bytes, content_type: Option<&str>, packet: &mut Packet) -> Result<()> {
        let message = self.decode_envelope(&data, content_type, packet)?;
        packet.set_message(Some(Box::new(message)));
        Ok(())
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

impl RootCodec for SoapCodec {
    fn root_mime_type(&self) -> &str {
        self.version.content_type()
    }

    fn root_content_type(&self, packet: &Packet) -> ContentType {
        self.content_type_for(packet, self.packet_charset(packet))
    }

    fn write_root(&self, packet: &mut Packet) -> Result<Vec<u8>> {
        let charset = self.packet_charset(packet);
        packet.remove(keys::DECODED_CHARSET)?;
        Ok(self.write_envelope(packet, charset, None)?.0)
    }

    fn decode_root(
        &self,
        data: &[u8],
        content_type: Option<&str>,
        packet: &mut Packet,
    ) -> Result<Box<dyn Message>> {
        Ok(Box::new(self.decode_envelope(data, content_type, packet)?))
    }
}
