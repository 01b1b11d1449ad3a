//! The codec a SOAP binding hands to its transports.

use super::mime::{RootCodec, MULTIPART_RELATED};
use super::mtom::XOP_MIME_TYPE;
use super::{Codec, ContentType, MediaType, MimeCodec, MtomCodec, SoapCodec};
use crate::charset::Charset;
use crate::config::{BindingConfig, SoapVersion};
use crate::error::{Result, SoapError};
use crate::packet::Packet;
use crate::xml::XmlWriterFactory;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Chooses plain SOAP, SOAP with attachments or MTOM per packet on the way
/// out and dispatches on the content type on the way in.
#[derive(Clone)]
pub struct SoapBindingCodec {
    soap: SoapCodec,
    mime: MimeCodec,
    mtom: MtomCodec,
    mtom_enabled: bool,
}

impl SoapBindingCodec {
    pub fn new(
        version: SoapVersion,
        binding: &BindingConfig,
        writers: Arc<XmlWriterFactory>,
    ) -> Result<Self> {
        let pinned = binding
            .serialization_encoding
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(Charset::from_label)
            .transpose()
            .map_err(|e| SoapError::Config(format!("serialization_encoding: {}", e)))?;
        let soap = SoapCodec::new(version, writers)
            .with_serialization_encoding(pinned)
            .with_content_negotiation(binding.content_negotiation);
        let root: Arc<dyn RootCodec> = Arc::new(soap.clone());
        Ok(Self {
            mime: MimeCodec::new(root),
            mtom: MtomCodec::new(soap.clone(), binding.mtom.threshold),
            soap,
            mtom_enabled: binding.mtom.enabled,
        })
    }

    pub fn version(&self) -> SoapVersion {
        self.soap.version()
    }

    pub fn soap_codec(&self) -> &SoapCodec {
        &self.soap
    }

    fn select(&self, packet: &Packet) -> &dyn Codec {
        if packet.mtom_enabled.unwrap_or(self.mtom_enabled) {
            &self.mtom
        } else if packet
            .message()
            .is_some_and(|m| !m.attachments().is_empty())
        {
            &self.mime
        } else {
            &self.soap
        }
    }

    fn unsupported(&self, content_type: &str) -> SoapError {
        SoapError::UnsupportedMedia {
            content_type: content_type.to_string(),
            expected: vec![
                self.soap.version().content_type().to_string(),
                MULTIPART_RELATED.to_string(),
            ],
        }
    }
}

impl Codec for SoapBindingCodec {
    fn mime_type(&self) -> &str {
        self.soap.version().content_type()
    }

    fn static_content_type(&self, packet: &mut Packet) -> Result<ContentType> {
        self.select(packet).static_content_type(packet)
    }

    fn encode(&self, packet: &mut Packet, out: &mut Vec<u8>) -> Result<ContentType> {
        self.select(packet).encode(packet, out)
    }

    fn decode(&self, data: Bytes, content_type: Option<&str>, packet: &mut Packet) -> Result<()> {
        let ct = match content_type {
            Some(ct) => ct,
            None => return self.soap.decode(data, None, packet),
        };
        let media = MediaType::parse(ct).map_err(|_| self.unsupported(ct))?;

        if media.is("multipart", "related") {
            let root_type = media.param("type").map(|t| t.to_ascii_lowercase());
            return match root_type.as_deref() {
                Some(XOP_MIME_TYPE) => {
                    debug!("Decoding MTOM message");
                    self.mtom.decode(data, content_type, packet)?;
                    // Answer MTOM requests with MTOM unless told otherwise.
                    if packet.server_side && packet.mtom_enabled.is_none() {
                        packet.mtom_enabled = Some(true);
                    }
                    Ok(())
                }
                Some(t) if t.starts_with("application/fastinfoset") => Err(self.unsupported(ct)),
                _ => self.mime.decode(data, content_type, packet),
            };
        }
        if media.is("application", "fastinfoset") {
            return Err(self.unsupported(ct));
        }
        self.soap.decode(data, content_type, packet)
    }

    fn copy(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
