//! Stream-backed messages produced by the decoders.

use super::{AttachmentSet, Header, HeaderList, Message, PayloadReader};
use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::parser::ParsedEnvelope;
use crate::xml::XmlStreamWriter;
use bytes::Bytes;
use quick_xml::NsReader;
use std::io::Cursor;
use xmltree::Element;

/// Read-once message over the serialized Body content.
///
/// The payload name is known up front from the envelope scan; reading,
/// writing or copying after a read fails with `MessageConsumed`.
#[derive(Debug)]
pub struct StreamMessage {
    version: Option<SoapVersion>,
    headers: HeaderList,
    attachments: AttachmentSet,
    local: Option<String>,
    namespace: Option<String>,
    payload: Option<Bytes>,
    consumed: bool,
}

impl StreamMessage {
    pub fn new(
        version: Option<SoapVersion>,
        headers: HeaderList,
        local: Option<String>,
        namespace: Option<String>,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            version,
            headers,
            attachments: AttachmentSet::new(),
            local,
            namespace,
            payload,
            consumed: false,
        }
    }

    /// Build from a scanned envelope.
    pub fn from_envelope(envelope: ParsedEnvelope) -> Result<Self> {
        let headers = envelope
            .headers
            .into_iter()
            .map(Header::from_xml)
            .collect::<Result<HeaderList>>()?;
        let (local, namespace, payload) = match envelope.payload {
            Some(p) => (Some(p.local), p.namespace, Some(p.xml)),
            None => (None, None, None),
        };
        Ok(Self::new(
            Some(envelope.version),
            headers,
            local,
            namespace,
            payload,
        ))
    }

    pub fn with_attachments(mut self, attachments: AttachmentSet) -> Self {
        self.attachments = attachments;
        self
    }

    fn take(&mut self) -> Result<Option<Bytes>> {
        if self.consumed {
            return Err(SoapError::MessageConsumed);
        }
        self.consumed = true;
        Ok(self.payload.take())
    }
}

impl Message for StreamMessage {
    fn soap_version(&self) -> Option<SoapVersion> {
        self.version
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
        self.local.as_deref()
    }

    fn payload_namespace_uri(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn read_payload_as_source(&mut self) -> Result<Option<Element>> {
        match self.take()? {
            Some(bytes) => Element::parse(bytes.as_ref())
                .map(Some)
                .map_err(SoapError::xml),
            None => Ok(None),
        }
    }

    fn read_payload(&mut self) -> Result<Option<PayloadReader>> {
        Ok(self
            .take()?
            .map(|bytes| NsReader::from_reader(Cursor::new(bytes))))
    }

    fn write_payload_to(&mut self, w: &mut XmlStreamWriter) -> Result<()> {
        if let Some(bytes) = self.take()? {
            w.write_raw(&bytes)?;
        }
        Ok(())
    }

    fn copy(&self) -> Result<Box<dyn Message>> {
        if self.consumed {
            return Err(SoapError::MessageConsumed);
        }
        Ok(Box::new(Self {
            version: self.version,
            headers: self.headers.clone(),
            attachments: self.attachments.clone(),
            local: self.local.clone(),
            namespace: self.namespace.clone(),
            payload: self.payload.clone(),
            consumed: false,
        }))
    }

    fn is_consumed(&self) -> bool {
        self.consumed
    }
}
