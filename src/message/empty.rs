//! Message with an empty Body.

use super::{AttachmentSet, HeaderList, Message, PayloadReader};
use crate::config::SoapVersion;
use crate::error::Result;
use crate::xml::XmlStreamWriter;
use xmltree::Element;

/// Envelope with headers (possibly) but no payload.
#[derive(Debug, Clone, Default)]
pub struct EmptyMessage {
    version: Option<SoapVersion>,
    headers: HeaderList,
    attachments: AttachmentSet,
}

impl EmptyMessage {
    pub fn new(version: Option<SoapVersion>) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.headers = headers;
        self
    }
}

impl Message for EmptyMessage {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::to_bytes;

    #[test]
    fn test_empty_body_envelope() {
        let mut msg = EmptyMessage::new(Some(SoapVersion::Soap12));
        assert!(!msg.has_payload());
        let xml = String::from_utf8(to_bytes(&mut msg).unwrap()).unwrap();
        assert!(xml.ends_with("<S:Body/></S:Envelope>"));
    }
}
