//! Mutable SOAP object model (SOAP with Attachments view).

use super::dom::{element, element_to_bytes, write_element};
use super::{Attachment, AttachmentSet, HeaderList, Message, PayloadReader, ENVELOPE_PREFIX};
use crate::config::SoapVersion;
use crate::error::Result;
use crate::xml::XmlStreamWriter;
use quick_xml::NsReader;
use std::io::Cursor;
use xmltree::{Element, XMLNode};

/// A whole SOAP message held in memory and editable in place.
#[derive(Debug, Clone)]
pub struct SaajMessage {
    version: SoapVersion,
    headers: HeaderList,
    body: Option<Element>,
    attachments: AttachmentSet,
    mime_headers: Vec<(String, String)>,
}

impl SaajMessage {
    pub fn new(
        version: SoapVersion,
        headers: HeaderList,
        body: Option<Element>,
        attachments: AttachmentSet,
    ) -> Self {
        Self {
            version,
            headers,
            body,
            attachments,
            mime_headers: Vec::new(),
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn body(&self) -> Option<&Element> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Element> {
        self.body.as_mut()
    }

    pub fn set_body(&mut self, body: Option<Element>) {
        self.body = body;
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.add(attachment);
    }

    /// MIME headers of the root part.
    pub fn mime_headers(&self) -> &[(String, String)] {
        &self.mime_headers
    }

    pub fn add_mime_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.mime_headers.push((name.into(), value.into()));
    }

    /// The envelope as one DOM tree.
    pub fn to_envelope(&self) -> Result<Element> {
        let ns = self.version.ns_uri();
        let mut envelope = element(ENVELOPE_PREFIX, "Envelope", ns);
        if !self.headers.is_empty() {
            let mut header = element(ENVELOPE_PREFIX, "Header", ns);
            for h in self.headers.iter() {
                header.children.push(XMLNode::Element(h.read_header()?));
            }
            envelope.children.push(XMLNode::Element(header));
        }
        let mut body = element(ENVELOPE_PREFIX, "Body", ns);
        if let Some(payload) = &self.body {
            body.children.push(XMLNode::Element(payload.clone()));
        }
        envelope.children.push(XMLNode::Element(body));
        Ok(envelope)
    }
}

impl Message for SaajMessage {
    fn soap_version(&self) -> Option<SoapVersion> {
        Some(self.version)
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
        self.body.as_ref().map(|e| e.name.as_str())
    }

    fn payload_namespace_uri(&self) -> Option<&str> {
        self.body.as_ref().and_then(|e| e.namespace.as_deref())
    }

    fn read_payload_as_source(&mut self) -> Result<Option<Element>> {
        Ok(self.body.clone())
    }

    fn read_payload(&mut self) -> Result<Option<PayloadReader>> {
        match &self.body {
            Some(e) => Ok(Some(NsReader::from_reader(Cursor::new(element_to_bytes(e)?)))),
            None => Ok(None),
        }
    }

    fn write_payload_to(&mut self, w: &mut XmlStreamWriter) -> Result<()> {
        match &self.body {
            Some(e) => write_element(w, e),
            None => Ok(()),
        }
    }

    fn copy(&self) -> Result<Box<dyn Message>> {
        Ok(Box::new(self.clone()))
    }

    fn read_as_soap_message(&mut self) -> Result<SaajMessage> {
        Ok(self.clone())
    }
}
