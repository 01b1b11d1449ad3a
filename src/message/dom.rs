//! DOM-backed messages and element helpers.

use super::{AttachmentSet, HeaderList, Message, PayloadReader};
use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::xml::XmlStreamWriter;
use bytes::Bytes;
use quick_xml::NsReader;
use std::io::Cursor;
use xmltree::{Element, XMLNode};

/// Message whose payload is an `xmltree` element. Readable any number of
/// times.
#[derive(Debug, Clone)]
pub struct DomMessage {
    version: Option<SoapVersion>,
    headers: HeaderList,
    attachments: AttachmentSet,
    payload: Option<Element>,
}

impl DomMessage {
    pub fn new(version: Option<SoapVersion>, payload: Option<Element>) -> Self {
        Self {
            version,
            headers: HeaderList::new(),
            attachments: AttachmentSet::new(),
            payload,
        }
    }

    /// Parse a payload fragment.
    pub fn from_xml(version: Option<SoapVersion>, xml: &[u8]) -> Result<Self> {
        let payload = Element::parse(xml).map_err(SoapError::xml)?;
        Ok(Self::new(version, Some(payload)))
    }

    pub fn with_headers(mut self, headers: HeaderList) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_attachments(mut self, attachments: AttachmentSet) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn payload(&self) -> Option<&Element> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut Element> {
        self.payload.as_mut()
    }
}

impl Message for DomMessage {
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
        self.payload.as_ref().map(|e| e.name.as_str())
    }

    fn payload_namespace_uri(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|e| e.namespace.as_deref())
    }

    fn read_payload_as_source(&mut self) -> Result<Option<Element>> {
        Ok(self.payload.clone())
    }

    fn read_payload(&mut self) -> Result<Option<PayloadReader>> {
        match &self.payload {
            Some(e) => {
                let bytes = element_to_bytes(e)?;
                Ok(Some(NsReader::from_reader(Cursor::new(bytes))))
            }
            None => Ok(None),
        }
    }

    fn write_payload_to(&mut self, w: &mut XmlStreamWriter) -> Result<()> {
        match &self.payload {
            Some(e) => write_element(w, e),
            None => Ok(()),
        }
    }

    fn copy(&self) -> Result<Box<dyn Message>> {
        Ok(Box::new(self.clone()))
    }
}

/// New namespace-qualified element.
pub fn element(prefix: &str, local: &str, namespace: &str) -> Element {
    let mut e = Element::new(local);
    if !prefix.is_empty() {
        e.prefix = Some(prefix.to_string());
    }
    if !namespace.is_empty() {
        e.namespace = Some(namespace.to_string());
    }
    e
}

/// New element holding a single text node.
pub fn text_element(prefix: &str, local: &str, namespace: &str, text: &str) -> Element {
    let mut e = element(prefix, local, namespace);
    e.children.push(XMLNode::Text(text.to_string()));
    e
}

/// Stream an element tree through `w`, declaring namespaces as needed.
pub fn write_element(w: &mut XmlStreamWriter, e: &Element) -> Result<()> {
    let prefix = e.prefix.as_deref().unwrap_or("");
    w.start_element(prefix, &e.name, e.namespace.as_deref().unwrap_or(""))?;
    if let Some(namespaces) = &e.namespaces {
        for (p, uri) in &namespaces.0 {
            if p == "xml" || p == "xmlns" || p == prefix {
                continue;
            }
            if w.lookup_prefix(p).unwrap_or("") != uri {
                w.namespace(p, uri)?;
            }
        }
    }
    for (name, value) in e.attributes.iter() {
        w.attribute(name, value)?;
    }
    for child in &e.children {
        match child {
            XMLNode::Element(c) => write_element(w, c)?,
            XMLNode::Text(t) | XMLNode::CData(t) => w.characters(t)?,
            _ => {}
        }
    }
    w.end_element()
}

/// Serialize an element tree on its own.
pub fn element_to_bytes(e: &Element) -> Result<Bytes> {
    let mut w = XmlStreamWriter::new();
    write_element(&mut w, e)?;
    Ok(Bytes::from(w.take_bytes()?))
}
