//! Message model.
//!
//! A [`Message`] is a SOAP envelope (or, for the XML/HTTP binding, a bare XML
//! payload) with headers and attachments. Variants differ in how they hold
//! the payload; they only implement the payload primitives and share the
//! envelope serialization in [`write_envelope`].

pub mod attachment;
pub mod bound;
pub mod dom;
pub mod empty;
pub mod fault;
pub mod header;
pub mod saaj;
pub mod stream;
pub mod xml_http;

use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::xml::XmlStreamWriter;
use bytes::Bytes;
use quick_xml::NsReader;
use saaj::SaajMessage;
use std::fmt;
use std::io::Cursor;
use xmltree::Element;

pub use attachment::{Attachment, AttachmentSet};
pub use dom::DomMessage;
pub use empty::EmptyMessage;
pub use fault::{FaultMessage, SoapFault};
pub use header::{Header, HeaderList};
pub use stream::StreamMessage;

/// Pull-parser view over a payload.
pub type PayloadReader = NsReader<Cursor<Bytes>>;

/// A SOAP or XML message.
///
/// Most variants are read-once: after one of the `read_*` accessors or
/// `write_*` has consumed the payload, only `copy()` taken beforehand can be
/// read again.
pub trait Message: Send + fmt::Debug {
    /// `None` for plain XML messages.
    fn soap_version(&self) -> Option<SoapVersion>;

    fn headers(&self) -> &HeaderList;

    fn headers_mut(&mut self) -> &mut HeaderList;

    fn has_headers(&self) -> bool {
        !self.headers().is_empty()
    }

    fn attachments(&self) -> &AttachmentSet;

    fn attachments_mut(&mut self) -> &mut AttachmentSet;

    /// Local name of the first payload element, known without reading it.
    fn payload_local_part(&self) -> Option<&str>;

    fn payload_namespace_uri(&self) -> Option<&str>;

    fn has_payload(&self) -> bool {
        self.payload_local_part().is_some()
    }

    /// True when the payload is a SOAP Fault.
    fn is_fault(&self) -> bool {
        match self.soap_version() {
            Some(version) => {
                self.payload_local_part() == Some("Fault")
                    && self.payload_namespace_uri() == Some(version.ns_uri())
            }
            None => false,
        }
    }

    /// DOM view of the payload.
    fn read_payload_as_source(&mut self) -> Result<Option<Element>>;

    /// Pull-parser view of the payload.
    fn read_payload(&mut self) -> Result<Option<PayloadReader>>;

    /// Serialize the payload (the Body content) only.
    fn write_payload_to(&mut self, w: &mut XmlStreamWriter) -> Result<()>;

    /// Serialize the whole envelope.
    fn write_to(&mut self, w: &mut XmlStreamWriter) -> Result<()> {
        write_envelope(self, w)
    }

    /// An equivalent message that can be read independently of this one.
    fn copy(&self) -> Result<Box<dyn Message>>;

    fn is_consumed(&self) -> bool {
        false
    }

    /// Materialize as a mutable SOAP object model.
    fn read_as_soap_message(&mut self) -> Result<SaajMessage> {
        let version = self.soap_version().ok_or_else(|| {
            SoapError::InvalidEnvelope("plain XML message has no SOAP envelope".to_string())
        })?;
        let body = self.read_payload_as_source()?;
        Ok(SaajMessage::new(
            version,
            self.headers().clone(),
            body,
            self.attachments().clone(),
        ))
    }

    /// Undecoded content and its content type, for messages that carry
    /// opaque bytes.
    fn raw_content(&self) -> Option<(&str, &Bytes)> {
        None
    }
}

/// Envelope prefix used on output.
pub const ENVELOPE_PREFIX: &str = "S";

/// Write `Envelope`, an optional `Header` and `Body` around the message's
/// payload. Plain XML messages are written as their payload alone.
pub fn write_envelope<M: Message + ?Sized>(msg: &mut M, w: &mut XmlStreamWriter) -> Result<()> {
    let version = match msg.soap_version() {
        Some(v) => v,
        None => return msg.write_payload_to(w),
    };
    let ns = version.ns_uri();
    w.start_element(ENVELOPE_PREFIX, "Envelope", ns)?;
    if msg.has_headers() {
        w.start_element(ENVELOPE_PREFIX, "Header", ns)?;
        for header in msg.headers().iter() {
            header.write_to(w)?;
        }
        w.end_element()?;
    }
    w.start_element(ENVELOPE_PREFIX, "Body", ns)?;
    msg.write_payload_to(w)?;
    w.end_element()?;
    w.end_element()
}

/// Serialize a message's envelope into a fresh buffer.
pub fn to_bytes(msg: &mut dyn Message) -> Result<Vec<u8>> {
    let mut w = XmlStreamWriter::new();
    msg.write_to(&mut w)?;
    w.take_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_envelope, SOAP_11_NS};

    #[test]
    fn test_write_envelope_without_headers() {
        let mut msg = DomMessage::from_xml(
            Some(SoapVersion::Soap11),
            b"<m:ping xmlns:m=\"urn:m\">1</m:ping>",
        )
        .unwrap();
        let xml = String::from_utf8(to_bytes(&mut msg).unwrap()).unwrap();
        assert!(xml.starts_with(&format!("<S:Envelope xmlns:S=\"{}\">", SOAP_11_NS)));
        assert!(!xml.contains("S:Header"));
        assert!(xml.contains("<S:Body><m:ping"));
    }

    #[test]
    fn test_write_envelope_with_headers_parses_back() {
        let mut msg = DomMessage::from_xml(
            Some(SoapVersion::Soap11),
            b"<m:ping xmlns:m=\"urn:m\">1</m:ping>",
        )
        .unwrap();
        msg.headers_mut()
            .add(Header::text("urn:h", "h", "Trace", "abc").unwrap());
        let xml = String::from_utf8(to_bytes(&mut msg).unwrap()).unwrap();
        let parsed = parse_envelope(&xml, SoapVersion::Soap11).unwrap();
        assert_eq!(parsed.headers.len(), 1);
        assert_eq!(parsed.payload.unwrap().local, "ping");
    }

    #[test]
    fn test_plain_xml_has_no_envelope() {
        let mut msg = DomMessage::from_xml(None, b"<ping/>").unwrap();
        let xml = String::from_utf8(to_bytes(&mut msg).unwrap()).unwrap();
        assert_eq!(xml, "<ping/>");
        assert!(msg.read_as_soap_message().is_err());
    }
}
