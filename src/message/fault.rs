//! SOAP faults and the fault message variant.

use super::dom::{element, text_element};
use super::{AttachmentSet, DomMessage, Header, HeaderList, Message, PayloadReader, ENVELOPE_PREFIX};
use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::xml::{QName, XmlStreamWriter};
use std::fmt;
use xmltree::{Element, XMLNode};

/// Prefix declared for fault codes outside the envelope namespace.
const CODE_PREFIX: &str = "fc";

/// A SOAP fault in version-neutral form.
#[derive(Debug, Clone)]
pub struct SoapFault {
    /// Top-level fault code (`Client`/`Server` or `Sender`/`Receiver`, ...)
    pub code: QName,
    /// SOAP 1.2 subcode
    pub subcode: Option<QName>,
    /// Human readable reason
    pub reason: String,
    /// Node that raised the fault (`faultactor` / `Role`)
    pub role: Option<String>,
    /// Application detail
    pub detail: Option<Element>,
}

impl SoapFault {
    pub fn new(code: QName, reason: impl Into<String>) -> Self {
        Self {
            code,
            subcode: None,
            reason: reason.into(),
            role: None,
            detail: None,
        }
    }

    /// Fault blamed on the message sender.
    pub fn sender(version: SoapVersion, reason: impl Into<String>) -> Self {
        Self::new(
            QName::new(version.ns_uri(), version.sender_fault_code()),
            reason,
        )
    }

    /// Fault raised while processing a valid message.
    pub fn receiver(version: SoapVersion, reason: impl Into<String>) -> Self {
        Self::new(
            QName::new(version.ns_uri(), version.receiver_fault_code()),
            reason,
        )
    }

    pub fn must_understand(version: SoapVersion) -> Self {
        Self::new(
            QName::new(version.ns_uri(), "MustUnderstand"),
            "One or more mandatory SOAP header blocks not understood",
        )
    }

    pub fn version_mismatch(version: SoapVersion) -> Self {
        Self::new(
            QName::new(version.ns_uri(), "VersionMismatch"),
            "Invalid SOAP envelope namespace",
        )
    }

    pub fn with_subcode(mut self, subcode: QName) -> Self {
        self.subcode = Some(subcode);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_detail(mut self, detail: Element) -> Self {
        self.detail = Some(detail);
        self
    }

    /// True when the fault code names the sender side.
    pub fn is_sender_fault(&self) -> bool {
        matches!(self.code.local.as_str(), "Client" | "Sender")
            || self.code.local.starts_with("Client.")
    }

    /// Render the `Fault` element for `version`.
    pub fn to_element(&self, version: SoapVersion) -> Element {
        let ns = version.ns_uri();
        let mut fault = element(ENVELOPE_PREFIX, "Fault", ns);
        match version {
            SoapVersion::Soap11 => {
                push(&mut fault, code_element("", "faultcode", "", &self.code, ns));
                push(
                    &mut fault,
                    text_element("", "faultstring", "", &self.reason),
                );
                if let Some(role) = &self.role {
                    push(&mut fault, text_element("", "faultactor", "", role));
                }
                if let Some(detail) = &self.detail {
                    let mut d = element("", "detail", "");
                    push(&mut d, detail.clone());
                    push(&mut fault, d);
                }
            }
            SoapVersion::Soap12 => {
                let mut code = element(ENVELOPE_PREFIX, "Code", ns);
                push(
                    &mut code,
                    code_element(ENVELOPE_PREFIX, "Value", ns, &self.code, ns),
                );
                if let Some(subcode) = &self.subcode {
                    let mut sub = element(ENVELOPE_PREFIX, "Subcode", ns);
                    push(
                        &mut sub,
                        code_element(ENVELOPE_PREFIX, "Value", ns, subcode, ns),
                    );
                    push(&mut code, sub);
                }
                push(&mut fault, code);

                let mut reason = element(ENVELOPE_PREFIX, "Reason", ns);
                let mut text = text_element(ENVELOPE_PREFIX, "Text", ns, &self.reason);
                text.attributes
                    .insert("xml:lang".to_string(), "en".to_string());
                push(&mut reason, text);
                push(&mut fault, reason);

                if let Some(role) = &self.role {
                    push(&mut fault, text_element(ENVELOPE_PREFIX, "Role", ns, role));
                }
                if let Some(detail) = &self.detail {
                    let mut d = element(ENVELOPE_PREFIX, "Detail", ns);
                    push(&mut d, detail.clone());
                    push(&mut fault, d);
                }
            }
        }
        fault
    }

    /// Parse a `Fault` element written in `version`.
    pub fn from_element(version: SoapVersion, fault: &Element) -> Result<Self> {
        let invalid = |what: &str| SoapError::InvalidEnvelope(format!("fault without {}", what));
        match version {
            SoapVersion::Soap11 => {
                let code = fault.get_child("faultcode").ok_or_else(|| invalid("faultcode"))?;
                Ok(Self {
                    code: resolve_code(version, code)?,
                    subcode: None,
                    reason: child_text(fault, "faultstring").unwrap_or_default(),
                    role: child_text(fault, "faultactor"),
                    detail: first_child_element(fault.get_child("detail")),
                })
            }
            SoapVersion::Soap12 => {
                let code = fault.get_child("Code").ok_or_else(|| invalid("Code"))?;
                let value = code.get_child("Value").ok_or_else(|| invalid("Code/Value"))?;
                let subcode = match code.get_child("Subcode").and_then(|s| s.get_child("Value")) {
                    Some(v) => Some(resolve_code(version, v)?),
                    None => None,
                };
                let reason = fault
                    .get_child("Reason")
                    .and_then(|r| r.get_child("Text"))
                    .and_then(|t| t.get_text())
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                Ok(Self {
                    code: resolve_code(version, value)?,
                    subcode,
                    reason,
                    role: child_text(fault, "Role"),
                    detail: first_child_element(fault.get_child("Detail")),
                })
            }
        }
    }

    /// Read the fault carried by `msg`; consumes the payload.
    pub fn from_message(msg: &mut dyn Message) -> Result<Self> {
        let version = msg.soap_version().ok_or_else(|| {
            SoapError::InvalidEnvelope("plain XML message cannot carry a fault".to_string())
        })?;
        if !msg.is_fault() {
            return Err(SoapError::InvalidEnvelope(
                "message payload is not a Fault".to_string(),
            ));
        }
        let payload = msg
            .read_payload_as_source()?
            .ok_or_else(|| SoapError::InvalidEnvelope("empty fault".to_string()))?;
        Self::from_element(version, &payload)
    }

    pub fn into_error(self) -> SoapError {
        SoapError::Fault(Box::new(self))
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.local, self.reason)
    }
}

fn push(parent: &mut Element, child: Element) {
    parent.children.push(XMLNode::Element(child));
}

/// Element whose text is a prefixed QName.
fn code_element(prefix: &str, local: &str, ns: &str, code: &QName, envelope_ns: &str) -> Element {
    if code.namespace == envelope_ns {
        return text_element(
            prefix,
            local,
            ns,
            &format!("{}:{}", ENVELOPE_PREFIX, code.local),
        );
    }
    if code.namespace.is_empty() {
        return text_element(prefix, local, ns, &code.local);
    }
    let mut e = text_element(prefix, local, ns, &format!("{}:{}", CODE_PREFIX, code.local));
    e.attributes
        .insert(format!("xmlns:{}", CODE_PREFIX), code.namespace.clone());
    e
}

/// Resolve a prefixed code against the element's in-scope namespaces.
///
/// Elements built in memory carry no scope; for them the declaration is
/// read from the element's own attributes, and the envelope prefix is bound
/// to the envelope namespace of `version`.
fn resolve_code(version: SoapVersion, e: &Element) -> Result<QName> {
    let text = e
        .get_text()
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    match text.split_once(':') {
        Some((prefix, local)) => {
            let ns = e
                .namespaces
                .as_ref()
                .and_then(|n| n.get(prefix))
                .map(String::from)
                .or_else(|| e.attributes.get(&format!("xmlns:{}", prefix)).cloned())
                .or_else(|| (prefix == ENVELOPE_PREFIX).then(|| version.ns_uri().to_string()))
                .ok_or_else(|| {
                    SoapError::InvalidEnvelope(format!("unbound fault code prefix {}", prefix))
                })?;
            Ok(QName::new(ns, local))
        }
        None => Ok(QName::new("", text)),
    }
}

fn child_text(e: &Element, name: &str) -> Option<String> {
    e.get_child(name)
        .and_then(|c| c.get_text())
        .map(|t| t.into_owned())
}

fn first_child_element(e: Option<&Element>) -> Option<Element> {
    e?.children.iter().find_map(|c| match c {
        XMLNode::Element(el) => Some(el.clone()),
        _ => None,
    })
}

/// Message whose payload is a SOAP Fault.
#[derive(Debug, Clone)]
pub struct FaultMessage {
    inner: DomMessage,
    fault: SoapFault,
}

impl FaultMessage {
    pub fn new(version: SoapVersion, fault: SoapFault) -> Self {
        Self {
            inner: DomMessage::new(Some(version), Some(fault.to_element(version))),
            fault,
        }
    }

    /// MustUnderstand fault; SOAP 1.2 also names each header in a
    /// `NotUnderstood` header block.
    pub fn must_understand(version: SoapVersion, not_understood: &[QName]) -> Result<Self> {
        let mut msg = Self::new(version, SoapFault::must_understand(version));
        if version == SoapVersion::Soap12 {
            for name in not_understood {
                let mut w = XmlStreamWriter::new();
                w.start_element(ENVELOPE_PREFIX, "NotUnderstood", version.ns_uri())?;
                w.namespace("nu", &name.namespace)?;
                w.attribute("qname", &format!("nu:{}", name.local))?;
                w.end_element()?;
                msg.inner.headers_mut().add(Header::from_xml(w.take_bytes()?)?);
            }
        }
        Ok(msg)
    }

    pub fn fault(&self) -> &SoapFault {
        &self.fault
    }
}

impl Message for FaultMessage {
    fn soap_version(&self) -> Option<SoapVersion> {
        self.inner.soap_version()
    }

    fn headers(&self) -> &HeaderList {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderList {
        self.inner.headers_mut()
    }

    fn attachments(&self) -> &AttachmentSet {
        self.inner.attachments()
    }

    fn attachments_mut(&mut self) -> &mut AttachmentSet {
        self.inner.attachments_mut()
    }

    fn payload_local_part(&self) -> Option<&str> {
        self.inner.payload_local_part()
    }

    fn payload_namespace_uri(&self) -> Option<&str> {
        self.inner.payload_namespace_uri()
    }

    fn is_fault(&self) -> bool {
        true
    }

    fn read_payload_as_source(&mut self) -> Result<Option<Element>> {
        self.inner.read_payload_as_source()
    }

    fn read_payload(&mut self) -> Result<Option<PayloadReader>> {
        self.inner.read_payload()
    }

    fn write_payload_to(&mut self, w: &mut XmlStreamWriter) -> Result<()> {
        self.inner.write_payload_to(w)
    }

    fn copy(&self) -> Result<Box<dyn Message>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{to_bytes, StreamMessage};
    use crate::parser::{parse_envelope, SOAP_11_NS, SOAP_12_NS};

    fn round_trip(version: SoapVersion, msg: &mut FaultMessage) -> (String, SoapFault) {
        let xml = String::from_utf8(to_bytes(msg).unwrap()).unwrap();
        let mut decoded =
            StreamMessage::from_envelope(parse_envelope(&xml, version).unwrap()).unwrap();
        assert!(decoded.is_fault());
        (xml, SoapFault::from_message(&mut decoded).unwrap())
    }

    #[test]
    fn test_soap11_fault_shape() {
        let fault = SoapFault::sender(SoapVersion::Soap11, "bad input").with_role("urn:gw");
        let mut msg = FaultMessage::new(SoapVersion::Soap11, fault);
        let (xml, parsed) = round_trip(SoapVersion::Soap11, &mut msg);
        assert!(xml.contains("<faultcode>S:Client</faultcode>"));
        assert!(xml.contains("<faultstring>bad input</faultstring>"));
        assert_eq!(parsed.code, QName::new(SOAP_11_NS, "Client"));
        assert_eq!(parsed.reason, "bad input");
        assert_eq!(parsed.role.as_deref(), Some("urn:gw"));
        assert!(parsed.is_sender_fault());
    }

    #[test]
    fn test_soap12_fault_with_subcode_and_detail() {
        let detail = text_element("d", "info", "urn:detail", "42");
        let fault = SoapFault::receiver(SoapVersion::Soap12, "boom")
            .with_subcode(QName::new("urn:app", "Overloaded"))
            .with_detail(detail);
        let mut msg = FaultMessage::new(SoapVersion::Soap12, fault);
        let (xml, parsed) = round_trip(SoapVersion::Soap12, &mut msg);
        assert!(xml.contains("<S:Value>S:Receiver</S:Value>"));
        assert!(xml.contains("xml:lang=\"en\""));
        assert_eq!(parsed.code, QName::new(SOAP_12_NS, "Receiver"));
        assert_eq!(parsed.subcode, Some(QName::new("urn:app", "Overloaded")));
        assert_eq!(parsed.reason, "boom");
        assert!(!parsed.is_sender_fault());
        let detail = parsed.detail.as_ref().unwrap();
        assert_eq!(detail.name, "info");
    }

    #[test]
    fn test_fault_message_reads_back_without_serializing() {
        for version in [SoapVersion::Soap11, SoapVersion::Soap12] {
            let mut sender = FaultMessage::new(version, SoapFault::sender(version, "bad input"));
            let parsed = SoapFault::from_message(&mut sender).unwrap();
            assert_eq!(parsed.code, QName::new(version.ns_uri(), version.sender_fault_code()));
            assert_eq!(parsed.reason, "bad input");
            assert!(parsed.is_sender_fault());

            let mut receiver = FaultMessage::new(version, SoapFault::receiver(version, "down"));
            let parsed = SoapFault::from_message(&mut receiver).unwrap();
            assert_eq!(parsed.code, QName::new(version.ns_uri(), version.receiver_fault_code()));
            assert!(!parsed.is_sender_fault());
        }

        let fault = SoapFault::receiver(SoapVersion::Soap12, "busy")
            .with_subcode(QName::new("urn:app", "Overloaded"));
        let mut msg = FaultMessage::new(SoapVersion::Soap12, fault);
        let parsed = SoapFault::from_message(&mut msg).unwrap();
        assert_eq!(parsed.subcode, Some(QName::new("urn:app", "Overloaded")));
    }

    #[test]
    fn test_must_understand_12_lists_headers() {
        let msg = FaultMessage::must_understand(
            SoapVersion::Soap12,
            &[QName::new("urn:t", "Trans")],
        )
        .unwrap();
        assert_eq!(msg.headers().len(), 1);
        let h = msg.headers().get(0).unwrap();
        assert_eq!(h.local_part(), "NotUnderstood");
        assert_eq!(h.attribute(None, "qname"), Some("nu:Trans"));
        assert_eq!(msg.fault().code.local, "MustUnderstand");
    }

    #[test]
    fn test_from_message_rejects_non_fault() {
        let mut msg = DomMessage::from_xml(Some(SoapVersion::Soap11), b"<ok/>").unwrap();
        assert!(SoapFault::from_message(&mut msg).is_err());
    }
}
