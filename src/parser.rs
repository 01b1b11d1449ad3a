//! SOAP XML parsing utilities.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand entities).
//! Envelopes are split into self-contained fragments: every header block and
//! the body content are re-emitted with the namespace declarations they
//! inherit from the envelope, so each can be read on its own later.

use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use bytes::Bytes;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Well-known roles.
pub const SOAP_11_ROLE_NEXT: &str = "http://schemas.xmlsoap.org/soap/actor/next";
pub const SOAP_12_ROLE_NEXT: &str = "http://www.w3.org/2003/05/soap-envelope/role/next";
pub const SOAP_12_ROLE_NONE: &str = "http://www.w3.org/2003/05/soap-envelope/role/none";
pub const SOAP_12_ROLE_ULTIMATE_RECEIVER: &str =
    "http://www.w3.org/2003/05/soap-envelope/role/ultimateReceiver";

/// Envelope split into fragments.
#[derive(Debug, Clone)]
pub struct ParsedEnvelope {
    /// Version whose namespace the envelope uses
    pub version: SoapVersion,
    /// One self-contained fragment per header block, in document order
    pub headers: Vec<Bytes>,
    /// Body content (if any)
    pub payload: Option<CapturedPayload>,
}

/// Body content of an envelope.
#[derive(Debug, Clone)]
pub struct CapturedPayload {
    /// Local name of the first body element
    pub local: String,
    /// Namespace of the first body element
    pub namespace: Option<String>,
    /// All body children, serialized
    pub xml: Bytes,
}

/// Root element of a fragment.
#[derive(Debug, Clone)]
pub struct ElementInfo {
    pub local: String,
    pub namespace: Option<String>,
    pub attributes: Vec<AttributeInfo>,
}

/// A resolved attribute (namespace declarations excluded).
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub namespace: Option<String>,
    pub local: String,
    pub value: String,
}

/// Body content analysis.
#[derive(Debug, Clone, Default)]
pub struct BodyAnalysis {
    /// Maximum nesting depth found
    pub max_depth: u32,
    /// Total element count
    pub element_count: u32,
    /// Maximum text content length
    pub max_text_length: usize,
    /// Contains CDATA sections
    pub has_cdata: bool,
    /// Contains comments
    pub has_comments: bool,
    /// Namespaces found in body
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Prolog,
    Envelope,
    Header,
    Body,
    Done,
}

/// Parse an envelope expected to be in `version`.
///
/// A well-formed envelope in another namespace is a version mismatch, not a
/// parse error.
pub fn parse_envelope(xml: &str, version: SoapVersion) -> Result<ParsedEnvelope> {
    // Pre-scan for XXE patterns (belt-and-suspenders with quick-xml's safety)
    check_xxe_patterns(xml)?;

    let mut reader = NsReader::from_str(xml);
    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();
    let mut section = Section::Prolog;
    let mut depth = 0usize;

    let mut headers = Vec::new();
    let mut header_capture: Option<Writer<Vec<u8>>> = None;
    let mut body_capture: Option<Writer<Vec<u8>>> = None;
    let mut payload_name: Option<(String, Option<String>)> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(SoapError::xml)?;
        let element_ns = namespace_of(&resolved);
        match event {
            Event::Start(e) => {
                depth += 1;
                scopes.push(declared_namespaces(&e)?);
                match depth {
                    1 => {
                        check_envelope(&e, element_ns.as_deref(), version)?;
                        section = Section::Envelope;
                    }
                    2 => section = enter_section(&e, element_ns.as_deref(), section, version)?,
                    3 => {
                        let start = with_inherited_namespaces(&e, &scopes)?;
                        if section == Section::Header {
                            let mut w = Writer::new(Vec::new());
                            write(&mut w, Event::Start(start))?;
                            header_capture = Some(w);
                        } else {
                            if payload_name.is_none() {
                                payload_name = Some((local_name(&e)?, element_ns.clone()));
                            }
                            let w = body_capture.get_or_insert_with(|| Writer::new(Vec::new()));
                            write(w, Event::Start(start))?;
                        }
                    }
                    _ => write_captured(&mut header_capture, &mut body_capture, Event::Start(e))?,
                }
            }
            Event::Empty(e) => {
                match depth + 1 {
                    1 => {
                        check_envelope(&e, element_ns.as_deref(), version)?;
                        return Err(SoapError::InvalidEnvelope("missing Body".to_string()));
                    }
                    2 => {
                        let next = enter_section(&e, element_ns.as_deref(), section, version)?;
                        section = if next == Section::Body {
                            Section::Done
                        } else {
                            Section::Envelope
                        };
                    }
                    3 => {
                        scopes.push(declared_namespaces(&e)?);
                        let start = with_inherited_namespaces(&e, &scopes)?;
                        scopes.pop();
                        if section == Section::Header {
                            let mut w = Writer::new(Vec::new());
                            write(&mut w, Event::Empty(start))?;
                            headers.push(Bytes::from(w.into_inner()));
                        } else {
                            if payload_name.is_none() {
                                payload_name = Some((local_name(&e)?, element_ns.clone()));
                            }
                            let w = body_capture.get_or_insert_with(|| Writer::new(Vec::new()));
                            write(w, Event::Empty(start))?;
                        }
                    }
                    _ => write_captured(&mut header_capture, &mut body_capture, Event::Empty(e))?,
                }
            }
            Event::End(e) => {
                match depth {
                    3 if section == Section::Header => {
                        if let Some(mut w) = header_capture.take() {
                            write(&mut w, Event::End(e))?;
                            headers.push(Bytes::from(w.into_inner()));
                        }
                    }
                    3 => {
                        if let Some(w) = body_capture.as_mut() {
                            write(w, Event::End(e))?;
                        }
                    }
                    2 => {
                        section = if section == Section::Body {
                            Section::Done
                        } else {
                            Section::Envelope
                        };
                    }
                    1 => {}
                    _ => write_captured(&mut header_capture, &mut body_capture, Event::End(e))?,
                }
                scopes.pop();
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) if depth >= 3 => {
                write_captured(&mut header_capture, &mut body_capture, Event::Text(t))?
            }
            Event::CData(c) if depth >= 3 => {
                write_captured(&mut header_capture, &mut body_capture, Event::CData(c))?
            }
            Event::Comment(c) if depth >= 3 => {
                write_captured(&mut header_capture, &mut body_capture, Event::Comment(c))?
            }
            Event::PI(p) if depth >= 3 => {
                write_captured(&mut header_capture, &mut body_capture, Event::PI(p))?
            }
            Event::DocType(_) => {
                return Err(SoapError::InvalidEnvelope(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match section {
        Section::Prolog => Err(SoapError::InvalidEnvelope(
            "no SOAP Envelope found".to_string(),
        )),
        Section::Done => {
            let payload = match (payload_name, body_capture) {
                (Some((local, namespace)), Some(w)) => Some(CapturedPayload {
                    local,
                    namespace,
                    xml: Bytes::from(w.into_inner()),
                }),
                _ => None,
            };
            Ok(ParsedEnvelope {
                version,
                headers,
                payload,
            })
        }
        _ => Err(SoapError::InvalidEnvelope("missing Body".to_string())),
    }
}

fn check_envelope(e: &BytesStart, namespace: Option<&str>, version: SoapVersion) -> Result<()> {
    let local = local_name(e)?;
    if local != "Envelope" {
        return Err(SoapError::InvalidEnvelope(format!(
            "expected Envelope, found {}",
            local
        )));
    }
    let actual = namespace.unwrap_or_default().to_string();
    if actual != version.ns_uri() {
        return Err(SoapError::VersionMismatch {
            expected: version.ns_uri().to_string(),
            actual,
        });
    }
    Ok(())
}

fn enter_section(
    e: &BytesStart,
    namespace: Option<&str>,
    current: Section,
    version: SoapVersion,
) -> Result<Section> {
    let local = local_name(e)?;
    let in_envelope_ns = namespace == Some(version.ns_uri());
    match (local.as_str(), current) {
        ("Header", Section::Envelope) if in_envelope_ns => Ok(Section::Header),
        ("Body", Section::Envelope) if in_envelope_ns => Ok(Section::Body),
        _ => Err(SoapError::InvalidEnvelope(format!(
            "unexpected element {} in Envelope",
            local
        ))),
    }
}

fn write(w: &mut Writer<Vec<u8>>, event: Event) -> Result<()> {
    w.write_event(event).map_err(SoapError::xml)
}

fn write_captured(
    header: &mut Option<Writer<Vec<u8>>>,
    body: &mut Option<Writer<Vec<u8>>>,
    event: Event,
) -> Result<()> {
    match (header.as_mut(), body.as_mut()) {
        (Some(w), _) => write(w, event),
        (None, Some(w)) => write(w, event),
        (None, None) => Ok(()),
    }
}

/// Namespace declarations made on an element.
fn declared_namespaces(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut declared = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(SoapError::xml)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(SoapError::xml)?;
        let prefix = match key.strip_prefix("xmlns") {
            Some("") => "",
            Some(rest) => match rest.strip_prefix(':') {
                Some(p) => p,
                None => continue,
            },
            None => continue,
        };
        let value = attr.unescape_value().map_err(SoapError::xml)?;
        declared.push((prefix.to_string(), value.into_owned()));
    }
    Ok(declared)
}

/// Copy a start tag, adding the declarations it inherits from enclosing
/// scopes. The last scope belongs to the element itself.
fn with_inherited_namespaces(
    e: &BytesStart,
    scopes: &[Vec<(String, String)>],
) -> Result<BytesStart<'static>> {
    let mut start = e.clone().into_owned();
    let (own, outer) = match scopes.split_last() {
        Some((own, outer)) => (own.as_slice(), outer),
        None => (&[][..], scopes),
    };
    let mut injected: Vec<&str> = Vec::new();
    for (prefix, uri) in outer.iter().rev().flat_map(|s| s.iter().rev()) {
        if own.iter().any(|(p, _)| p == prefix) || injected.contains(&prefix.as_str()) {
            continue;
        }
        injected.push(prefix);
        let attr = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        start.push_attribute((attr.as_str(), uri.as_str()));
    }
    Ok(start)
}

fn local_name(e: &BytesStart) -> Result<String> {
    std::str::from_utf8(e.local_name().as_ref())
        .map(String::from)
        .map_err(SoapError::xml)
}

fn namespace_of(resolved: &ResolveResult) -> Option<String> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
        _ => None,
    }
}

/// Read the root element of a self-contained fragment.
pub fn read_root(xml: &[u8]) -> Result<ElementInfo> {
    let mut reader = NsReader::from_reader(xml);
    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(SoapError::xml)?;
        let element_ns = namespace_of(&resolved);
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let mut attributes = Vec::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(SoapError::xml)?;
                    let key = attr.key.as_ref();
                    if key == b"xmlns" || key.starts_with(b"xmlns:") {
                        continue;
                    }
                    let (attr_ns, local) = reader.resolve_attribute(attr.key);
                    attributes.push(AttributeInfo {
                        namespace: namespace_of(&attr_ns),
                        local: String::from_utf8_lossy(local.as_ref()).into_owned(),
                        value: attr.unescape_value().map_err(SoapError::xml)?.into_owned(),
                    });
                }
                return Ok(ElementInfo {
                    local: local_name(&e)?,
                    namespace: element_ns,
                    attributes,
                });
            }
            Event::Eof => {
                return Err(SoapError::XmlParse("fragment has no element".to_string()));
            }
            _ => {}
        }
    }
}

/// Measure a payload fragment for the validation limits.
pub fn analyze_body(xml: &[u8]) -> Result<BodyAnalysis> {
    let mut reader = NsReader::from_reader(xml);
    let mut analysis = BodyAnalysis::default();
    let mut depth = 0u32;

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(SoapError::xml)?;
        let element_ns = namespace_of(&resolved);
        match event {
            Event::Start(_) | Event::Empty(_) => {
                let is_start = matches!(event, Event::Start(_));
                analysis.element_count += 1;
                analysis.max_depth = analysis.max_depth.max(depth + 1);
                if is_start {
                    depth += 1;
                }
                if let Some(ns) = element_ns {
                    if !analysis.namespaces.contains(&ns) {
                        analysis.namespaces.push(ns);
                    }
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(t) => {
                let text = t.unescape().map_err(SoapError::xml)?;
                analysis.max_text_length = analysis.max_text_length.max(text.trim().len());
            }
            Event::CData(c) => {
                analysis.has_cdata = true;
                analysis.max_text_length = analysis.max_text_length.max(c.len());
            }
            Event::Comment(_) => analysis.has_comments = true,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(analysis)
}

/// Check for XXE attack patterns.
fn check_xxe_patterns(xml: &str) -> Result<()> {
    // DOCTYPE detection
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(SoapError::InvalidEnvelope(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    // External entity patterns
    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(SoapError::InvalidEnvelope(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Extract SOAPAction from HTTP header value (removes quotes).
pub fn parse_soap_action(header_value: &str) -> String {
    header_value.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_11_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <m:Trans xmlns:m="http://example.org/trans" soap:mustUnderstand="1">234</m:Trans>
  </soap:Header>
  <soap:Body>
    <m:GetPrice xmlns:m="http://example.org/stock">
      <m:Item>Apples</m:Item>
    </m:GetPrice>
  </soap:Body>
</soap:Envelope>"#;

    const SOAP_12_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:u="http://example.org/users">
  <soap:Body>
    <u:GetUser>
      <u:UserId>123</u:UserId>
    </u:GetUser>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_soap_11() {
        let envelope = parse_envelope(SOAP_11_SAMPLE, SoapVersion::Soap11).unwrap();
        assert_eq!(envelope.version, SoapVersion::Soap11);
        assert_eq!(envelope.headers.len(), 1);
        let payload = envelope.payload.unwrap();
        assert_eq!(payload.local, "GetPrice");
        assert_eq!(payload.namespace.as_deref(), Some("http://example.org/stock"));
    }

    #[test]
    fn test_header_fragment_is_self_contained() {
        let envelope = parse_envelope(SOAP_11_SAMPLE, SoapVersion::Soap11).unwrap();
        let info = read_root(&envelope.headers[0]).unwrap();
        assert_eq!(info.local, "Trans");
        let mu = info
            .attributes
            .iter()
            .find(|a| a.local == "mustUnderstand")
            .unwrap();
        assert_eq!(mu.namespace.as_deref(), Some(SOAP_11_NS));
        assert_eq!(mu.value, "1");
    }

    #[test]
    fn test_parse_soap_12_inherits_envelope_namespaces() {
        let envelope = parse_envelope(SOAP_12_SAMPLE, SoapVersion::Soap12).unwrap();
        assert!(envelope.headers.is_empty());
        let payload = envelope.payload.unwrap();
        assert_eq!(payload.local, "GetUser");
        let info = read_root(&payload.xml).unwrap();
        assert_eq!(info.namespace.as_deref(), Some("http://example.org/users"));
    }

    #[test]
    fn test_version_mismatch() {
        let err = parse_envelope(SOAP_12_SAMPLE, SoapVersion::Soap11).unwrap_err();
        assert!(matches!(err, SoapError::VersionMismatch { .. }));
    }

    #[test]
    fn test_empty_body() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body/></S:Envelope>"#;
        let envelope = parse_envelope(xml, SoapVersion::Soap11).unwrap();
        assert!(envelope.payload.is_none());
    }

    #[test]
    fn test_missing_body() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Header/></S:Envelope>"#;
        let err = parse_envelope(xml, SoapVersion::Soap11).unwrap_err();
        assert!(matches!(err, SoapError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_not_an_envelope() {
        let err = parse_envelope("<foo/>", SoapVersion::Soap11).unwrap_err();
        assert!(matches!(err, SoapError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_xxe_detection() {
        let xxe_payload = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>&xxe;</soap:Body>
</soap:Envelope>"#;

        let result = parse_envelope(xxe_payload, SoapVersion::Soap11);
        assert!(matches!(result, Err(SoapError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><a></b></S:Body></S:Envelope>"#;
        assert!(matches!(
            parse_envelope(xml, SoapVersion::Soap11),
            Err(SoapError::XmlParse(_))
        ));
    }

    #[test]
    fn test_analyze_body() {
        let xml = b"<a xmlns=\"urn:x\"><b>hello</b><!-- c --><c><![CDATA[raw]]></c></a>";
        let analysis = analyze_body(xml).unwrap();
        assert_eq!(analysis.element_count, 3);
        assert_eq!(analysis.max_depth, 2);
        assert_eq!(analysis.max_text_length, 5);
        assert!(analysis.has_cdata);
        assert!(analysis.has_comments);
        assert_eq!(analysis.namespaces, vec!["urn:x".to_string()]);
    }

    #[test]
    fn test_parse_soap_action() {
        assert_eq!(parse_soap_action("\"GetUser\""), "GetUser");
        assert_eq!(parse_soap_action("GetUser"), "GetUser");
        assert_eq!(parse_soap_action("  \"GetUser\"  "), "GetUser");
    }
}
