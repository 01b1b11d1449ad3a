//! SOAP header blocks.

use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::parser::{read_root, AttributeInfo, SOAP_12_ROLE_NONE};
use crate::xml::{QName, XmlStreamWriter};
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::NsReader;
use std::io::Cursor;
use xmltree::Element;

/// An immutable header block, kept as its serialized fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: QName,
    attributes: Vec<(Option<String>, String, String)>,
    xml: Bytes,
}

impl Header {
    /// Wrap a self-contained fragment (its root carries every namespace
    /// declaration it uses).
    pub fn from_xml(xml: impl Into<Bytes>) -> Result<Self> {
        let xml = xml.into();
        let root = read_root(&xml)?;
        Ok(Self {
            name: QName::new(root.namespace.unwrap_or_default(), root.local),
            attributes: root
                .attributes
                .into_iter()
                .map(|AttributeInfo { namespace, local, value }| (namespace, local, value))
                .collect(),
            xml,
        })
    }

    /// A header holding a single text value.
    pub fn text(namespace: &str, prefix: &str, local: &str, value: &str) -> Result<Self> {
        let mut w = XmlStreamWriter::new();
        w.start_element(prefix, local, namespace)?;
        w.characters(value)?;
        w.end_element()?;
        Self::from_xml(w.take_bytes()?)
    }

    /// A text header flagged mustUnderstand for `version`.
    pub fn must_understand_text(
        version: SoapVersion,
        namespace: &str,
        prefix: &str,
        local: &str,
        value: &str,
    ) -> Result<Self> {
        let mut w = XmlStreamWriter::new();
        w.start_element(prefix, local, namespace)?;
        w.namespace("S", version.ns_uri())?;
        w.attribute("S:mustUnderstand", "1")?;
        w.characters(value)?;
        w.end_element()?;
        Self::from_xml(w.take_bytes()?)
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn namespace_uri(&self) -> &str {
        &self.name.namespace
    }

    pub fn local_part(&self) -> &str {
        &self.name.local
    }

    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(ns, l, _)| l == local && ns.as_deref() == namespace)
            .map(|(_, _, v)| v.as_str())
    }

    pub fn must_understand(&self, version: SoapVersion) -> bool {
        self.attribute(Some(version.ns_uri()), "mustUnderstand")
            .is_some_and(parse_bool)
    }

    /// Targeted role; the version's implicit role when none is named.
    pub fn role(&self, version: SoapVersion) -> &str {
        self.attribute(Some(version.ns_uri()), version.role_attribute())
            .unwrap_or(version.implicit_role())
    }

    /// SOAP 1.2 relay flag; always false for SOAP 1.1.
    pub fn is_relay(&self, version: SoapVersion) -> bool {
        version == SoapVersion::Soap12
            && self
                .attribute(Some(version.ns_uri()), "relay")
                .is_some_and(parse_bool)
    }

    /// True when a node playing `roles` may ignore this header.
    pub fn is_ignorable(&self, version: SoapVersion, roles: &[String]) -> bool {
        if !self.must_understand(version) {
            return true;
        }
        let role = self.role(version);
        role == SOAP_12_ROLE_NONE || !roles.iter().any(|r| r == role)
    }

    /// Concatenated text content.
    pub fn string_content(&self) -> Result<String> {
        let mut reader = NsReader::from_reader(self.xml.as_ref());
        let mut text = String::new();
        loop {
            match reader.read_event().map_err(SoapError::xml)? {
                Event::Text(t) => text.push_str(&t.unescape().map_err(SoapError::xml)?),
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(text)
    }

    /// DOM view of the header.
    pub fn read_header(&self) -> Result<Element> {
        Element::parse(self.xml.as_ref()).map_err(SoapError::xml)
    }

    /// Pull-parser view of the header.
    pub fn reader(&self) -> NsReader<Cursor<Bytes>> {
        NsReader::from_reader(Cursor::new(self.xml.clone()))
    }

    pub fn write_to(&self, w: &mut XmlStreamWriter) -> Result<()> {
        w.write_raw(&self.xml)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.xml
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim(), "1" | "true")
}

/// Ordered headers with per-header "understood" flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    headers: Vec<Header>,
    understood: Vec<bool>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, header: Header) {
        self.headers.push(header);
        self.understood.push(false);
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Header> {
        self.headers.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.headers.iter()
    }

    /// First header with the given name.
    pub fn find(&self, namespace: &str, local: &str) -> Option<&Header> {
        self.headers
            .iter()
            .find(|h| h.namespace_uri() == namespace && h.local_part() == local)
    }

    /// All headers with the given name, in order.
    pub fn find_all<'a>(
        &'a self,
        namespace: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Header> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.namespace_uri() == namespace && h.local_part() == local)
    }

    /// Remove and return the first header with the given name.
    pub fn remove(&mut self, namespace: &str, local: &str) -> Option<Header> {
        let pos = self
            .headers
            .iter()
            .position(|h| h.namespace_uri() == namespace && h.local_part() == local)?;
        self.understood.remove(pos);
        Some(self.headers.remove(pos))
    }

    pub fn is_understood(&self, index: usize) -> bool {
        self.understood.get(index).copied().unwrap_or(false)
    }

    pub fn mark_understood(&mut self, index: usize) {
        if let Some(flag) = self.understood.get_mut(index) {
            *flag = true;
        }
    }

    /// Mark every header with the given name as understood.
    pub fn mark_understood_by_name(&mut self, name: &QName) {
        for (header, flag) in self.headers.iter().zip(self.understood.iter_mut()) {
            if header.name() == name {
                *flag = true;
            }
        }
    }

    /// Names of mustUnderstand headers targeted at `roles` that are neither
    /// marked understood nor in `known`.
    pub fn not_understood(
        &self,
        version: SoapVersion,
        roles: &[String],
        known: &[QName],
    ) -> Vec<QName> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(i, h)| {
                !self.is_understood(*i)
                    && !h.is_ignorable(version, roles)
                    && !known.contains(h.name())
            })
            .map(|(_, h)| h.name().clone())
            .collect()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.iter()
    }
}

impl FromIterator<Header> for HeaderList {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for h in iter {
            list.add(h);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{SOAP_11_NS, SOAP_11_ROLE_NEXT, SOAP_12_NS};

    const WSA: &str = "http://www.w3.org/2005/08/addressing";

    #[test]
    fn test_text_header() {
        let h = Header::text(WSA, "wsa", "To", "http://example.org/svc").unwrap();
        assert_eq!(h.local_part(), "To");
        assert_eq!(h.namespace_uri(), WSA);
        assert_eq!(h.string_content().unwrap(), "http://example.org/svc");
        assert!(!h.must_understand(SoapVersion::Soap11));
    }

    #[test]
    fn test_must_understand_and_implicit_role() {
        let h = Header::must_understand_text(SoapVersion::Soap11, "urn:t", "t", "Trans", "5")
            .unwrap();
        assert!(h.must_understand(SoapVersion::Soap11));
        assert!(!h.must_understand(SoapVersion::Soap12));
        assert_eq!(h.role(SoapVersion::Soap11), SOAP_11_ROLE_NEXT);
        assert!(!h.is_ignorable(SoapVersion::Soap11, &[SOAP_11_ROLE_NEXT.to_string()]));
        assert!(h.is_ignorable(SoapVersion::Soap11, &["urn:other".to_string()]));
    }

    #[test]
    fn test_explicit_role_and_relay() {
        let xml = format!(
            r#"<t:X xmlns:t="urn:t" xmlns:S="{}" S:role="urn:gateway" S:relay="true" S:mustUnderstand="true"/>"#,
            SOAP_12_NS
        );
        let h = Header::from_xml(xml).unwrap();
        assert_eq!(h.role(SoapVersion::Soap12), "urn:gateway");
        assert!(h.is_relay(SoapVersion::Soap12));
        assert!(!h.is_relay(SoapVersion::Soap11));
        assert!(h.is_ignorable(SoapVersion::Soap12, &[]));
    }

    #[test]
    fn test_header_list_understood() {
        let mut list = HeaderList::new();
        list.add(Header::must_understand_text(SoapVersion::Soap11, "urn:t", "t", "A", "1").unwrap());
        list.add(Header::text("urn:t", "t", "B", "2").unwrap());
        list.add(Header::must_understand_text(SoapVersion::Soap11, "urn:t", "t", "C", "3").unwrap());

        let roles = vec![SOAP_11_ROLE_NEXT.to_string()];
        let missing = list.not_understood(SoapVersion::Soap11, &roles, &[QName::new("urn:t", "C")]);
        assert_eq!(missing, vec![QName::new("urn:t", "A")]);

        list.mark_understood(0);
        assert!(list
            .not_understood(SoapVersion::Soap11, &roles, &[QName::new("urn:t", "C")])
            .is_empty());
    }

    #[test]
    fn test_find_and_remove_preserve_order() {
        let mut list: HeaderList = ["1", "2", "3"]
            .iter()
            .map(|v| Header::text("urn:t", "t", "Dup", v).unwrap())
            .collect();
        let values: Vec<String> = list
            .find_all("urn:t", "Dup")
            .map(|h| h.string_content().unwrap())
            .collect();
        assert_eq!(values, vec!["1", "2", "3"]);
        let first = list.remove("urn:t", "Dup").unwrap();
        assert_eq!(first.string_content().unwrap(), "1");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_read_header_dom() {
        let h = Header::text(SOAP_11_NS, "S", "Note", "hi").unwrap();
        let dom = h.read_header().unwrap();
        assert_eq!(dom.name, "Note");
        assert_eq!(dom.namespace.as_deref(), Some(SOAP_11_NS));
    }
}
