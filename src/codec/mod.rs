//! Codecs: conversion between packets and wire bytes.
//!
//! [`SoapBindingCodec`] is what transports use for SOAP bindings. It picks
//! plain SOAP, SOAP with attachments or MTOM framing per packet and
//! dispatches on the inbound content type. [`XmlHttpCodec`] does the same
//! for the XML/HTTP binding.

pub mod binding;
pub mod mime;
pub mod mtom;
pub mod soap;
pub mod xml;

use crate::config::BindingConfig;
use crate::error::{Result, SoapError};
use crate::packet::Packet;
use crate::xml::XmlWriterFactory;
use bytes::Bytes;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

pub use binding::SoapBindingCodec;
pub use mime::{MimeCodec, MimePart};
pub use mtom::MtomCodec;
pub use soap::SoapCodec;
pub use xml::XmlHttpCodec;

/// Parsed `type/subtype; name=value` header value.
///
/// Type, subtype and parameter names are lowercased; parameter values keep
/// their case with surrounding quotes removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub primary: String,
    pub sub: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = split_params(value).into_iter();
        let base = parts.next().unwrap_or_default();
        let (primary, sub) = base
            .split_once('/')
            .map(|(p, s)| (p.trim(), s.trim()))
            .filter(|(p, s)| !p.is_empty() && !s.is_empty())
            .ok_or_else(|| SoapError::UnsupportedMedia {
                content_type: value.to_string(),
                expected: Vec::new(),
            })?;

        let params = parts
            .filter_map(|p| {
                let (name, value) = p.split_once('=')?;
                Some((name.trim().to_ascii_lowercase(), unquote(value.trim())))
            })
            .collect();

        Ok(Self {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params,
        })
    }

    pub fn is(&self, primary: &str, sub: &str) -> bool {
        self.primary == primary && self.sub == sub
    }

    /// `primary/sub` without parameters.
    pub fn base_type(&self) -> String {
        format!("{}/{}", self.primary, self.sub)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Split on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => parts.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .replace("\\\"", "\"")
}

/// Content type an encoded packet goes out with, plus the transport headers
/// that depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Full `Content-Type` header value
    pub content_type: String,
    /// `SOAPAction` header value (quoted), SOAP 1.1 only
    pub soap_action: Option<String>,
    /// `Accept` header value
    pub accept: Option<String>,
}

impl ContentType {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            soap_action: None,
            accept: None,
        }
    }

    pub fn with_soap_action(mut self, soap_action: Option<String>) -> Self {
        self.soap_action = soap_action;
        self
    }

    pub fn with_accept(mut self, accept: Option<String>) -> Self {
        self.accept = accept;
        self
    }

    pub fn media_type(&self) -> Result<MediaType> {
        MediaType::parse(&self.content_type)
    }

    pub fn charset(&self) -> Option<String> {
        self.media_type()
            .ok()
            .and_then(|m| m.param("charset").map(String::from))
    }

    pub fn boundary(&self) -> Option<String> {
        self.media_type()
            .ok()
            .and_then(|m| m.param("boundary").map(String::from))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_type)
    }
}

/// Two-way conversion between a packet and bytes.
///
/// Codecs are templates shared by a binding; transports work on a `copy()`.
pub trait Codec: Send + Sync {
    /// Main MIME type this codec produces.
    fn mime_type(&self) -> &str;

    /// Content type that `encode` would produce for `packet`, computed
    /// without serializing. Cached on the packet so repeated calls (and the
    /// following `encode`) agree.
    fn static_content_type(&self, packet: &mut Packet) -> Result<ContentType>;

    /// Serialize the packet's message into `out`.
    fn encode(&self, packet: &mut Packet, out: &mut Vec<u8>) -> Result<ContentType>;

    /// Serialize into any writer. The default encodes into memory first.
    fn encode_to(&self, packet: &mut Packet, out: &mut dyn Write) -> Result<ContentType> {
        let mut buf = Vec::new();
        let ct = self.encode(packet, &mut buf)?;
        out.write_all(&buf)?;
        Ok(ct)
    }

    /// Decode `data` into a message and store it on `packet`.
    fn decode(&self, data: Bytes, content_type: Option<&str>, packet: &mut Packet) -> Result<()>;

    fn copy(&self) -> Box<dyn Codec>;
}

/// The codec of a binding: SOAP when a version is configured, XML/HTTP
/// otherwise.
pub fn binding_codec(
    binding: &BindingConfig,
    writers: Arc<XmlWriterFactory>,
) -> Result<Box<dyn Codec>> {
    Ok(match binding.soap_version {
        Some(version) => Box::new(SoapBindingCodec::new(version, binding, writers)?),
        None => Box::new(XmlHttpCodec::new(writers)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_type() {
        let mt = MediaType::parse(
            "Multipart/Related; type=\"text/xml\"; boundary=\"uuid:a;b\"; start=<root>",
        )
        .unwrap();
        assert!(mt.is("multipart", "related"));
        assert_eq!(mt.param("TYPE"), Some("text/xml"));
        assert_eq!(mt.param("boundary"), Some("uuid:a;b"));
        assert_eq!(mt.param("start"), Some("<root>"));
        assert_eq!(mt.base_type(), "multipart/related");
    }

    #[test]
    fn test_invalid_media_type() {
        let err = MediaType::parse("garbage").unwrap_err();
        assert!(matches!(err, SoapError::UnsupportedMedia { .. }));
    }

    #[test]
    fn test_content_type_accessors() {
        let ct = ContentType::new("text/xml; charset=UTF-16");
        assert_eq!(ct.charset().as_deref(), Some("UTF-16"));
        assert!(ct.boundary().is_none());
        assert_eq!(ct.to_string(), "text/xml; charset=UTF-16");
    }
}
