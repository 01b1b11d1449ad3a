//! Transports: the terminal client tubes and the server-side HTTP glue.
//!
//! Both client transports build the same wire headers from a packet and
//! apply the same status gate to responses; they differ only in how bytes
//! travel.

pub mod http;
pub mod local;
pub mod server;

use crate::codec::{ContentType, MediaType};
use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::packet::{keys, Packet};
use std::collections::BTreeMap;

pub use http::{
    BodyWriter, CookieJar, HttpClient, HttpRequest, HttpResponse, HttpResponseProperties,
    HttpTransportTube, ReqwestClient, RequestBody,
};
pub use local::LocalTransportTube;
pub use server::router;

/// Header name to values; names keep the case they were set with.
pub type HeaderMap = BTreeMap<String, Vec<String>>;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_ENCODING: &str = "Content-Encoding";
pub const ACCEPT: &str = "Accept";
pub const SOAP_ACTION: &str = "SOAPAction";
pub const USER_AGENT: &str = "User-Agent";
pub const COOKIE: &str = "Cookie";
pub const SET_COOKIE: &str = "Set-Cookie";
pub const SET_COOKIE2: &str = "Set-Cookie2";

/// First value of `name`, compared case-insensitively.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.first())
        .map(String::as_str)
}

/// All values of `name`, compared case-insensitively.
pub fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(name))
        .flat_map(|(_, v)| v.iter().map(String::as_str))
        .collect()
}

/// Replace every value of `name`.
pub fn set_header(headers: &mut HeaderMap, name: &str, value: impl Into<String>) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), vec![value.into()]);
}

/// Value of the SOAPAction header for an encoded request. SOAP 1.2 carries
/// the action in the content type and gets no header at all; neither does
/// the XML/HTTP binding.
pub fn soap_action_header(version: Option<SoapVersion>, content_type: &ContentType) -> Option<String> {
    match version {
        Some(SoapVersion::Soap11) => Some(
            content_type
                .soap_action
                .clone()
                .unwrap_or_else(|| "\"\"".to_string()),
        ),
        _ => None,
    }
}

/// Wire headers for a request: the caller's headers from the packet's
/// `http.request.headers` property, then the content type, Accept and
/// SOAPAction computed by the codec.
pub fn request_headers(
    packet: &Packet,
    version: Option<SoapVersion>,
    content_type: &ContentType,
) -> HeaderMap {
    let mut headers: HeaderMap = packet
        .get(keys::REQUEST_HEADERS)
        .ok()
        .flatten()
        .and_then(|v| v.as_headers().cloned())
        .unwrap_or_default();
    set_header(&mut headers, CONTENT_TYPE, content_type.content_type.clone());
    if let Some(accept) = &content_type.accept {
        set_header(&mut headers, ACCEPT, accept.clone());
    }
    match soap_action_header(version, content_type) {
        Some(action) => set_header(&mut headers, SOAP_ACTION, action),
        None => headers.retain(|k, _| !k.eq_ignore_ascii_case(SOAP_ACTION)),
    }
    headers
}

/// Decide whether a client may decode a response.
///
/// SOAP 1.1 accepts 200 and 202, and 500 when it carries a body (the
/// fault). SOAP 1.2 accepts 200, 202 and any 4xx or 5xx that carries a
/// body. The XML/HTTP binding accepts every status. An HTML page is never
/// a SOAP response.
pub fn check_response_status(
    version: Option<SoapVersion>,
    status: u16,
    reason: &str,
    content_type: Option<&str>,
    has_body: bool,
) -> Result<()> {
    let version = match version {
        Some(v) => v,
        None => return Ok(()),
    };
    let is_html = content_type
        .and_then(|ct| MediaType::parse(ct).ok())
        .is_some_and(|m| m.is("text", "html"));
    if is_html {
        return Err(SoapError::Transport {
            status,
            message: format!("{} (response is an HTML page, not a SOAP message)", reason),
        });
    }
    let accepted = match (version, status) {
        (_, 200 | 202) => true,
        (SoapVersion::Soap11, 500) => has_body,
        (SoapVersion::Soap12, 400..=599) => has_body,
        _ => false,
    };
    if accepted {
        Ok(())
    } else {
        Err(SoapError::Transport {
            status,
            message: reason.to_string(),
        })
    }
}

/// A response with nothing to decode: 202 Accepted or an empty body.
pub fn is_empty_response(status: u16, body: &[u8]) -> bool {
    status == 202 || body.iter().all(|b| b.is_ascii_whitespace())
}
