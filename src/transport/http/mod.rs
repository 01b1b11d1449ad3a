//! HTTP client transport.

pub mod client;
pub mod cookie;
pub mod tube;

use crate::packet::keys;
use crate::property::{PropertyTable, PropertyValue, TypedPropertySet};
use crate::transport::HeaderMap;
use std::sync::LazyLock;

pub use client::{BodyWriter, HttpClient, HttpRequest, HttpResponse, ReqwestClient, RequestBody};
pub use cookie::CookieJar;
pub use tube::HttpTransportTube;

/// Status code of the HTTP response
pub const RESPONSE_STATUS: &str = "http.response.status";
/// Reason phrase of the HTTP response
pub const RESPONSE_REASON: &str = "http.response.reason";

/// What the server said besides the body, attached to client response
/// packets as a satellite.
#[derive(Debug, Clone, Default)]
pub struct HttpResponseProperties {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

static RESPONSE_TABLE: LazyLock<PropertyTable<HttpResponseProperties>> = LazyLock::new(|| {
    PropertyTable::<HttpResponseProperties>::new()
        .with_read_only(RESPONSE_STATUS, |r| {
            Some(PropertyValue::Int(i64::from(r.status)))
        })
        .with_read_only(RESPONSE_REASON, |r| {
            Some(PropertyValue::Text(r.reason.clone()))
        })
        .with_read_only(keys::RESPONSE_HEADERS, |r| {
            Some(PropertyValue::Headers(r.headers.clone()))
        })
});

impl TypedPropertySet for HttpResponseProperties {
    fn table() -> &'static PropertyTable<Self> {
        &RESPONSE_TABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::SoapError;

    #[test]
    fn test_response_properties_via_packet() {
        let mut headers = HeaderMap::new();
        headers.insert("Server".to_string(), vec!["test".to_string()]);
        let mut packet = Packet::new(None);
        packet.add_satellite(HttpResponseProperties {
            status: 500,
            reason: "Internal Server Error".to_string(),
            headers,
        });
        assert_eq!(packet.property_int(RESPONSE_STATUS), Some(500));
        assert!(packet.satellite::<HttpResponseProperties>().is_some());
        assert!(matches!(
            packet.put(RESPONSE_STATUS, 200i64),
            Err(SoapError::ReadOnlyProperty(_))
        ));
    }
}
