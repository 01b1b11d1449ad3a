//! The packet: a message plus everything the pipeline needs to route it.

use crate::codec::ContentType;
use crate::error::{Result, SoapError};
use crate::message::Message;
use crate::property::{DistributedPropertySet, PropertySet, PropertyTable, PropertyValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Well-known packet property names.
pub mod keys {
    /// Target endpoint URL
    pub const ENDPOINT_ADDRESS: &str = "endpoint.address";
    /// SOAP action of the exchange
    pub const SOAP_ACTION: &str = "soap.action";
    /// Accept header value (content types the peer accepts)
    pub const ACCEPT: &str = "transport.accept";
    /// False for one-way exchanges
    pub const EXPECT_REPLY: &str = "message.expect.reply";
    /// Per-packet MTOM switch
    pub const MTOM_ENABLED: &str = "mtom.enabled";
    /// Cached content type of the encoded packet (read-only)
    pub const CONTENT_TYPE: &str = "transport.content.type";

    /// Charset the inbound message was decoded with
    pub const DECODED_CHARSET: &str = "soap.decoded.charset";
    /// Extra request headers (`Headers` value)
    pub const REQUEST_HEADERS: &str = "http.request.headers";
    /// Response headers received by a client (`Headers` value)
    pub const RESPONSE_HEADERS: &str = "http.response.headers";
    /// Keep cookies between calls
    pub const SESSION_MAINTAIN: &str = "session.maintain";
    /// Connect timeout override in milliseconds
    pub const CONNECT_TIMEOUT: &str = "http.connect.timeout";
    /// Request timeout override in milliseconds
    pub const REQUEST_TIMEOUT: &str = "http.request.timeout";
}

/// Lets a server answer a one-way request before processing finishes.
pub trait TransportBackChannel: Send + Sync {
    fn close(&self);
}

static PACKET_TABLE: LazyLock<PropertyTable<Packet>> = LazyLock::new(|| {
    PropertyTable::<Packet>::new()
        .with(
            keys::ENDPOINT_ADDRESS,
            |p| p.endpoint_address.clone().map(PropertyValue::Text),
            |p, v| {
                p.endpoint_address = text(keys::ENDPOINT_ADDRESS, v)?;
                Ok(())
            },
        )
        .with(
            keys::SOAP_ACTION,
            |p| p.soap_action.clone().map(PropertyValue::Text),
            |p, v| {
                p.soap_action = text(keys::SOAP_ACTION, v)?;
                Ok(())
            },
        )
        .with(
            keys::ACCEPT,
            |p| p.accept.clone().map(PropertyValue::Text),
            |p, v| {
                p.accept = text(keys::ACCEPT, v)?;
                Ok(())
            },
        )
        .with(
            keys::EXPECT_REPLY,
            |p| p.expect_reply.map(PropertyValue::Bool),
            |p, v| {
                p.expect_reply = boolean(keys::EXPECT_REPLY, v)?;
                Ok(())
            },
        )
        .with(
            keys::MTOM_ENABLED,
            |p| p.mtom_enabled.map(PropertyValue::Bool),
            |p, v| {
                p.mtom_enabled = boolean(keys::MTOM_ENABLED, v)?;
                Ok(())
            },
        )
        .with_read_only(keys::CONTENT_TYPE, |p| {
            p.content_type
                .as_ref()
                .map(|ct| PropertyValue::Text(ct.content_type.clone()))
        })
});

fn text(key: &str, v: Option<PropertyValue>) -> Result<Option<String>> {
    match v {
        None => Ok(None),
        Some(PropertyValue::Text(s)) => Ok(Some(s)),
        Some(_) => Err(SoapError::PropertyType {
            key: key.to_string(),
            expected: "text",
        }),
    }
}

fn boolean(key: &str, v: Option<PropertyValue>) -> Result<Option<bool>> {
    match v {
        None => Ok(None),
        Some(PropertyValue::Bool(b)) => Ok(Some(b)),
        Some(_) => Err(SoapError::PropertyType {
            key: key.to_string(),
            expected: "bool",
        }),
    }
}

/// Unit of work flowing through a tubeline.
#[derive(Default)]
pub struct Packet {
    message: Option<Box<dyn Message>>,
    pub endpoint_address: Option<String>,
    pub soap_action: Option<String>,
    pub accept: Option<String>,
    /// `Some(false)` marks a one-way exchange
    pub expect_reply: Option<bool>,
    pub mtom_enabled: Option<bool>,
    /// Content type computed by the codec for this packet
    pub content_type: Option<ContentType>,
    pub back_channel: Option<Arc<dyn TransportBackChannel>>,
    /// Set on packets that belong to a server-side exchange
    pub server_side: bool,
    /// Request/response scoped ad-hoc properties
    pub invocation_properties: BTreeMap<String, PropertyValue>,
    /// Typed extensions contributed by other layers
    pub satellites: DistributedPropertySet,
}

impl Packet {
    pub fn new(message: Option<Box<dyn Message>>) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }

    pub fn message(&self) -> Option<&dyn Message> {
        self.message.as_deref()
    }

    pub fn message_mut(&mut self) -> Option<&mut (dyn Message + 'static)> {
        self.message.as_deref_mut()
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    /// Replace the message; the cached content type no longer applies.
    pub fn set_message(&mut self, message: Option<Box<dyn Message>>) {
        self.message = message;
        self.content_type = None;
    }

    pub fn take_message(&mut self) -> Option<Box<dyn Message>> {
        self.content_type = None;
        self.message.take()
    }

    /// True unless the exchange is one-way.
    pub fn expects_reply(&self) -> bool {
        self.expect_reply.unwrap_or(true)
    }

    /// Look a property up: packet fields, then satellites in registration
    /// order, then invocation properties.
    pub fn get(&self, key: &str) -> Result<Option<PropertyValue>> {
        if let Some(v) = PACKET_TABLE.get(self, key) {
            return Ok(v);
        }
        if let Some(s) = self.satellites.find(key) {
            return s.get(key);
        }
        Ok(self.invocation_properties.get(key).cloned())
    }

    pub fn put(&mut self, key: &str, value: impl Into<PropertyValue>) -> Result<Option<PropertyValue>> {
        let value = value.into();
        if let Some(r) = PACKET_TABLE.put(self, key, Some(value.clone())) {
            return r;
        }
        if let Some(s) = self.satellites.find_mut(key) {
            return s.put(key, value);
        }
        Ok(self.invocation_properties.insert(key.to_string(), value))
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<PropertyValue>> {
        if let Some(r) = PACKET_TABLE.put(self, key, None) {
            return r;
        }
        if let Some(s) = self.satellites.find_mut(key) {
            return s.remove(key);
        }
        Ok(self.invocation_properties.remove(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.get(key), Ok(Some(_)))
    }

    /// Every key with a value.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = PACKET_TABLE
            .names()
            .filter(|k| matches!(PACKET_TABLE.get(self, k), Some(Some(_))))
            .map(String::from)
            .collect();
        for k in self.satellites.keys() {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        for k in self.invocation_properties.keys() {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }
        keys
    }

    pub fn add_satellite<S: PropertySet>(&mut self, satellite: S) {
        self.satellites.add_satellite(satellite);
    }

    pub fn satellite<S: PropertySet>(&self) -> Option<&S> {
        self.satellites.satellite::<S>()
    }

    pub fn satellite_mut<S: PropertySet>(&mut self) -> Option<&mut S> {
        self.satellites.satellite_mut::<S>()
    }

    pub fn remove_satellite<S: PropertySet>(&mut self) -> bool {
        self.satellites.remove_satellite::<S>()
    }

    /// Text-valued invocation property.
    pub fn property_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(String::from))
    }

    pub fn property_bool(&self, key: &str) -> Option<bool> {
        self.get(key).ok().flatten().and_then(|v| v.as_bool())
    }

    pub fn property_int(&self, key: &str) -> Option<i64> {
        self.get(key).ok().flatten().and_then(|v| v.as_int())
    }

    /// Response packet for a client exchange: same endpoint and properties,
    /// new message.
    pub fn create_client_response(&self, message: Option<Box<dyn Message>>) -> Packet {
        Packet {
            message,
            endpoint_address: self.endpoint_address.clone(),
            soap_action: self.soap_action.clone(),
            accept: None,
            expect_reply: self.expect_reply,
            mtom_enabled: self.mtom_enabled,
            content_type: None,
            back_channel: None,
            server_side: false,
            invocation_properties: self.invocation_properties.clone(),
            satellites: self.satellites.clone(),
        }
    }

    /// Response packet for a server exchange. Keeps the invocation
    /// properties (so the decoded charset and the request's `Accept` reach
    /// the response encoder).
    pub fn create_server_response(&self, message: Option<Box<dyn Message>>) -> Packet {
        Packet {
            message,
            endpoint_address: self.endpoint_address.clone(),
            soap_action: self.soap_action.clone(),
            accept: self.accept.clone(),
            expect_reply: self.expect_reply,
            mtom_enabled: self.mtom_enabled,
            content_type: None,
            back_channel: self.back_channel.clone(),
            server_side: true,
            invocation_properties: self.invocation_properties.clone(),
            satellites: self.satellites.clone(),
        }
    }

    /// Independent copy; the message is copied only when `copy_message`.
    pub fn copy(&self, copy_message: bool) -> Result<Packet> {
        let message = match (&self.message, copy_message) {
            (Some(m), true) => Some(m.copy()?),
            _ => None,
        };
        Ok(Packet {
            message,
            endpoint_address: self.endpoint_address.clone(),
            soap_action: self.soap_action.clone(),
            accept: self.accept.clone(),
            expect_reply: self.expect_reply,
            mtom_enabled: self.mtom_enabled,
            content_type: self.content_type.clone(),
            back_channel: self.back_channel.clone(),
            server_side: self.server_side,
            invocation_properties: self.invocation_properties.clone(),
            satellites: self.satellites.clone(),
        })
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("message", &self.message)
            .field("endpoint_address", &self.endpoint_address)
            .field("soap_action", &self.soap_action)
            .field("expect_reply", &self.expect_reply)
            .field("server_side", &self.server_side)
            .field("properties", &self.invocation_properties.len())
            .field("satellites", &self.satellites.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoapVersion;
    use crate::message::EmptyMessage;
    use crate::property::TypedPropertySet;

    #[derive(Clone, Default)]
    struct Security {
        principal: Option<String>,
    }

    static SECURITY_TABLE: LazyLock<PropertyTable<Security>> = LazyLock::new(|| {
        PropertyTable::<Security>::new().with(
            "security.principal",
            |s| s.principal.clone().map(PropertyValue::Text),
            |s, v| {
                s.principal = v.and_then(|v| v.as_str().map(String::from));
                Ok(())
            },
        )
    });

    impl TypedPropertySet for Security {
        fn table() -> &'static PropertyTable<Self> {
            &SECURITY_TABLE
        }
    }

    #[test]
    fn test_field_and_map_views_agree() {
        let mut p = Packet::new(None);
        p.put(keys::SOAP_ACTION, "urn:add").unwrap();
        assert_eq!(p.soap_action.as_deref(), Some("urn:add"));

        p.endpoint_address = Some("http://example.org/svc".to_string());
        assert_eq!(
            p.property_str(keys::ENDPOINT_ADDRESS).as_deref(),
            Some("http://example.org/svc")
        );

        p.remove(keys::SOAP_ACTION).unwrap();
        assert!(p.soap_action.is_none());
    }

    #[test]
    fn test_type_mismatch_and_read_only() {
        let mut p = Packet::new(None);
        assert!(matches!(
            p.put(keys::EXPECT_REPLY, "yes"),
            Err(SoapError::PropertyType { .. })
        ));
        assert!(matches!(
            p.put(keys::CONTENT_TYPE, "text/xml"),
            Err(SoapError::ReadOnlyProperty(_))
        ));
    }

    #[test]
    fn test_satellite_before_invocation_properties() {
        let mut p = Packet::new(None);
        p.invocation_properties.insert(
            "security.principal".to_string(),
            PropertyValue::Text("local".to_string()),
        );
        p.add_satellite(Security {
            principal: Some("satellite".to_string()),
        });
        assert_eq!(
            p.property_str("security.principal").as_deref(),
            Some("satellite")
        );
        assert!(p.remove_satellite::<Security>());
        assert_eq!(p.property_str("security.principal").as_deref(), Some("local"));
    }

    #[test]
    fn test_ad_hoc_properties_are_extensible() {
        let mut p = Packet::new(None);
        p.put("custom.flag", true).unwrap();
        assert_eq!(p.property_bool("custom.flag"), Some(true));
        assert!(p.keys().contains(&"custom.flag".to_string()));
    }

    #[test]
    fn test_server_response_keeps_decoded_charset() {
        let mut req = Packet::new(Some(Box::new(EmptyMessage::new(Some(SoapVersion::Soap11)))));
        req.put(keys::DECODED_CHARSET, "UTF-16").unwrap();
        let resp = req.create_server_response(None);
        assert_eq!(resp.property_str(keys::DECODED_CHARSET).as_deref(), Some("UTF-16"));
        assert!(!resp.has_message());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut p = Packet::new(Some(Box::new(EmptyMessage::new(Some(SoapVersion::Soap11)))));
        p.put("counter", 1i64).unwrap();
        let mut c = p.copy(true).unwrap();
        c.put("counter", 2i64).unwrap();
        assert_eq!(p.property_int("counter"), Some(1));
        assert!(c.has_message());
    }
}
