//! Configuration types for the SOAP runtime.

use crate::parser::{
    SOAP_11_NS, SOAP_11_ROLE_NEXT, SOAP_12_NS, SOAP_12_ROLE_NEXT, SOAP_12_ROLE_ULTIMATE_RECEIVER,
};
use serde::{Deserialize, Serialize};

/// Main configuration for the SOAP runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Config version
    pub version: String,

    /// Binding settings (SOAP version, MTOM, charset, negotiation)
    pub binding: BindingConfig,

    /// HTTP client transport settings
    pub http: HttpConfig,

    /// Inbound message validation
    pub validation: ValidationConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            binding: BindingConfig::default(),
            http: HttpConfig::default(),
            validation: ValidationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| crate::SoapError::Config(e.to_string()))
    }
}

/// Binding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// SOAP version; absent means plain XML over HTTP
    pub soap_version: Option<SoapVersion>,

    /// MTOM settings
    pub mtom: MtomConfig,

    /// Pins the outbound charset (e.g. "UTF-16"); otherwise UTF-8, or the
    /// request's charset for server responses
    pub serialization_encoding: Option<String>,

    /// Fast Infoset content negotiation mode
    pub content_negotiation: ContentNegotiation,

    /// Extra roles the endpoint plays for mustUnderstand processing
    pub roles: Vec<String>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            soap_version: Some(SoapVersion::Soap11),
            mtom: MtomConfig::default(),
            serialization_encoding: None,
            content_negotiation: ContentNegotiation::None,
            roles: Vec::new(),
        }
    }
}

/// MTOM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtomConfig {
    /// Enable MTOM/XOP encoding of outbound messages
    pub enabled: bool,

    /// Binary data smaller than this is inlined as base64 (bytes)
    pub threshold: usize,
}

impl Default for MtomConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 1024,
        }
    }
}

/// Fast Infoset content negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentNegotiation {
    /// Never use or advertise Fast Infoset
    #[default]
    None,
    /// Advertise Fast Infoset and use it once the peer does
    Optimistic,
    /// Use Fast Infoset only when the peer asked for it
    Pessimistic,
}

impl ContentNegotiation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optimistic => "optimistic",
            Self::Pessimistic => "pessimistic",
        }
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace URI.
    pub fn ns_uri(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    /// MIME type of an envelope in this version.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Soap11 => "text/xml",
            Self::Soap12 => "application/soap+xml",
        }
    }

    /// Name of the header targeting attribute.
    pub fn role_attribute(&self) -> &'static str {
        match self {
            Self::Soap11 => "actor",
            Self::Soap12 => "role",
        }
    }

    /// Role assumed for a header that names none.
    pub fn implicit_role(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_ROLE_NEXT,
            Self::Soap12 => SOAP_12_ROLE_ULTIMATE_RECEIVER,
        }
    }

    /// Roles every node plays.
    pub fn implicit_roles(&self) -> &'static [&'static str] {
        match self {
            Self::Soap11 => &[SOAP_11_ROLE_NEXT],
            Self::Soap12 => &[SOAP_12_ROLE_NEXT, SOAP_12_ROLE_ULTIMATE_RECEIVER],
        }
    }

    /// Fault code local name for errors caused by the sender.
    pub fn sender_fault_code(&self) -> &'static str {
        match self {
            Self::Soap11 => "Client",
            Self::Soap12 => "Sender",
        }
    }

    /// Fault code local name for errors on the receiving side.
    pub fn receiver_fault_code(&self) -> &'static str {
        match self {
            Self::Soap11 => "Server",
            Self::Soap12 => "Receiver",
        }
    }

    pub fn from_ns_uri(ns: &str) -> Option<Self> {
        match ns {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap11 => "1.1",
            Self::Soap12 => "1.2",
        }
    }
}

/// HTTP client transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User-Agent sent when the caller did not set one
    pub user_agent: String,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Whole-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Remember cookies per endpoint and send them back
    pub session_maintain: bool,

    /// Gzip request bodies
    pub gzip_requests: bool,

    /// Send request bodies chunked as they are encoded instead of
    /// buffering them for a Content-Length
    pub streaming: bool,

    /// Log full request/response packets at debug level
    pub dump: bool,

    /// Maximum number of characters dumped per message
    pub dump_threshold: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("soap-runtime/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 60_000,
            session_maintain: false,
            gzip_requests: false,
            streaming: false,
            dump: false,
            dump_threshold: 4096,
        }
    }
}

/// Inbound message validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Enable the validation tube
    pub enabled: bool,

    /// Maximum nesting depth in the payload
    pub max_body_depth: u32,

    /// Maximum number of elements in the payload
    pub max_elements: u32,

    /// Maximum text content length per element
    pub max_text_length: usize,

    /// Block CDATA sections
    pub block_cdata: bool,

    /// Block comments in the payload
    pub block_comments: bool,

    /// Operation control
    pub operations: OperationsConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_body_depth: 20,
            max_elements: 1000,
            max_text_length: 65536, // 64KB
            block_cdata: false,
            block_comments: false,
            operations: OperationsConfig::default(),
        }
    }
}

/// Operation allow/deny control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Mode: allowlist or denylist
    pub mode: OperationMode,

    /// Payload element names or SOAP actions (supports glob patterns)
    pub actions: Vec<String>,

    /// Require a SOAP action on inbound requests
    pub require_soap_action: bool,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Allowlist,
            actions: Vec::new(),
            require_soap_action: false,
        }
    }
}

/// Operation control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Only allow listed operations
    #[default]
    Allowlist,
    /// Block listed operations
    Denylist,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen_address: String,

    /// Request path the endpoint is mounted on
    pub path: String,

    /// Maximum request body size (bytes)
    pub max_body_size: usize,

    /// Endpoint name used in logs
    pub endpoint_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            path: "/soap".to_string(),
            max_body_size: 1_048_576, // 1MB
            endpoint_name: "echo".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.binding.soap_version, Some(SoapVersion::Soap11));
        assert!(!config.binding.mtom.enabled);
        assert!(!config.validation.enabled);
        assert_eq!(config.server.path, "/soap");
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = RuntimeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.http.request_timeout_ms, config.http.request_timeout_ms);
        assert_eq!(parsed.binding.soap_version, config.binding.soap_version);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
version: "1"
binding:
  soap_version: "1.2"
  mtom:
    enabled: true
    threshold: 10
  serialization_encoding: "UTF-16"
  content_negotiation: optimistic
http:
  session_maintain: true
  gzip_requests: true
validation:
  enabled: true
  operations:
    mode: denylist
    actions:
      - "Delete*"
server:
  listen_address: "0.0.0.0:9000"
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.binding.soap_version, Some(SoapVersion::Soap12));
        assert!(config.binding.mtom.enabled);
        assert_eq!(config.binding.mtom.threshold, 10);
        assert_eq!(config.binding.serialization_encoding.as_deref(), Some("UTF-16"));
        assert_eq!(config.binding.content_negotiation, ContentNegotiation::Optimistic);
        assert!(config.http.session_maintain);
        assert_eq!(config.validation.operations.mode, OperationMode::Denylist);
        assert_eq!(config.server.listen_address, "0.0.0.0:9000");
        // untouched sections keep defaults
        assert_eq!(config.server.path, "/soap");
    }

    #[test]
    fn test_xml_http_binding_from_yaml() {
        let yaml = r#"
binding:
  soap_version: null
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert!(config.binding.soap_version.is_none());
    }

    #[test]
    fn test_version_constants() {
        assert_eq!(SoapVersion::Soap11.content_type(), "text/xml");
        assert_eq!(SoapVersion::Soap12.content_type(), "application/soap+xml");
        assert_eq!(SoapVersion::Soap12.role_attribute(), "role");
        assert_eq!(SoapVersion::Soap11.sender_fault_code(), "Client");
        assert_eq!(
            SoapVersion::from_ns_uri("http://www.w3.org/2003/05/soap-envelope"),
            Some(SoapVersion::Soap12)
        );
    }
}
