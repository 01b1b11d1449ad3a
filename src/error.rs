//! Error types for the SOAP runtime.

use crate::message::fault::SoapFault;
use thiserror::Error;

/// SOAP runtime errors.
///
/// Protocol errors (`VersionMismatch`, `UnsupportedMedia`,
/// `UnsupportedCharset`) are raised by codecs before any payload parsing so
/// callers can tell "wrong protocol" apart from "malformed message".
#[derive(Error, Debug)]
pub enum SoapError {
    #[error("HTTP transport error: {status} {message}")]
    Transport { status: u16, message: String },

    #[error("transport failure: {0}")]
    Connection(String),

    #[error("SOAP version mismatch: expected envelope namespace {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("unsupported content type '{content_type}', expected one of {expected:?}")]
    UnsupportedMedia {
        content_type: String,
        expected: Vec<String>,
    },

    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),

    #[error("MIME multipart error: {0}")]
    Mime(String),

    #[error("undefined property {0}")]
    UndefinedProperty(String),

    #[error("property {0} is read-only")]
    ReadOnlyProperty(String),

    #[error("property {key} expects a {expected} value")]
    PropertyType { key: String, expected: &'static str },

    #[error("message has already been consumed")]
    MessageConsumed,

    #[error("content negotiation violated: {0}")]
    ContentNegotiation(String),

    #[error("SOAP fault: {0}")]
    Fault(Box<SoapFault>),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error classification used for logging and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Disallowed HTTP status or HTML error page
    TransportStatus,
    /// Connection could not be established or timed out
    TransportFailure,
    /// Envelope namespace does not match the binding
    VersionMismatch,
    /// Content type not accepted by the codec
    UnsupportedMedia,
    /// Charset cannot be decoded
    UnsupportedCharset,
    /// Malformed XML
    MalformedXml,
    /// Well-formed XML but not a SOAP envelope
    InvalidEnvelope,
    /// Broken MIME framing
    MalformedMime,
    /// Property bag misuse
    Property,
    /// Single-read message read twice
    MessageConsumed,
    /// Fast Infoset negotiation mismatch
    ContentNegotiation,
    /// SOAP fault returned by the peer or produced by a tube
    Fault,
    /// Pipeline driver error
    Pipeline,
    /// Invalid configuration
    Config,
    /// IO error
    Io,
}

impl ErrorKind {
    /// Get the string code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportStatus => "TRANSPORT_STATUS",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::UnsupportedMedia => "UNSUPPORTED_MEDIA",
            Self::UnsupportedCharset => "UNSUPPORTED_CHARSET",
            Self::MalformedXml => "MALFORMED_XML",
            Self::InvalidEnvelope => "INVALID_ENVELOPE",
            Self::MalformedMime => "MALFORMED_MIME",
            Self::Property => "PROPERTY",
            Self::MessageConsumed => "MESSAGE_CONSUMED",
            Self::ContentNegotiation => "CONTENT_NEGOTIATION",
            Self::Fault => "FAULT",
            Self::Pipeline => "PIPELINE",
            Self::Config => "CONFIG",
            Self::Io => "IO",
        }
    }
}

impl SoapError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::TransportStatus,
            Self::Connection(_) => ErrorKind::TransportFailure,
            Self::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Self::UnsupportedMedia { .. } => ErrorKind::UnsupportedMedia,
            Self::UnsupportedCharset(_) => ErrorKind::UnsupportedCharset,
            Self::XmlParse(_) => ErrorKind::MalformedXml,
            Self::InvalidEnvelope(_) => ErrorKind::InvalidEnvelope,
            Self::Mime(_) => ErrorKind::MalformedMime,
            Self::UndefinedProperty(_) | Self::ReadOnlyProperty(_) | Self::PropertyType { .. } => {
                ErrorKind::Property
            }
            Self::MessageConsumed => ErrorKind::MessageConsumed,
            Self::ContentNegotiation(_) => ErrorKind::ContentNegotiation,
            Self::Fault(_) => ErrorKind::Fault,
            Self::Pipeline(_) => ErrorKind::Pipeline,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// True for errors a codec raises before looking at the payload.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::VersionMismatch | ErrorKind::UnsupportedMedia | ErrorKind::UnsupportedCharset
        )
    }

    /// Shorthand for an XML parse error from any displayable cause.
    pub(crate) fn xml(e: impl std::fmt::Display) -> Self {
        Self::XmlParse(e.to_string())
    }

    /// Rebuild an equivalent error. Used when one failure has to be reported
    /// to more than one party (completion channels, logging).
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Transport { status, message } => Self::Transport {
                status: *status,
                message: message.clone(),
            },
            Self::Connection(m) => Self::Connection(m.clone()),
            Self::VersionMismatch { expected, actual } => Self::VersionMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::UnsupportedMedia {
                content_type,
                expected,
            } => Self::UnsupportedMedia {
                content_type: content_type.clone(),
                expected: expected.clone(),
            },
            Self::UnsupportedCharset(c) => Self::UnsupportedCharset(c.clone()),
            Self::XmlParse(m) => Self::XmlParse(m.clone()),
            Self::InvalidEnvelope(m) => Self::InvalidEnvelope(m.clone()),
            Self::Mime(m) => Self::Mime(m.clone()),
            Self::UndefinedProperty(k) => Self::UndefinedProperty(k.clone()),
            Self::ReadOnlyProperty(k) => Self::ReadOnlyProperty(k.clone()),
            Self::PropertyType { key, expected } => Self::PropertyType {
                key: key.clone(),
                expected,
            },
            Self::MessageConsumed => Self::MessageConsumed,
            Self::ContentNegotiation(m) => Self::ContentNegotiation(m.clone()),
            Self::Fault(f) => Self::Fault(f.clone()),
            Self::Pipeline(m) => Self::Pipeline(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, SoapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::VersionMismatch.as_str(), "VERSION_MISMATCH");
        assert_eq!(ErrorKind::UnsupportedMedia.as_str(), "UNSUPPORTED_MEDIA");
    }

    #[test]
    fn test_protocol_errors_are_distinct() {
        let media = SoapError::UnsupportedMedia {
            content_type: "image/png".to_string(),
            expected: vec!["text/xml".to_string()],
        };
        assert!(media.is_protocol_error());
        assert!(!SoapError::XmlParse("eof".to_string()).is_protocol_error());
        assert!(SoapError::UnsupportedCharset("koi8-r".to_string()).is_protocol_error());
    }

    #[test]
    fn test_duplicate_keeps_kind() {
        let e = SoapError::Transport {
            status: 404,
            message: "Not Found".to_string(),
        };
        let d = e.duplicate();
        assert_eq!(d.kind(), ErrorKind::TransportStatus);
        assert_eq!(d.to_string(), e.to_string());
    }
}
