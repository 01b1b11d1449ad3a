//! Inbound message validation.

use crate::config::{OperationMode, SoapVersion, ValidationConfig};
use crate::error::{Result, SoapError};
use crate::message::{FaultMessage, SoapFault};
use crate::packet::Packet;
use crate::parser::{analyze_body, BodyAnalysis};
use crate::pipe::{NextAction, Tube, TubeCloner};
use crate::xml::XmlStreamWriter;
use async_trait::async_trait;
use glob::Pattern;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validation violation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationCode {
    /// SOAP action required but absent
    MissingSoapAction,
    /// Operation not allowed by the allow/deny list
    OperationNotAllowed,
    /// Payload nested too deeply
    BodyDepthExceeded,
    /// Too many payload elements
    TooManyElements,
    /// Text content too long
    TextTooLong,
    /// CDATA section found
    CdataNotAllowed,
    /// Comment found
    CommentNotAllowed,
}

impl ViolationCode {
    /// Get the string code for this violation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSoapAction => "MISSING_SOAP_ACTION",
            Self::OperationNotAllowed => "OPERATION_NOT_ALLOWED",
            Self::BodyDepthExceeded => "BODY_DEPTH_EXCEEDED",
            Self::TooManyElements => "TOO_MANY_ELEMENTS",
            Self::TextTooLong => "TEXT_TOO_LONG",
            Self::CdataNotAllowed => "CDATA_NOT_ALLOWED",
            Self::CommentNotAllowed => "COMMENT_NOT_ALLOWED",
        }
    }
}

/// A single validation violation.
#[derive(Debug, Clone)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

/// Result of validating one message.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Violations found
    pub violations: Vec<Violation>,
    /// Operation checked against the allow/deny list
    pub operation: Option<String>,
    /// Payload measurements
    pub analysis: BodyAnalysis,
}

impl ValidationResult {
    /// Check if any violations were found.
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Add a violation.
    pub fn add_violation(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// All violation messages joined for a fault reason.
    pub fn reason(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Checks payload limits and operation control.
pub struct MessageValidator {
    config: ValidationConfig,
    /// Compiled operation patterns (for allowlist/denylist)
    operation_patterns: Vec<Pattern>,
}

impl MessageValidator {
    pub fn new(config: ValidationConfig) -> Self {
        let operation_patterns = config
            .operations
            .actions
            .iter()
            .filter_map(|pattern| match Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid operation pattern");
                    None
                }
            })
            .collect();

        Self {
            config,
            operation_patterns,
        }
    }

    /// Validate the packet's message and SOAP action.
    pub fn validate_packet(&self, packet: &Packet) -> Result<ValidationResult> {
        let (operation, payload) = match packet.message() {
            Some(m) => {
                let operation = m.payload_local_part().map(String::from);
                let payload = if m.has_payload() {
                    let mut copy = m.copy()?;
                    let mut w = XmlStreamWriter::new();
                    copy.write_payload_to(&mut w)?;
                    Some(w.take_bytes()?)
                } else {
                    None
                };
                (operation, payload)
            }
            None => (None, None),
        };
        let action = packet.soap_action.as_deref().filter(|a| !a.is_empty());
        self.validate(operation.as_deref(), payload.as_deref(), action)
    }

    /// Validate a payload fragment and the request's SOAP action.
    pub fn validate(
        &self,
        operation: Option<&str>,
        payload: Option<&[u8]>,
        soap_action: Option<&str>,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult {
            operation: operation.or(soap_action).map(String::from),
            ..Default::default()
        };

        self.validate_operations(operation, soap_action, &mut result);

        if let Some(xml) = payload {
            result.analysis = analyze_body(xml)?;
            self.validate_body(&mut result);
        }

        Ok(result)
    }

    fn validate_operations(
        &self,
        operation: Option<&str>,
        soap_action: Option<&str>,
        result: &mut ValidationResult,
    ) {
        let config = &self.config.operations;

        if config.require_soap_action && soap_action.is_none() {
            result.add_violation(Violation::new(
                ViolationCode::MissingSoapAction,
                "SOAP action is required but not present",
            ));
            return;
        }

        let operation = operation.or(soap_action).unwrap_or("");
        if operation.is_empty() {
            return;
        }

        let matches_pattern = self.operation_patterns.iter().any(|p| p.matches(operation))
            || soap_action.is_some_and(|a| self.operation_patterns.iter().any(|p| p.matches(a)));

        let allowed = match config.mode {
            // No patterns = allow all
            OperationMode::Allowlist => self.operation_patterns.is_empty() || matches_pattern,
            OperationMode::Denylist => !matches_pattern,
        };

        if !allowed {
            result.add_violation(Violation::new(
                ViolationCode::OperationNotAllowed,
                format!("Operation '{}' is not allowed", operation),
            ));
        }
    }

    fn validate_body(&self, result: &mut ValidationResult) {
        let config = &self.config;
        let analysis = result.analysis.clone();

        if analysis.max_depth > config.max_body_depth {
            result.add_violation(Violation::new(
                ViolationCode::BodyDepthExceeded,
                format!(
                    "SOAP Body nesting depth {} exceeds maximum {}",
                    analysis.max_depth, config.max_body_depth
                ),
            ));
        }

        if analysis.element_count > config.max_elements {
            result.add_violation(Violation::new(
                ViolationCode::TooManyElements,
                format!(
                    "SOAP Body contains {} elements, maximum is {}",
                    analysis.element_count, config.max_elements
                ),
            ));
        }

        if analysis.max_text_length > config.max_text_length {
            result.add_violation(Violation::new(
                ViolationCode::TextTooLong,
                format!(
                    "Text content length {} exceeds maximum {}",
                    analysis.max_text_length, config.max_text_length
                ),
            ));
        }

        if config.block_cdata && analysis.has_cdata {
            result.add_violation(Violation::new(
                ViolationCode::CdataNotAllowed,
                "CDATA sections are not allowed",
            ));
        }

        if config.block_comments && analysis.has_comments {
            result.add_violation(Violation::new(
                ViolationCode::CommentNotAllowed,
                "XML comments are not allowed in SOAP Body",
            ));
        }
    }
}

/// Validates inbound messages: requests on a server, responses on a client.
///
/// A rejected server request is answered with a Sender fault; a rejected
/// client response fails the call.
#[derive(Clone)]
pub struct ValidationTube {
    validator: Arc<MessageValidator>,
    version: Option<SoapVersion>,
    server: bool,
}

impl ValidationTube {
    pub fn new(validator: Arc<MessageValidator>, version: Option<SoapVersion>, server: bool) -> Self {
        Self {
            validator,
            version,
            server,
        }
    }

    fn check(&self, packet: &Packet) -> std::result::Result<(), SoapFault> {
        let version = self.version.unwrap_or(SoapVersion::Soap11);
        let result = self
            .validator
            .validate_packet(packet)
            .map_err(|e| SoapFault::sender(version, e.to_string()))?;
        debug!(
            operation = ?result.operation,
            depth = result.analysis.max_depth,
            elements = result.analysis.element_count,
            violations = result.violations.len(),
            "Message validated"
        );
        if !result.has_violations() {
            return Ok(());
        }
        for v in &result.violations {
            warn!(code = v.code.as_str(), message = %v.message, "Validation violation");
        }
        Err(SoapFault::sender(version, result.reason()))
    }
}

#[async_trait]
impl Tube for ValidationTube {
    fn name(&self) -> &str {
        "validation"
    }

    async fn process_request(&mut self, packet: Packet) -> NextAction {
        if !self.server {
            return NextAction::Invoke(packet);
        }
        match (self.check(&packet), self.version) {
            (Ok(()), _) => NextAction::Invoke(packet),
            (Err(fault), Some(version)) => {
                let response = FaultMessage::new(version, fault);
                NextAction::Return(packet.create_server_response(Some(Box::new(response))))
            }
            (Err(fault), None) => NextAction::Throw(SoapError::InvalidEnvelope(fault.reason)),
        }
    }

    async fn process_response(&mut self, packet: Packet) -> NextAction {
        if self.server {
            return NextAction::Return(packet);
        }
        match self.check(&packet) {
            Ok(()) => NextAction::Return(packet),
            Err(fault) => NextAction::Throw(fault.into_error()),
        }
    }

    fn copy(&self, _cloner: &TubeCloner) -> Box<dyn Tube> {
        Box::new(self.clone())
    }
}
