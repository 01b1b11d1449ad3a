//! Cross-cutting tubes assembled around the transport or the endpoint.

pub mod dump;
pub mod handler;
pub mod mu;
pub mod validation;

pub use dump::DumpTube;
pub use handler::{Handler, HandlerChain, HandlerTube};
pub use mu::{ClientMUTube, ServerMUTube, UnderstoodHeaders};
pub use validation::{MessageValidator, ValidationResult, ValidationTube, Violation, ViolationCode};
