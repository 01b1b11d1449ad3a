//! SOAP/XML web-services runtime
//!
//! Moves SOAP 1.1, SOAP 1.2 and plain XML messages between a client and an
//! endpoint through a pipeline of tubes.
//!
//! # Features
//!
//! - Packets with typed property tables and satellites
//! - Stream, DOM, fault and SAAJ-style message variants
//! - SOAP, SOAP-with-attachments and MTOM/XOP codecs, plus XML/HTTP
//! - Tubelines driven by fibers, with suspend/resume for async endpoints
//! - Handler, mustUnderstand, validation and dump tubes
//! - HTTP (reqwest) and in-process transports; an axum server adapter
//!
//! # Example
//!
//! ```ignore
//! use soap_runtime::client::Stub;
//! use soap_runtime::config::RuntimeConfig;
//! use soap_runtime::message::DomMessage;
//! use soap_runtime::xml::XmlWriterFactory;
//! use std::sync::Arc;
//!
//! let config = Arc::new(RuntimeConfig::default());
//! let stub = Stub::http(config, "http://localhost:8080/soap", Arc::new(XmlWriterFactory::default()))?;
//! let request = DomMessage::from_xml(stub.version(), b"<m:ping xmlns:m=\"urn:m\"/>")?;
//! let response = stub.invoke(Box::new(request)).await?;
//! ```

pub mod charset;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod packet;
pub mod parser;
pub mod pipe;
pub mod property;
pub mod server;
pub mod transport;
pub mod tubes;
pub mod xml;

pub use client::Stub;
pub use config::{RuntimeConfig, SoapVersion};
pub use error::{Result, SoapError};
pub use packet::Packet;
