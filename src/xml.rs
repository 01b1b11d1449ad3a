//! Streaming XML writer and its pooled factory.

use crate::error::{Result, SoapError};
use crate::message::attachment::Attachment;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// XOP include namespace.
pub const XOP_NS: &str = "http://www.w3.org/2004/08/xop/include";

/// Namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace == namespace.unwrap_or("")
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// Collects binary parts written through an MTOM-enabled writer.
#[derive(Debug, Default)]
struct MtomSink {
    threshold: usize,
    parts: Vec<Attachment>,
}

/// StAX-style writer over quick-xml.
///
/// Start tags stay pending until content follows so namespace declarations
/// and attributes can be added after `start_element`.
pub struct XmlStreamWriter {
    writer: Writer<Vec<u8>>,
    pending: Option<BytesStart<'static>>,
    open: Vec<String>,
    scopes: Vec<Vec<(String, String)>>,
    mtom: Option<MtomSink>,
    factory_id: u64,
}

impl XmlStreamWriter {
    pub fn new() -> Self {
        Self::with_factory_id(0)
    }

    fn with_factory_id(factory_id: u64) -> Self {
        Self {
            writer: Writer::new(Vec::new()),
            pending: None,
            open: Vec::new(),
            scopes: Vec::new(),
            mtom: None,
            factory_id,
        }
    }

    /// Write the XML declaration naming `encoding`.
    pub fn start_document(&mut self, encoding: &str) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some(encoding), None)))
            .map_err(SoapError::xml)
    }

    /// Close every open element.
    pub fn end_document(&mut self) -> Result<()> {
        while !self.open.is_empty() {
            self.end_element()?;
        }
        Ok(())
    }

    /// Open an element, declaring `namespace` for `prefix` unless it is
    /// already bound to it in scope.
    pub fn start_element(&mut self, prefix: &str, local: &str, namespace: &str) -> Result<()> {
        self.flush_pending()?;
        let name = if prefix.is_empty() {
            local.to_string()
        } else {
            format!("{}:{}", prefix, local)
        };
        self.pending = Some(BytesStart::new(name.clone()));
        self.open.push(name);
        self.scopes.push(Vec::new());
        if self.lookup_prefix(prefix).unwrap_or("") != namespace {
            self.namespace(prefix, namespace)?;
        }
        Ok(())
    }

    /// Declare a namespace on the pending start tag.
    pub fn namespace(&mut self, prefix: &str, uri: &str) -> Result<()> {
        let start = self
            .pending
            .as_mut()
            .ok_or_else(|| SoapError::xml("namespace declared outside a start tag"))?;
        let attr = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        start.push_attribute((attr.as_str(), uri));
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((prefix.to_string(), uri.to_string()));
        }
        Ok(())
    }

    /// Add an attribute to the pending start tag.
    pub fn attribute(&mut self, name: &str, value: &str) -> Result<()> {
        let start = self
            .pending
            .as_mut()
            .ok_or_else(|| SoapError::xml("attribute written outside a start tag"))?;
        start.push_attribute((name, value));
        Ok(())
    }

    pub fn characters(&mut self, text: &str) -> Result<()> {
        self.flush_pending()?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(SoapError::xml)
    }

    pub fn end_element(&mut self) -> Result<()> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| SoapError::xml("end_element without open element"))?;
        self.scopes.pop();
        let result = match self.pending.take() {
            Some(start) => self.writer.write_event(Event::Empty(start)),
            None => self.writer.write_event(Event::End(BytesEnd::new(name))),
        };
        result.map_err(SoapError::xml)
    }

    /// Append an already serialized, well-formed fragment.
    pub fn write_raw(&mut self, xml: &[u8]) -> Result<()> {
        self.flush_pending()?;
        self.writer.get_mut().extend_from_slice(xml);
        Ok(())
    }

    /// Write binary content: an `xop:Include` reference to a new attachment
    /// when MTOM is on and the data reaches the threshold, base64 text
    /// otherwise.
    pub fn write_binary(&mut self, data: &[u8], content_type: &str) -> Result<()> {
        let optimize = self
            .mtom
            .as_ref()
            .is_some_and(|sink| data.len() >= sink.threshold);
        if !optimize {
            let text = base64::engine::general_purpose::STANDARD.encode(data);
            return self.characters(&text);
        }

        let content_id = format!("{}@soap-runtime", uuid::Uuid::new_v4());
        self.start_element("xop", "Include", XOP_NS)?;
        self.attribute("href", &format!("cid:{}", content_id))?;
        self.end_element()?;
        if let Some(sink) = self.mtom.as_mut() {
            sink.parts.push(Attachment::new(
                content_id,
                content_type,
                Bytes::copy_from_slice(data),
            ));
        }
        Ok(())
    }

    /// Turn on XOP optimization for binary content of at least `threshold` bytes.
    pub fn enable_mtom(&mut self, threshold: usize) {
        self.mtom = Some(MtomSink {
            threshold,
            parts: Vec::new(),
        });
    }

    pub fn is_mtom(&self) -> bool {
        self.mtom.is_some()
    }

    /// Attachments produced by `write_binary` so far.
    pub fn take_mtom_attachments(&mut self) -> Vec<Attachment> {
        self.mtom
            .as_mut()
            .map(|sink| std::mem::take(&mut sink.parts))
            .unwrap_or_default()
    }

    /// Namespace bound to `prefix` in the current scope.
    pub fn lookup_prefix(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.writer.get_ref()
    }

    /// Take the written bytes, leaving the writer empty.
    pub fn take_bytes(&mut self) -> Result<Vec<u8>> {
        self.flush_pending()?;
        Ok(std::mem::take(self.writer.get_mut()))
    }

    /// Return to a clean state for reuse.
    pub fn reset(&mut self) {
        self.writer.get_mut().clear();
        self.pending = None;
        self.open.clear();
        self.scopes.clear();
        self.mtom = None;
    }

    fn flush_pending(&mut self) -> Result<()> {
        if let Some(start) = self.pending.take() {
            self.writer
                .write_event(Event::Start(start))
                .map_err(SoapError::xml)?;
        }
        Ok(())
    }
}

impl Default for XmlStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for XmlStreamWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlStreamWriter")
            .field("depth", &self.open.len())
            .field("mtom", &self.mtom.is_some())
            .field("factory_id", &self.factory_id)
            .finish()
    }
}

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

/// Pool of reusable writers.
///
/// Constructed once by whoever assembles the runtime and handed to the codecs
/// that need it.
pub struct XmlWriterFactory {
    id: u64,
    capacity: usize,
    pool: Mutex<Vec<XmlStreamWriter>>,
}

impl XmlWriterFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            pool: Mutex::new(Vec::new()),
        }
    }

    pub fn create(&self) -> XmlStreamWriter {
        self.pool
            .lock()
            .pop()
            .unwrap_or_else(|| XmlStreamWriter::with_factory_id(self.id))
    }

    /// Return a writer to the pool. Writers from elsewhere are dropped.
    pub fn recycle(&self, mut writer: XmlStreamWriter) {
        if writer.factory_id != self.id {
            debug!(
                factory_id = self.id,
                writer_factory_id = writer.factory_id,
                "Ignoring foreign writer on recycle"
            );
            return;
        }
        writer.reset();
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push(writer);
        }
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Default for XmlWriterFactory {
    fn default() -> Self {
        Self::new(16)
    }
}

impl fmt::Debug for XmlWriterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlWriterFactory")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish()
    }
}
