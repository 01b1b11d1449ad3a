//! Messages backed by application objects and an external data binding.

use super::{AttachmentSet, HeaderList, Message, PayloadReader};
use crate::config::SoapVersion;
use crate::error::{Result, SoapError};
use crate::xml::{QName, XmlStreamWriter};
use bytes::Bytes;
use quick_xml::NsReader;
use std::any::Any;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use xmltree::Element;

/// Shared, type-erased application value.
pub type BoundValue = Arc<dyn Any + Send + Sync>;

/// Object/XML data binding supplied by the application.
pub trait BindingContext: Send + Sync {
    /// Element name `value` marshals to.
    fn element_name(&self, value: &BoundValue) -> Result<QName>;

    /// Write `value` as one payload element.
    fn marshal(&self, value: &BoundValue, w: &mut XmlStreamWriter) -> Result<()>;

    /// Build a value from a payload element.
    fn unmarshal(&self, payload: &Element) -> Result<BoundValue>;
}

/// Message whose payload is marshalled on demand.
#[derive(Clone)]
pub struct BoundMessage {
    version: Option<SoapVersion>,
    headers: HeaderList,
    attachments: AttachmentSet,
    name: QName,
    value: BoundValue,
    context: Arc<dyn BindingContext>,
}

impl BoundMessage {
    pub fn new(
        version: Option<SoapVersion>,
        value: BoundValue,
        context: Arc<dyn BindingContext>,
    ) -> Result<Self> {
        let name = context.element_name(&value)?;
        Ok(Self {
            version,
            headers: HeaderList::new(),
            attachments: AttachmentSet::new(),
            name,
            value,
            context,
        })
    }

    pub fn value(&self) -> &BoundValue {
        &self.value
    }

    fn marshal_bytes(&self) -> Result<Bytes> {
        let mut w = XmlStreamWriter::new();
        self.context.marshal(&self.value, &mut w)?;
        Ok(Bytes::from(w.take_bytes()?))
    }
}

/// Unmarshal the payload of any message through `context`.
pub fn read_payload_as<T: Any + Send + Sync>(
    msg: &mut dyn Message,
    context: &dyn BindingContext,
) -> Result<Option<Arc<T>>> {
    let payload = match msg.read_payload_as_source()? {
        Some(p) => p,
        None => return Ok(None),
    };
    context
        .unmarshal(&payload)?
        .downcast::<T>()
        .map(Some)
        .map_err(|_| SoapError::Pipeline("unmarshalled value has an unexpected type".to_string()))
}

impl fmt::Debug for BoundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMessage")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("headers", &self.headers.len())
            .finish()
    }
}

impl Message for BoundMessage {
    fn soap_version(&self) -> Option<SoapVersion> {
        self.version
    }

    fn headers(&self) -> &HeaderList {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderList {
        &mut self.headers
    }

    fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    fn attachments_mut(&mut self) -> &mut AttachmentSet {
        &mut self.attachments
    }

    fn payload_local_part(&self) -> Option<&str> {
        Some(&self.name.local)
    }

    fn payload_namespace_uri(&self) -> Option<&str> {
        Some(&self.name.namespace)
    }

    fn read_payload_as_source(&mut self) -> Result<Option<Element>> {
        let bytes = self.marshal_bytes()?;
        Element::parse(bytes.as_ref())
            .map(Some)
            .map_err(SoapError::xml)
    }

    fn read_payload(&mut self) -> Result<Option<PayloadReader>> {
        Ok(Some(NsReader::from_reader(Cursor::new(self.marshal_bytes()?))))
    }

    fn write_payload_to(&mut self, w: &mut XmlStreamWriter) -> Result<()> {
        self.context.marshal(&self.value, w)
    }

    fn copy(&self) -> Result<Box<dyn Message>> {
        Ok(Box::new(self.clone()))
    }
}
