//! Attachments: (content-id, content-type, bytes) parts of a message.

use bytes::Bytes;
use std::io::Cursor;

/// A MIME part carried alongside the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    content_id: String,
    content_type: String,
    data: Bytes,
    mime_headers: Vec<(String, String)>,
}

impl Attachment {
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
            data: data.into(),
            mime_headers: Vec::new(),
        }
    }

    /// Attachment with a random content-id.
    pub fn with_generated_id(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(
            format!("{}@soap-runtime", uuid::Uuid::new_v4()),
            content_type,
            data,
        )
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stream view over the bytes.
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.data.clone())
    }

    /// Extra MIME headers written with the part (Content-Type and Content-Id
    /// are not repeated here).
    pub fn mime_headers(&self) -> &[(String, String)] {
        &self.mime_headers
    }

    pub fn add_mime_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.mime_headers.push((name.into(), value.into()));
    }

    /// True when `reference` (a bare id, `<id>` or `cid:id`) names this part.
    pub fn matches(&self, reference: &str) -> bool {
        normalize_content_id(&self.content_id) == normalize_content_id(reference)
    }
}

/// Strip angle brackets and a `cid:` scheme from a content-id reference.
pub fn normalize_content_id(reference: &str) -> &str {
    let trimmed = reference.trim();
    let trimmed = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);
    trimmed.strip_prefix("cid:").unwrap_or(trimmed)
}

/// Ordered attachments of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentSet {
    items: Vec<Attachment>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attachment, replacing any with the same content-id.
    pub fn add(&mut self, attachment: Attachment) {
        match self
            .items
            .iter_mut()
            .find(|a| a.matches(&attachment.content_id))
        {
            Some(existing) => *existing = attachment,
            None => self.items.push(attachment),
        }
    }

    pub fn get(&self, content_id: &str) -> Option<&Attachment> {
        self.items.iter().find(|a| a.matches(content_id))
    }

    pub fn remove(&mut self, content_id: &str) -> Option<Attachment> {
        let pos = self.items.iter().position(|a| a.matches(content_id))?;
        Some(self.items.remove(pos))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attachment> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> IntoIterator for &'a AttachmentSet {
    type Item = &'a Attachment;
    type IntoIter = std::slice::Iter<'a, Attachment>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Attachment> for AttachmentSet {
    fn from_iter<I: IntoIterator<Item = Attachment>>(iter: I) -> Self {
        let mut set = AttachmentSet::new();
        for a in iter {
            set.add(a);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_content_id_forms_match() {
        let a = Attachment::new("cid:att1", "application/octet-stream", vec![1u8, 2, 3]);
        assert!(a.matches("cid:att1"));
        assert!(a.matches("<cid:att1>"));
        assert!(a.matches("att1"));
        assert!(!a.matches("att2"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Attachment::with_generated_id("image/png", Bytes::new());
        let b = Attachment::with_generated_id("image/png", Bytes::new());
        assert_ne!(a.content_id(), b.content_id());
    }

    #[test]
    fn test_set_replaces_same_id() {
        let mut set = AttachmentSet::new();
        set.add(Attachment::new("a", "text/plain", "one"));
        set.add(Attachment::new("<a>", "text/plain", "two"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("cid:a").unwrap().data().as_ref(), b"two");
    }

    #[test]
    fn test_reader() {
        let a = Attachment::new("x", "text/plain", "hello");
        let mut s = String::new();
        a.reader().read_to_string(&mut s).unwrap();
        assert_eq!(s, "hello");
    }
}
