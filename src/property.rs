//! Property sets: string-keyed views over typed fields.
//!
//! Every property set type declares a static [`PropertyTable`] mapping a
//! property name to accessor functions over its fields, so a write through
//! the map view is the same write as a direct field assignment. A
//! [`DistributedPropertySet`] composes independent sets ("satellites")
//! contributed by unrelated layers; lookups go to the first satellite that
//! supports the key.

use crate::error::{Result, SoapError};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;

/// A property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
    /// Multi-valued transport headers
    Headers(BTreeMap<String, Vec<String>>),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::Headers(h) => Some(h),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Headers(_) => "headers",
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<BTreeMap<String, Vec<String>>> for PropertyValue {
    fn from(v: BTreeMap<String, Vec<String>>) -> Self {
        Self::Headers(v)
    }
}

/// Getter over a typed field.
pub type Getter<T> = fn(&T) -> Option<PropertyValue>;

/// Setter over a typed field; `None` clears it.
pub type Setter<T> = fn(&mut T, Option<PropertyValue>) -> Result<()>;

/// Accessor pair for one property.
pub struct Accessor<T> {
    pub get: Getter<T>,
    /// `None` for read-only properties
    pub set: Option<Setter<T>>,
}

/// Compile-time declared property table of a concrete set type.
pub struct PropertyTable<T: 'static> {
    entries: BTreeMap<&'static str, Accessor<T>>,
}

impl<T: 'static> PropertyTable<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Declare a read-write property.
    pub fn with(mut self, name: &'static str, get: Getter<T>, set: Setter<T>) -> Self {
        self.entries.insert(
            name,
            Accessor {
                get,
                set: Some(set),
            },
        );
        self
    }

    /// Declare a read-only property.
    pub fn with_read_only(mut self, name: &'static str, get: Getter<T>) -> Self {
        self.entries.insert(name, Accessor { get, set: None });
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Read through the table; `None` when the key is not declared.
    pub fn get(&self, target: &T, key: &str) -> Option<Option<PropertyValue>> {
        self.entries.get(key).map(|a| (a.get)(target))
    }

    /// Write through the table; `None` when the key is not declared.
    pub fn put(
        &self,
        target: &mut T,
        key: &str,
        value: Option<PropertyValue>,
    ) -> Option<Result<Option<PropertyValue>>> {
        let accessor = self.entries.get(key)?;
        let Some(set) = accessor.set else {
            return Some(Err(SoapError::ReadOnlyProperty(key.to_string())));
        };
        let old = (accessor.get)(target);
        Some(set(target, value).map(|_| old))
    }
}

impl<T: 'static> Default for PropertyTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe property set.
pub trait PropertySet: Send + Sync + 'static {
    /// True when `key` is declared by this set (or held by an extensible set).
    fn supports(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Result<Option<PropertyValue>>;

    fn put(&mut self, key: &str, value: PropertyValue) -> Result<Option<PropertyValue>>;

    fn remove(&mut self, key: &str) -> Result<Option<PropertyValue>>;

    fn keys(&self) -> Vec<String>;

    fn clone_box(&self) -> Box<dyn PropertySet>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn as_distributed(&self) -> Option<&DistributedPropertySet> {
        None
    }

    fn as_distributed_mut(&mut self) -> Option<&mut DistributedPropertySet> {
        None
    }
}

/// A property set backed by a static table, optionally extensible with
/// ad-hoc keys.
pub trait TypedPropertySet: Clone + Send + Sync + 'static {
    fn table() -> &'static PropertyTable<Self>;

    /// Ad-hoc storage; `None` makes the set non-extensible.
    fn extension(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        None
    }

    fn extension_mut(&mut self) -> Option<&mut BTreeMap<String, PropertyValue>> {
        None
    }
}

impl<T: TypedPropertySet> PropertySet for T {
    fn supports(&self, key: &str) -> bool {
        Self::table().contains(key) || self.extension().is_some_and(|m| m.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<PropertyValue>> {
        if let Some(v) = Self::table().get(self, key) {
            return Ok(v);
        }
        match self.extension() {
            Some(map) => Ok(map.get(key).cloned()),
            None => Err(SoapError::UndefinedProperty(key.to_string())),
        }
    }

    fn put(&mut self, key: &str, value: PropertyValue) -> Result<Option<PropertyValue>> {
        if let Some(r) = Self::table().put(self, key, Some(value.clone())) {
            return r;
        }
        match self.extension_mut() {
            Some(map) => Ok(map.insert(key.to_string(), value)),
            None => Err(SoapError::UndefinedProperty(key.to_string())),
        }
    }

    fn remove(&mut self, key: &str) -> Result<Option<PropertyValue>> {
        if let Some(r) = Self::table().put(self, key, None) {
            return r;
        }
        match self.extension_mut() {
            Some(map) => Ok(map.remove(key)),
            None => Err(SoapError::UndefinedProperty(key.to_string())),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Self::table()
            .names()
            .filter(|k| matches!(Self::table().get(self, k), Some(Some(_))))
            .map(String::from)
            .collect();
        if let Some(map) = self.extension() {
            keys.extend(map.keys().cloned());
        }
        keys
    }

    fn clone_box(&self) -> Box<dyn PropertySet> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Ordered composition of satellite property sets.
///
/// Satellites are keyed by their concrete type; adding a second satellite of
/// the same type replaces the first in place.
#[derive(Default)]
pub struct DistributedPropertySet {
    satellites: Vec<(TypeId, Box<dyn PropertySet>)>,
}

impl DistributedPropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_satellite<S: PropertySet>(&mut self, satellite: S) {
        self.add_boxed(TypeId::of::<S>(), Box::new(satellite));
    }

    fn add_boxed(&mut self, type_id: TypeId, satellite: Box<dyn PropertySet>) {
        if let Some(slot) = self.satellites.iter_mut().find(|(t, _)| *t == type_id) {
            slot.1 = satellite;
        } else {
            self.satellites.push((type_id, satellite));
        }
    }

    /// Remove the satellite of type `S`, returning whether one was present.
    pub fn remove_satellite<S: PropertySet>(&mut self) -> bool {
        let before = self.satellites.len();
        self.satellites.retain(|(t, _)| *t != TypeId::of::<S>());
        before != self.satellites.len()
    }

    /// Find a satellite by type, searching nested distributed sets too.
    pub fn satellite<S: PropertySet>(&self) -> Option<&S> {
        for (_, s) in &self.satellites {
            if let Some(found) = s.as_any().downcast_ref::<S>() {
                return Some(found);
            }
            if let Some(found) = s.as_distributed().and_then(|d| d.satellite::<S>()) {
                return Some(found);
            }
        }
        None
    }

    pub fn satellite_mut<S: PropertySet>(&mut self) -> Option<&mut S> {
        for (type_id, s) in self.satellites.iter_mut() {
            if *type_id == TypeId::of::<S>() {
                return s.as_any_mut().downcast_mut::<S>();
            }
            if let Some(found) = s.as_distributed_mut().and_then(|d| d.satellite_mut::<S>()) {
                return Some(found);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.satellites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }

    /// The first satellite that supports `key`.
    pub fn find(&self, key: &str) -> Option<&dyn PropertySet> {
        self.satellites
            .iter()
            .map(|(_, s)| s.as_ref())
            .find(|s| s.supports(key))
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut Box<dyn PropertySet>> {
        self.satellites
            .iter_mut()
            .map(|(_, s)| s)
            .find(|s| s.supports(key))
    }
}

impl Clone for DistributedPropertySet {
    fn clone(&self) -> Self {
        Self {
            satellites: self
                .satellites
                .iter()
                .map(|(t, s)| (*t, s.clone_box()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for DistributedPropertySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedPropertySet")
            .field("satellites", &self.satellites.len())
            .finish()
    }
}

impl PropertySet for DistributedPropertySet {
    fn supports(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    fn get(&self, key: &str) -> Result<Option<PropertyValue>> {
        match self.find(key) {
            Some(s) => s.get(key),
            None => Err(SoapError::UndefinedProperty(key.to_string())),
        }
    }

    fn put(&mut self, key: &str, value: PropertyValue) -> Result<Option<PropertyValue>> {
        match self.find_mut(key) {
            Some(s) => s.put(key, value),
            None => Err(SoapError::UndefinedProperty(key.to_string())),
        }
    }

    fn remove(&mut self, key: &str) -> Result<Option<PropertyValue>> {
        match self.find_mut(key) {
            Some(s) => s.remove(key),
            None => Err(SoapError::UndefinedProperty(key.to_string())),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for (_, s) in &self.satellites {
            for k in s.keys() {
                if !keys.contains(&k) {
                    keys.push(k);
                }
            }
        }
        keys
    }

    fn clone_box(&self) -> Box<dyn PropertySet> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_distributed(&self) -> Option<&DistributedPropertySet> {
        Some(self)
    }

    fn as_distributed_mut(&mut self) -> Option<&mut DistributedPropertySet> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

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

    #[derive(Clone, Default)]
    struct Addressing {
        to: Option<String>,
        principal: Option<String>,
    }

    static ADDRESSING_TABLE: LazyLock<PropertyTable<Addressing>> = LazyLock::new(|| {
        PropertyTable::<Addressing>::new()
            .with(
                "addressing.to",
                |a| a.to.clone().map(PropertyValue::Text),
                |a, v| {
                    a.to = v.and_then(|v| v.as_str().map(String::from));
                    Ok(())
                },
            )
            .with_read_only("security.principal", |a| {
                a.principal.clone().map(PropertyValue::Text)
            })
    });

    impl TypedPropertySet for Addressing {
        fn table() -> &'static PropertyTable<Self> {
            &ADDRESSING_TABLE
        }
    }

    #[test]
    fn test_map_view_writes_field() {
        let mut s = Security::default();
        s.put("security.principal", "alice".into()).unwrap();
        assert_eq!(s.principal.as_deref(), Some("alice"));
        s.principal = Some("bob".to_string());
        assert_eq!(
            s.get("security.principal").unwrap(),
            Some(PropertyValue::Text("bob".to_string()))
        );
    }

    #[test]
    fn test_unknown_key_is_undefined() {
        let mut s = Security::default();
        assert!(matches!(s.get("nope"), Err(SoapError::UndefinedProperty(_))));
        assert!(matches!(
            s.put("nope", true.into()),
            Err(SoapError::UndefinedProperty(_))
        ));
        assert!(matches!(s.remove("nope"), Err(SoapError::UndefinedProperty(_))));
    }

    #[test]
    fn test_read_only_property() {
        let mut a = Addressing::default();
        assert!(matches!(
            a.put("security.principal", "x".into()),
            Err(SoapError::ReadOnlyProperty(_))
        ));
    }

    #[test]
    fn test_first_satellite_wins() {
        let mut set = DistributedPropertySet::new();
        set.add_satellite(Security {
            principal: Some("from-security".to_string()),
        });
        set.add_satellite(Addressing {
            to: None,
            principal: Some("from-addressing".to_string()),
        });
        assert_eq!(
            set.get("security.principal").unwrap(),
            Some(PropertyValue::Text("from-security".to_string()))
        );

        assert!(set.remove_satellite::<Security>());
        assert_eq!(
            set.get("security.principal").unwrap(),
            Some(PropertyValue::Text("from-addressing".to_string()))
        );
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut set = DistributedPropertySet::new();
        set.add_satellite(Security::default());
        set.add_satellite(Addressing::default());
        set.add_satellite(Security {
            principal: Some("new".to_string()),
        });
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.satellite::<Security>().unwrap().principal.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_nested_satellite_lookup() {
        let mut inner = DistributedPropertySet::new();
        inner.add_satellite(Addressing {
            to: Some("http://example.org".to_string()),
            principal: None,
        });
        let mut outer = DistributedPropertySet::new();
        outer.add_satellite(inner);

        assert_eq!(
            outer.satellite::<Addressing>().unwrap().to.as_deref(),
            Some("http://example.org")
        );
        outer.satellite_mut::<Addressing>().unwrap().to = None;
        assert!(outer.get("addressing.to").unwrap().is_none());
    }
}
