//! Property values, provenance flags and the ordered value store.

use crate::element::Element;
use crate::error::EngineError;
use crate::host::HostContext;
use indexmap::IndexMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Where a value came from: file and 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub file: String,
    pub line: usize,
}

impl SourceInfo {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}", self.file, self.line)
    }
}

/// Provenance flags carried by every stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueFlags(u8);

impl ValueFlags {
    pub const NONE: ValueFlags = ValueFlags(0);
    pub const MODIFIED: ValueFlags = ValueFlags(1);
    pub const INHERITED: ValueFlags = ValueFlags(1 << 1);
    pub const LOCKED: ValueFlags = ValueFlags(1 << 2);
    pub const XML_PARENT_INHERITED: ValueFlags = ValueFlags(1 << 3);

    pub fn contains(self, other: ValueFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ValueFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ValueFlags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ValueFlags {
    type Output = ValueFlags;

    fn bitor(self, rhs: ValueFlags) -> ValueFlags {
        ValueFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValueFlags {
    fn bitor_assign(&mut self, rhs: ValueFlags) {
        self.0 |= rhs.0;
    }
}

/// Type of a simple (non-element) property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Boolean,
}

impl ScalarKind {
    /// Convert document text into a typed value.
    pub fn parse(self, text: &str) -> Result<ScalarValue, String> {
        match self {
            ScalarKind::String => Ok(ScalarValue::String(text.to_string())),
            ScalarKind::Integer => text
                .trim()
                .parse::<i64>()
                .map(ScalarValue::Integer)
                .map_err(|e| format!("'{}' is not a valid integer: {}", text, e)),
            ScalarKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(ScalarValue::Boolean(true)),
                "false" => Ok(ScalarValue::Boolean(false)),
                _ => Err(format!("'{}' is not a valid boolean", text)),
            },
        }
    }

    pub fn accepts(self, value: &ScalarValue) -> bool {
        matches!(
            (self, value),
            (ScalarKind::String, ScalarValue::String(_))
                | (ScalarKind::Integer, ScalarValue::Integer(_))
                | (ScalarKind::Boolean, ScalarValue::Boolean(_))
        )
    }
}

/// A typed simple value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl ScalarValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ScalarValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::String(s) => f.write_str(s),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::String(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Integer(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Integer(value.into())
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

/// A raw document value that could not be parsed or validated.
///
/// The raw text is kept so that writing the node back reproduces it.
#[derive(Debug, Clone)]
pub struct InvalidValue {
    pub raw: String,
    pub error: EngineError,
}

/// What a value slot holds.
#[derive(Debug, Clone)]
pub enum StoredValue {
    Scalar(ScalarValue),
    /// Explicitly empty; distinct from an absent entry.
    Empty,
    Invalid(InvalidValue),
    Element(Box<Element>),
}

impl StoredValue {
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            StoredValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            StoredValue::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StoredValue::Empty)
    }
}

/// A stored value with its flags and source location.
#[derive(Debug, Clone)]
pub struct ConfigValue {
    pub value: StoredValue,
    pub flags: ValueFlags,
    pub source: Option<SourceInfo>,
}

/// Ordered map from property name to [`ConfigValue`].
///
/// Locks are not enforced here; the owning element checks them first.
#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    entries: IndexMap<String, ConfigValue>,
    context: Option<HostContext>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&StoredValue> {
        self.entries.get(name).map(|v| &v.value)
    }

    /// Overwrite `name`, keeping its position if already present.
    pub fn set(
        &mut self,
        name: &str,
        mut value: StoredValue,
        flags: ValueFlags,
        source: Option<SourceInfo>,
    ) {
        if let (StoredValue::Element(child), Some(context)) = (&mut value, &self.context) {
            child.associate_context(Some(context.clone()));
        }
        self.entries.insert(
            name.to_string(),
            ConfigValue {
                value,
                flags,
                source,
            },
        );
    }

    /// Store a value set through the API: flagged modified, no source.
    pub fn set_modified(&mut self, name: &str, value: StoredValue) {
        self.set(name, value, ValueFlags::MODIFIED, None);
    }

    pub fn flags(&self, name: &str) -> ValueFlags {
        self.entries
            .get(name)
            .map(|v| v.flags)
            .unwrap_or(ValueFlags::NONE)
    }

    pub fn is_modified(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::MODIFIED)
    }

    pub fn is_inherited(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::INHERITED)
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::LOCKED)
    }

    pub fn source(&self, name: &str) -> Option<&SourceInfo> {
        self.entries.get(name).and_then(|v| v.source.as_ref())
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.value(name).and_then(StoredValue::as_element)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        match self.entries.get_mut(name).map(|v| &mut v.value) {
            Some(StoredValue::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Child elements in insertion order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, &Element)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.value.as_element().map(|e| (k.as_str(), e)))
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = (&str, &mut Element)> {
        self.entries.iter_mut().filter_map(|(k, v)| match &mut v.value {
            StoredValue::Element(e) => Some((k.as_str(), e.as_mut())),
            _ => None,
        })
    }

    pub fn invalid_values(&self) -> impl Iterator<Item = &InvalidValue> {
        self.entries.values().filter_map(|v| match &v.value {
            StoredValue::Invalid(invalid) => Some(invalid),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn context(&self) -> Option<&HostContext> {
        self.context.as_ref()
    }

    /// Associate a host context with this store and every child element in it.
    pub fn associate_context(&mut self, context: Option<HostContext>) {
        self.context = context.clone();
        for (_, child) in self.elements_mut() {
            child.associate_context(context.clone());
        }
    }
}
