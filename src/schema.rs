//! Property descriptor tables.
//!
//! Each node type declares its properties once, up front, through
//! [`NodeSchema::builder`]. Schemas are immutable after `build()` and shared
//! between every element of that type through an `Arc`.

use crate::element::Element;
use crate::error::EngineError;
use crate::lock::is_lock_attribute_name;
use crate::value::{ScalarKind, ScalarValue};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Name of the property that holds a node's default collection.
pub const DEFAULT_COLLECTION_PROPERTY: &str = "";

/// Validates a simple property value.
pub trait Validator: Send + Sync + fmt::Debug {
    fn validate(&self, value: &ScalarValue) -> Result<(), String>;
}

/// Validates a whole element after it has been parsed.
pub trait ElementValidator: Send + Sync + fmt::Debug {
    fn validate(&self, element: &Element) -> Result<(), String>;
}

/// Per-type behavior hooks.
pub trait NodeHooks: Send + Sync + fmt::Debug {
    /// Called by `reset(None)` to seed schema defaults.
    fn initialize_default(&self, _element: &mut Element) -> Result<(), EngineError> {
        Ok(())
    }

    /// Supply a value for a required property that the document omitted.
    fn on_required_missing(&self, name: &str) -> Result<ScalarValue, EngineError> {
        Err(EngineError::required(name))
    }

    /// Return true to silently accept an attribute the schema does not know.
    fn accept_unrecognized_attribute(&self, _name: &str, _value: &str) -> bool {
        false
    }
}

/// Inclusive integer range.
#[derive(Debug, Clone)]
pub struct IntegerRange {
    pub min: i64,
    pub max: i64,
}

impl Validator for IntegerRange {
    fn validate(&self, value: &ScalarValue) -> Result<(), String> {
        match value {
            ScalarValue::Integer(i) if *i < self.min || *i > self.max => Err(format!(
                "The value must be inside the range {}-{}",
                self.min, self.max
            )),
            ScalarValue::Integer(_) => Ok(()),
            other => Err(format!("'{}' is not an integer", other)),
        }
    }
}

/// String length bounds.
#[derive(Debug, Clone)]
pub struct StringLength {
    pub min: usize,
    pub max: Option<usize>,
}

impl Validator for StringLength {
    fn validate(&self, value: &ScalarValue) -> Result<(), String> {
        let len = value.to_string().chars().count();
        if len < self.min {
            return Err(format!("The string must be at least {} characters long", self.min));
        }
        if let Some(max) = self.max {
            if len > max {
                return Err(format!("The string must be no more than {} characters long", max));
            }
        }
        Ok(())
    }
}

/// What a property holds.
#[derive(Debug, Clone)]
pub enum PropertyKind {
    Scalar(ScalarKind),
    Element(Arc<NodeSchema>),
}

/// Tag names of the add/remove/clear directives of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveNames {
    pub add: String,
    pub remove: String,
    pub clear: String,
}

impl Default for DirectiveNames {
    fn default() -> Self {
        Self {
            add: "add".to_string(),
            remove: "remove".to_string(),
            clear: "clear".to_string(),
        }
    }
}

/// Describes one property of a node type.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    kind: PropertyKind,
    default: Option<ScalarValue>,
    required: bool,
    is_key: bool,
    is_default_collection: bool,
    transform_type_string: bool,
    transform_assembly_string: bool,
    version_check_required: bool,
    validator: Option<Arc<dyn Validator>>,
    element_validator: Option<Arc<dyn ElementValidator>>,
    directive_names: Option<DirectiveNames>,
}

impl PropertyDescriptor {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Scalar(kind),
            default: None,
            required: false,
            is_key: false,
            is_default_collection: false,
            transform_type_string: false,
            transform_assembly_string: false,
            version_check_required: false,
            validator: None,
            element_validator: None,
            directive_names: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::Boolean)
    }

    pub fn element(name: impl Into<String>, schema: Arc<NodeSchema>) -> Self {
        Self {
            kind: PropertyKind::Element(schema),
            ..Self::string(name)
        }
    }

    /// A collection whose directives are written directly inside the owner.
    pub fn default_collection(schema: Arc<NodeSchema>) -> Self {
        Self {
            is_default_collection: true,
            ..Self::element(DEFAULT_COLLECTION_PROPERTY, schema)
        }
    }

    pub fn with_default(mut self, value: impl Into<ScalarValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_element_validator(mut self, validator: impl ElementValidator + 'static) -> Self {
        self.element_validator = Some(Arc::new(validator));
        self
    }

    pub fn with_directive_names(mut self, names: DirectiveNames) -> Self {
        self.directive_names = Some(names);
        self
    }

    pub fn transforms_type_string(mut self) -> Self {
        self.transform_type_string = true;
        self
    }

    pub fn transforms_assembly_string(mut self) -> Self {
        self.transform_assembly_string = true;
        self
    }

    pub fn version_checked(mut self) -> Self {
        self.version_check_required = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn default_value(&self) -> Option<&ScalarValue> {
        self.default.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn is_default_collection(&self) -> bool {
        self.is_default_collection
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, PropertyKind::Element(_))
    }

    pub fn element_schema(&self) -> Option<&Arc<NodeSchema>> {
        match &self.kind {
            PropertyKind::Element(schema) => Some(schema),
            PropertyKind::Scalar(_) => None,
        }
    }

    pub fn needs_type_string_transform(&self) -> bool {
        self.transform_type_string
    }

    pub fn needs_assembly_string_transform(&self) -> bool {
        self.transform_assembly_string
    }

    pub fn is_version_check_required(&self) -> bool {
        self.version_check_required
    }

    pub fn directive_names(&self) -> Option<&DirectiveNames> {
        self.directive_names.as_ref()
    }

    pub fn element_validator(&self) -> Option<&Arc<dyn ElementValidator>> {
        self.element_validator.as_ref()
    }

    /// Parse document text and run the validator.
    pub fn parse(&self, text: &str) -> Result<ScalarValue, EngineError> {
        let kind = match &self.kind {
            PropertyKind::Scalar(kind) => *kind,
            PropertyKind::Element(_) => {
                return Err(EngineError::schema(format!(
                    "Property '{}' is not a ConfigurationElement",
                    self.name
                )))
            }
        };
        let value = kind
            .parse(text)
            .map_err(|msg| EngineError::invalid(&self.name, msg))?;
        self.validate(&value)?;
        Ok(value)
    }

    /// Check type and run the validator for a value assigned through the API.
    pub fn validate(&self, value: &ScalarValue) -> Result<(), EngineError> {
        if let PropertyKind::Scalar(kind) = &self.kind {
            if !kind.accepts(value) {
                return Err(EngineError::invalid(
                    &self.name,
                    format!("expected a {:?} value, got '{}'", kind, value),
                ));
            }
        }
        if let Some(validator) = &self.validator {
            validator
                .validate(value)
                .map_err(|msg| EngineError::invalid(&self.name, msg))?;
        }
        Ok(())
    }
}

/// Ordering and removal policy of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    /// Members are listed; inherited members first; no remove/clear syntax.
    BasicMap,
    /// Like `BasicMap` but inherited members come last.
    BasicMapAlternate,
    /// add/remove/clear directives; removed inherited members become tombstones.
    AddRemoveClearMap,
    /// Like `AddRemoveClearMap` but inherited members come last.
    AddRemoveClearMapAlternate,
}

impl CollectionType {
    pub fn is_add_remove_clear(self) -> bool {
        matches!(
            self,
            CollectionType::AddRemoveClearMap | CollectionType::AddRemoveClearMapAlternate
        )
    }

    pub fn is_basic(self) -> bool {
        !self.is_add_remove_clear()
    }

    pub fn is_alternate(self) -> bool {
        matches!(
            self,
            CollectionType::BasicMapAlternate | CollectionType::AddRemoveClearMapAlternate
        )
    }
}

/// Key equality used by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyComparer {
    #[default]
    Ordinal,
    IgnoreAsciiCase,
}

impl KeyComparer {
    pub fn eq(self, a: &ElementKey, b: &ElementKey) -> bool {
        if a.0.len() != b.0.len() {
            return false;
        }
        a.0.iter().zip(b.0.iter()).all(|(x, y)| match (self, x, y) {
            (KeyComparer::IgnoreAsciiCase, ScalarValue::String(x), ScalarValue::String(y)) => {
                x.eq_ignore_ascii_case(y)
            }
            _ => x == y,
        })
    }
}

/// Identity of a collection member: the values of its key properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementKey(pub Vec<ScalarValue>);

impl ElementKey {
    pub fn single(value: impl Into<ScalarValue>) -> Self {
        ElementKey(vec![value.into()])
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

/// Collection behavior attached to a node type.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    collection_type: CollectionType,
    item: Arc<NodeSchema>,
    element_name: String,
    names: DirectiveNames,
    comparer: KeyComparer,
    throw_on_duplicate: Option<bool>,
    add_to_end: bool,
}

impl CollectionSchema {
    pub fn new(collection_type: CollectionType, item: Arc<NodeSchema>) -> Self {
        Self {
            collection_type,
            element_name: item.name().to_string(),
            item,
            names: DirectiveNames::default(),
            comparer: KeyComparer::default(),
            throw_on_duplicate: None,
            add_to_end: false,
        }
    }

    /// Tag of each member in a BasicMap collection.
    pub fn with_element_name(mut self, name: impl Into<String>) -> Self {
        self.element_name = name.into();
        self
    }

    pub fn with_directive_names(mut self, names: DirectiveNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_comparer(mut self, comparer: KeyComparer) -> Self {
        self.comparer = comparer;
        self
    }

    pub fn with_throw_on_duplicate(mut self, throw: bool) -> Self {
        self.throw_on_duplicate = Some(throw);
        self
    }

    /// Append new members after every existing entry.
    pub fn with_add_to_end(mut self) -> Self {
        self.add_to_end = true;
        self
    }

    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    pub fn item(&self) -> &Arc<NodeSchema> {
        &self.item
    }

    pub fn element_name(&self) -> &str {
        &self.element_name
    }

    pub fn names(&self) -> &DirectiveNames {
        &self.names
    }

    pub fn comparer(&self) -> KeyComparer {
        self.comparer
    }

    pub fn add_to_end(&self) -> bool {
        self.add_to_end
    }

    /// Add/remove/clear collections reject distinct duplicates by default.
    pub fn throw_on_duplicate(&self) -> bool {
        self.throw_on_duplicate
            .unwrap_or(self.collection_type.is_add_remove_clear())
    }
}

/// Descriptor table of one node type.
pub struct NodeSchema {
    name: String,
    properties: IndexMap<String, PropertyDescriptor>,
    collection: Option<CollectionSchema>,
    validator: Option<Arc<dyn ElementValidator>>,
    hooks: Option<Arc<dyn NodeHooks>>,
}

impl fmt::Debug for NodeSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSchema")
            .field("name", &self.name)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field(
                "collection",
                &self.collection.as_ref().map(|c| c.collection_type),
            )
            .finish()
    }
}

impl NodeSchema {
    pub fn builder(name: impl Into<String>) -> NodeSchemaBuilder {
        NodeSchemaBuilder {
            name: name.into(),
            properties: Vec::new(),
            collection: None,
            validator: None,
            hooks: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn collection(&self) -> Option<&CollectionSchema> {
        self.collection.as_ref()
    }

    pub fn is_collection(&self) -> bool {
        self.collection.is_some()
    }

    pub fn default_collection_property(&self) -> Option<&PropertyDescriptor> {
        self.properties.values().find(|p| p.is_default_collection)
    }

    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values().filter(|p| p.is_key)
    }

    pub fn validator(&self) -> Option<&Arc<dyn ElementValidator>> {
        self.validator.as_ref()
    }

    pub fn hooks(&self) -> Option<&Arc<dyn NodeHooks>> {
        self.hooks.as_ref()
    }

    /// Both schemas describe the same node type.
    pub fn same_type(a: &Arc<NodeSchema>, b: &Arc<NodeSchema>) -> bool {
        Arc::ptr_eq(a, b) || a.name == b.name
    }
}

/// Builder for [`NodeSchema`].
pub struct NodeSchemaBuilder {
    name: String,
    properties: Vec<PropertyDescriptor>,
    collection: Option<CollectionSchema>,
    validator: Option<Arc<dyn ElementValidator>>,
    hooks: Option<Arc<dyn NodeHooks>>,
}

impl NodeSchemaBuilder {
    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn collection(mut self, collection: CollectionSchema) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn validator(mut self, validator: impl ElementValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn hooks(mut self, hooks: impl NodeHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn build(self) -> Result<Arc<NodeSchema>, EngineError> {
        let mut properties = IndexMap::new();
        for property in self.properties {
            if is_lock_attribute_name(&property.name) {
                return Err(EngineError::schema(format!(
                    "Property name '{}' on '{}' is reserved",
                    property.name, self.name
                )));
            }
            if property.is_default_collection {
                let is_collection = property
                    .element_schema()
                    .map(|s| s.is_collection())
                    .unwrap_or(false);
                if !is_collection {
                    return Err(EngineError::schema(format!(
                        "Default collection property on '{}' must hold a collection",
                        self.name
                    )));
                }
            }
            if property.required && property.default.is_none() && property.is_element() {
                return Err(EngineError::schema(format!(
                    "Element property '{}' on '{}' cannot be required",
                    property.name, self.name
                )));
            }
            if properties.contains_key(&property.name) {
                return Err(EngineError::schema(format!(
                    "Property '{}' is declared twice on '{}'",
                    property.name, self.name
                )));
            }
            properties.insert(property.name.clone(), property);
        }

        if properties.values().filter(|p| p.is_default_collection).count() > 1 {
            return Err(EngineError::schema(format!(
                "'{}' declares more than one default collection",
                self.name
            )));
        }

        if let Some(collection) = &self.collection {
            if collection.item.key_properties().next().is_none() {
                return Err(EngineError::schema(format!(
                    "Collection '{}' holds '{}' items, which declare no key property",
                    self.name,
                    collection.item.name()
                )));
            }
            let names = &collection.names;
            for name in [&names.add, &names.remove, &names.clear, &collection.element_name] {
                if is_lock_attribute_name(name) {
                    return Err(EngineError::schema(format!(
                        "Collection item name '{}' on '{}' is reserved",
                        name, self.name
                    )));
                }
            }
        }

        Ok(Arc::new(NodeSchema {
            name: self.name,
            properties,
            collection: self.collection,
            validator: self.validator,
            hooks: self.hooks,
        }))
    }
}
