//! Schema manifests.
//!
//! A manifest declares node types in TOML and is compiled once into shared
//! [`NodeSchema`] tables:
//!
//! ```toml
//! root = "configuration"
//!
//! [[types]]
//! name = "add"
//! properties = [
//!     { name = "key", kind = "string", key = true, required = true },
//!     { name = "value", kind = "string" },
//! ]
//!
//! [[types]]
//! name = "appSettings"
//! collection = { type = "add_remove_clear_map", item = "add" }
//!
//! [[types]]
//! name = "configuration"
//! properties = [{ name = "appSettings", element = "appSettings" }]
//! ```

use crate::error::ApiError;
use crate::schema::{
    CollectionSchema, CollectionType, DirectiveNames, IntegerRange, KeyComparer, NodeSchema,
    PropertyDescriptor, StringLength,
};
use crate::value::{ScalarKind, ScalarValue};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    root: String,
    #[serde(default)]
    types: Vec<TypeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeSpec {
    name: String,
    #[serde(default)]
    properties: Vec<PropertySpec>,
    #[serde(default)]
    collection: Option<CollectionSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindSpec {
    String,
    Integer,
    Boolean,
}

impl From<KindSpec> for ScalarKind {
    fn from(kind: KindSpec) -> Self {
        match kind {
            KindSpec::String => ScalarKind::String,
            KindSpec::Integer => ScalarKind::Integer,
            KindSpec::Boolean => ScalarKind::Boolean,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PropertySpec {
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: Option<KindSpec>,
    /// Type name of an element-valued property.
    #[serde(default)]
    element: Option<String>,
    #[serde(default)]
    default: Option<toml::Value>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    key: bool,
    #[serde(default)]
    default_collection: bool,
    #[serde(default)]
    version_checked: bool,
    #[serde(default)]
    range: Option<RangeSpec>,
    #[serde(default)]
    length: Option<LengthSpec>,
    #[serde(default)]
    directives: Option<DirectiveSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeSpec {
    #[serde(default = "i64_min")]
    min: i64,
    #[serde(default = "i64_max")]
    max: i64,
}

fn i64_min() -> i64 {
    i64::MIN
}

fn i64_max() -> i64 {
    i64::MAX
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LengthSpec {
    #[serde(default)]
    min: usize,
    #[serde(default)]
    max: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectiveSpec {
    add: Option<String>,
    remove: Option<String>,
    clear: Option<String>,
}

impl DirectiveSpec {
    fn names(&self) -> DirectiveNames {
        let defaults = DirectiveNames::default();
        DirectiveNames {
            add: self.add.clone().unwrap_or(defaults.add),
            remove: self.remove.clone().unwrap_or(defaults.remove),
            clear: self.clear.clone().unwrap_or(defaults.clear),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CollectionTypeSpec {
    BasicMap,
    BasicMapAlternate,
    AddRemoveClearMap,
    AddRemoveClearMapAlternate,
}

impl From<CollectionTypeSpec> for CollectionType {
    fn from(spec: CollectionTypeSpec) -> Self {
        match spec {
            CollectionTypeSpec::BasicMap => CollectionType::BasicMap,
            CollectionTypeSpec::BasicMapAlternate => CollectionType::BasicMapAlternate,
            CollectionTypeSpec::AddRemoveClearMap => CollectionType::AddRemoveClearMap,
            CollectionTypeSpec::AddRemoveClearMapAlternate => {
                CollectionType::AddRemoveClearMapAlternate
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CollectionSpec {
    #[serde(rename = "type")]
    collection_type: CollectionTypeSpec,
    item: String,
    #[serde(default)]
    element_name: Option<String>,
    #[serde(default)]
    add: Option<String>,
    #[serde(default)]
    remove: Option<String>,
    #[serde(default)]
    clear: Option<String>,
    #[serde(default)]
    ignore_case: bool,
    #[serde(default)]
    throw_on_duplicate: Option<bool>,
    #[serde(default)]
    add_to_end: bool,
}

/// Compiled node types of a manifest, in declaration order.
#[derive(Debug, Clone)]
pub struct Manifest {
    root: String,
    types: IndexMap<String, Arc<NodeSchema>>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let text = std::fs::read_to_string(path).map_err(|source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ApiError> {
        let file: ManifestFile =
            toml::from_str(text).map_err(|e| ApiError::ManifestError(e.to_string()))?;
        Compiler::new(&file.types)?.compile_all(file.root)
    }

    /// Name of the root node type.
    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> Result<&Arc<NodeSchema>, ApiError> {
        self.schema(&self.root)
    }

    pub fn schema(&self, name: &str) -> Result<&Arc<NodeSchema>, ApiError> {
        self.types
            .get(name)
            .ok_or_else(|| ApiError::ManifestError(format!("Unknown type '{}'", name)))
    }

    pub fn types(&self) -> impl Iterator<Item = (&str, &Arc<NodeSchema>)> {
        self.types.iter().map(|(name, schema)| (name.as_str(), schema))
    }
}

struct Compiler<'a> {
    specs: IndexMap<&'a str, &'a TypeSpec>,
    compiled: HashMap<String, Arc<NodeSchema>>,
    in_progress: Vec<String>,
}

impl<'a> Compiler<'a> {
    fn new(types: &'a [TypeSpec]) -> Result<Self, ApiError> {
        let mut specs = IndexMap::new();
        for spec in types {
            if specs.insert(spec.name.as_str(), spec).is_some() {
                return Err(ApiError::ManifestError(format!(
                    "Type '{}' is declared twice",
                    spec.name
                )));
            }
        }
        Ok(Self {
            specs,
            compiled: HashMap::new(),
            in_progress: Vec::new(),
        })
    }

    fn compile_all(mut self, root: String) -> Result<Manifest, ApiError> {
        if !self.specs.contains_key(root.as_str()) {
            return Err(ApiError::ManifestError(format!(
                "Root type '{}' is not declared",
                root
            )));
        }
        let names: Vec<&str> = self.specs.keys().copied().collect();
        let mut types = IndexMap::new();
        for name in names {
            let schema = self.compile(name)?;
            types.insert(name.to_string(), schema);
        }
        debug!(type_count = types.len(), root = %root, "Manifest compiled");
        Ok(Manifest { root, types })
    }

    fn compile(&mut self, name: &str) -> Result<Arc<NodeSchema>, ApiError> {
        if let Some(schema) = self.compiled.get(name) {
            return Ok(Arc::clone(schema));
        }
        if self.in_progress.iter().any(|n| n == name) {
            return Err(ApiError::ManifestError(format!(
                "Type '{}' contains itself: {} -> {}",
                name,
                self.in_progress.join(" -> "),
                name
            )));
        }
        let spec = *self
            .specs
            .get(name)
            .ok_or_else(|| ApiError::ManifestError(format!("Unknown type '{}'", name)))?;

        self.in_progress.push(name.to_string());
        let mut builder = NodeSchema::builder(&spec.name);
        for property in &spec.properties {
            let descriptor = self
                .property(property)
                .map_err(|e| in_type(&spec.name, e))?;
            builder = builder.property(descriptor);
        }
        if let Some(collection) = &spec.collection {
            let item = self.compile(&collection.item)?;
            builder = builder.collection(collection_schema(collection, item));
        }
        self.in_progress.pop();

        let schema = builder.build().map_err(|e| ApiError::ManifestError(e.to_string()))?;
        self.compiled.insert(name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    fn property(&mut self, spec: &PropertySpec) -> Result<PropertyDescriptor, ApiError> {
        let mut descriptor = match (&spec.element, spec.kind) {
            (Some(_), Some(_)) => {
                return Err(ApiError::ManifestError(format!(
                    "Property '{}' cannot have both a kind and an element type",
                    spec.name
                )))
            }
            (Some(element), None) => {
                let schema = self.compile(element)?;
                if spec.default_collection {
                    PropertyDescriptor::default_collection(schema)
                } else {
                    PropertyDescriptor::element(&spec.name, schema)
                }
            }
            (None, kind) => {
                if spec.default_collection {
                    return Err(ApiError::ManifestError(
                        "A default collection needs an element type".to_string(),
                    ));
                }
                if spec.name.is_empty() {
                    return Err(ApiError::ManifestError(
                        "Property name cannot be empty".to_string(),
                    ));
                }
                let kind = kind.map_or(ScalarKind::String, ScalarKind::from);
                let mut descriptor = PropertyDescriptor::scalar(&spec.name, kind);
                if let Some(default) = &spec.default {
                    let value = scalar_from_toml(default, kind)
                        .map_err(|msg| property_error(&spec.name, msg))?;
                    descriptor = descriptor.with_default(value);
                }
                descriptor
            }
        };

        if spec.required {
            descriptor = descriptor.required();
        }
        if spec.key {
            descriptor = descriptor.key();
        }
        if spec.version_checked {
            descriptor = descriptor.version_checked();
        }
        if let Some(range) = &spec.range {
            descriptor = descriptor.with_validator(IntegerRange {
                min: range.min,
                max: range.max,
            });
        }
        if let Some(length) = &spec.length {
            descriptor = descriptor.with_validator(StringLength {
                min: length.min,
                max: length.max,
            });
        }
        if let Some(directives) = &spec.directives {
            descriptor = descriptor.with_directive_names(directives.names());
        }
        Ok(descriptor)
    }
}

fn collection_schema(spec: &CollectionSpec, item: Arc<NodeSchema>) -> CollectionSchema {
    let directives = DirectiveSpec {
        add: spec.add.clone(),
        remove: spec.remove.clone(),
        clear: spec.clear.clone(),
    };
    let mut schema = CollectionSchema::new(spec.collection_type.into(), item)
        .with_directive_names(directives.names());
    if let Some(name) = &spec.element_name {
        schema = schema.with_element_name(name);
    }
    if spec.ignore_case {
        schema = schema.with_comparer(KeyComparer::IgnoreAsciiCase);
    }
    if let Some(throw) = spec.throw_on_duplicate {
        schema = schema.with_throw_on_duplicate(throw);
    }
    if spec.add_to_end {
        schema = schema.with_add_to_end();
    }
    schema
}

fn scalar_from_toml(value: &toml::Value, kind: ScalarKind) -> Result<ScalarValue, String> {
    let scalar = match value {
        toml::Value::String(s) => ScalarValue::String(s.clone()),
        toml::Value::Integer(i) => ScalarValue::Integer(*i),
        toml::Value::Boolean(b) => ScalarValue::Boolean(*b),
        other => return Err(format!("unsupported default {}", other)),
    };
    if !kind.accepts(&scalar) {
        return Err(format!("default '{}' does not match the property kind", scalar));
    }
    Ok(scalar)
}

fn property_error(name: &str, msg: String) -> ApiError {
    ApiError::ManifestError(format!("Property '{}': {}", name, msg))
}

fn in_type(type_name: &str, err: ApiError) -> ApiError {
    match err {
        ApiError::ManifestError(msg) if !msg.starts_with("Type ") => {
            ApiError::ManifestError(format!("Type '{}': {}", type_name, msg))
        }
        other => other,
    }
}
