//! Configuration nodes.
//!
//! An [`Element`] owns its values, its four lock lists and its child
//! elements. Inheritance from a parent level (`reset`) and the delta needed to
//! persist a level (`unmerge`) always take the parent as an explicit argument;
//! elements never point back at their owners.

use crate::collection::Collection;
use crate::error::EngineError;
use crate::host::HostContext;
use crate::lock::{is_lock_attribute_name, LockKind, LockSet, LOCK_ALL, LOCK_ITEM};
use crate::schema::{ElementKey, NodeSchema, PropertyDescriptor, DEFAULT_COLLECTION_PROPERTY};
use crate::value::{ScalarValue, SourceInfo, StoredValue, ValueFlags, ValueStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

/// How much of a level is written back when it is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Only what differs from the parent level.
    #[default]
    Minimal,
    /// Everything set or changed at this level.
    Modified,
    /// Every effective value.
    Full,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaveMode::Minimal => "minimal",
            SaveMode::Modified => "modified",
            SaveMode::Full => "full",
        };
        f.write_str(s)
    }
}

impl FromStr for SaveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(SaveMode::Minimal),
            "modified" => Ok(SaveMode::Modified),
            "full" => Ok(SaveMode::Full),
            other => Err(format!(
                "unknown save mode '{}' (expected minimal, modified or full)",
                other
            )),
        }
    }
}

/// The four lock lists of an element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LockLists {
    pub attributes: Option<LockSet>,
    pub attributes_except: Option<LockSet>,
    pub elements: Option<LockSet>,
    pub elements_except: Option<LockSet>,
}

impl LockLists {
    pub fn get(&self, kind: LockKind) -> Option<&LockSet> {
        match kind {
            LockKind::Attributes => self.attributes.as_ref(),
            LockKind::AttributesExcept => self.attributes_except.as_ref(),
            LockKind::Elements => self.elements.as_ref(),
            LockKind::ElementsExcept => self.elements_except.as_ref(),
        }
    }

    pub fn slot(&mut self, kind: LockKind) -> &mut Option<LockSet> {
        match kind {
            LockKind::Attributes => &mut self.attributes,
            LockKind::AttributesExcept => &mut self.attributes_except,
            LockKind::Elements => &mut self.elements,
            LockKind::ElementsExcept => &mut self.elements_except,
        }
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(&mut LockSet)) {
        for kind in LockKind::ALL {
            if let Some(set) = self.slot(kind) {
                f(set);
            }
        }
    }
}

/// Simple node or collection node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Simple,
    Collection(Collection),
}

/// A configuration node.
#[derive(Debug, Clone)]
pub struct Element {
    pub(crate) schema: Arc<NodeSchema>,
    pub(crate) values: ValueStore,
    pub(crate) locks: LockLists,
    pub(crate) item_locked: ValueFlags,
    pub(crate) present: bool,
    pub(crate) read_only: bool,
    pub(crate) modified: bool,
    pub(crate) tag_name: String,
    pub(crate) context: Option<HostContext>,
    pub(crate) kind: NodeKind,
}

impl Element {
    /// An empty node of the given type, with every child element created.
    pub fn new(schema: Arc<NodeSchema>) -> Self {
        let kind = match schema.collection() {
            Some(collection) => NodeKind::Collection(Collection::new(collection)),
            None => NodeKind::Simple,
        };
        let mut element = Element {
            tag_name: schema.name().to_string(),
            schema,
            values: ValueStore::new(),
            locks: LockLists::default(),
            item_locked: ValueFlags::NONE,
            present: false,
            read_only: false,
            modified: false,
            context: None,
            kind,
        };
        element.create_children();
        element
    }

    /// Same as [`Element::new`] with an explicit document tag.
    pub fn with_tag(schema: Arc<NodeSchema>, tag: impl Into<String>) -> Self {
        let mut element = Self::new(schema);
        element.tag_name = tag.into();
        element
    }

    fn create_children(&mut self) {
        let schema = Arc::clone(&self.schema);
        for prop in schema.properties() {
            let Some(child_schema) = prop.element_schema() else {
                continue;
            };
            let tag = if prop.is_default_collection() {
                self.tag_name.clone()
            } else {
                prop.name().to_string()
            };
            let mut child = Element::with_tag(Arc::clone(child_schema), tag);
            if let (Some(names), NodeKind::Collection(collection)) =
                (prop.directive_names(), &mut child.kind)
            {
                collection.names = names.clone();
            }
            if self.read_only {
                child.set_read_only();
            }
            self.values.set(
                prop.name(),
                StoredValue::Element(Box::new(child)),
                ValueFlags::INHERITED,
                None,
            );
        }
    }

    pub fn schema(&self) -> &Arc<NodeSchema> {
        &self.schema
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    /// True once the node has been read from a document at this level.
    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn context(&self) -> Option<&HostContext> {
        self.context.as_ref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn collection(&self) -> Option<&Collection> {
        match &self.kind {
            NodeKind::Collection(collection) => Some(collection),
            NodeKind::Simple => None,
        }
    }

    pub(crate) fn collection_state_mut(&mut self) -> Option<&mut Collection> {
        match &mut self.kind {
            NodeKind::Collection(collection) => Some(collection),
            NodeKind::Simple => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, NodeKind::Collection(_))
    }

    fn property(&self, name: &str) -> Result<&PropertyDescriptor, EngineError> {
        self.schema.property(name).ok_or_else(|| {
            EngineError::schema(format!(
                "Unrecognized property '{}' on '{}'",
                name, self.tag_name
            ))
        })
    }

    /// Effective value of a simple property: the stored value, else the
    /// schema default. An explicit empty value reads as `None`; a value that
    /// failed to parse surfaces its error here.
    pub fn get(&self, name: &str) -> Result<Option<&ScalarValue>, EngineError> {
        let prop = self.property(name)?;
        if prop.is_element() {
            return Err(EngineError::schema(format!(
                "Property '{}' is an element, not a value",
                name
            )));
        }
        match self.values.value(name) {
            Some(StoredValue::Scalar(value)) => Ok(Some(value)),
            Some(StoredValue::Empty) => Ok(None),
            Some(StoredValue::Invalid(invalid)) => Err(invalid.error.clone()),
            Some(StoredValue::Element(_)) | None => Ok(prop.default_value()),
        }
    }

    /// Assign a simple property through the API. `None` stores an explicit
    /// empty value.
    pub fn set(&mut self, name: &str, value: Option<ScalarValue>) -> Result<(), EngineError> {
        self.set_property_value(name, value, false)
    }

    pub(crate) fn set_property_value(
        &mut self,
        name: &str,
        value: Option<ScalarValue>,
        ignore_locks: bool,
    ) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        let prop = self.property(name)?;
        if prop.is_element() {
            return Err(EngineError::schema(format!(
                "Property '{}' is an element and cannot be assigned a value",
                name
            )));
        }
        if let Some(value) = &value {
            prop.validate(value)?;
        }
        if !ignore_locks && self.is_attribute_locked(name) {
            return Err(EngineError::attribute_locked(name));
        }
        self.modified = true;
        let stored = match value {
            Some(value) => StoredValue::Scalar(value),
            None => StoredValue::Empty,
        };
        self.values.set_modified(name, stored);
        Ok(())
    }

    /// Whether a higher level forbids changing attribute `name` here.
    pub fn is_attribute_locked(&self, name: &str) -> bool {
        let by_exception = self
            .locks
            .attributes_except
            .as_ref()
            .map_or(false, |l| l.has_parent_elements() && !l.defined_in_parent(name));
        let by_list = self
            .locks
            .attributes
            .as_ref()
            .map_or(false, |l| l.defined_in_parent(name) || l.defined_in_parent(LOCK_ALL));
        by_exception || by_list || self.is_item_locked_by_parent()
    }

    /// Whether attribute `name` is locked in the lists that propagate to the
    /// next level.
    fn attribute_lock_propagates(&self, name: &str) -> bool {
        let by_list = self
            .locks
            .attributes
            .as_ref()
            .map_or(false, |l| l.contains(name) || l.contains(LOCK_ALL));
        let by_exception = self
            .locks
            .attributes_except
            .as_ref()
            .map_or(false, |l| !l.contains(name));
        by_list || by_exception
    }

    pub fn is_item_locked_by_parent(&self) -> bool {
        self.item_locked.contains(ValueFlags::LOCKED) && self.item_locked.contains(ValueFlags::INHERITED)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.values.element(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.values.element_mut(name)
    }

    pub fn default_collection(&self) -> Option<&Element> {
        self.schema.default_collection_property()?;
        self.values.element(DEFAULT_COLLECTION_PROPERTY)
    }

    pub fn default_collection_mut(&mut self) -> Option<&mut Element> {
        self.schema.default_collection_property()?;
        self.values.element_mut(DEFAULT_COLLECTION_PROPERTY)
    }

    /// Identity of this node inside a collection.
    pub fn element_key(&self) -> Result<ElementKey, EngineError> {
        let mut parts = Vec::new();
        for prop in self.schema.key_properties() {
            match self.get(prop.name())? {
                Some(value) => parts.push(value.clone()),
                None => {
                    return Err(EngineError::duplicate(format!(
                        "The key property '{}' of '{}' has no value",
                        prop.name(),
                        self.tag_name
                    )))
                }
            }
        }
        Ok(ElementKey(parts))
    }

    pub fn source(&self, name: &str) -> Option<&SourceInfo> {
        self.values.source(name)
    }

    // Locks

    pub fn locks(&self, kind: LockKind) -> Option<&LockSet> {
        self.locks.get(kind)
    }

    pub fn lock_item(&self) -> bool {
        self.item_locked.contains(ValueFlags::LOCKED)
    }

    pub fn set_lock_item(&mut self, locked: bool) -> Result<(), EngineError> {
        if self.item_locked.contains(ValueFlags::INHERITED) {
            return Err(EngineError::attribute_locked(LOCK_ITEM));
        }
        self.item_locked = if locked {
            ValueFlags::LOCKED | ValueFlags::MODIFIED
        } else {
            ValueFlags::MODIFIED
        };
        Ok(())
    }

    /// Lock `name` for the levels below this one.
    pub fn add_lock(&mut self, kind: LockKind, name: &str) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        if self.is_item_locked_by_parent() {
            return Err(EngineError::attribute_locked(name));
        }
        let name = name.trim();
        self.validate_lock_name(kind, name, None)?;
        let tag = self.tag_name.clone();
        self.locks
            .slot(kind)
            .get_or_insert_with(|| LockSet::with_ignore_name(kind, tag))
            .add_local(name);
        if kind.targets_elements() {
            self.sync_default_collection_locks();
        }
        Ok(())
    }

    pub fn remove_lock(&mut self, kind: LockKind, name: &str) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        match self.locks.slot(kind) {
            Some(set) => set.remove(name)?,
            None => {
                return Err(EngineError::schema(format!(
                    "The entry '{}' is not in the lock list",
                    name
                )))
            }
        }
        if kind.targets_elements() {
            self.sync_default_collection_locks();
        }
        Ok(())
    }

    pub fn clear_locks(&mut self, kind: LockKind) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        if let Some(set) = self.locks.slot(kind) {
            set.clear();
        }
        if kind.targets_elements() {
            self.sync_default_collection_locks();
        }
        Ok(())
    }

    /// Names valid in element lock lists on behalf of the collection that
    /// this node is, or holds by default.
    fn collection_lock_vocabulary(&self) -> Vec<String> {
        let collection = if self.is_collection() {
            Some(self)
        } else {
            self.default_collection()
        };
        collection
            .and_then(Element::collection)
            .map(Collection::lockable_names)
            .unwrap_or_default()
    }

    /// Names a lock list of `kind` on this node accepts, besides `*`.
    pub fn lockable_names(&self, kind: LockKind) -> Vec<String> {
        let mut names = if kind.targets_elements() {
            self.collection_lock_vocabulary()
        } else {
            Vec::new()
        };
        names.extend(
            self.schema
                .properties()
                .filter(|p| !p.is_default_collection() && !p.is_required())
                .filter(|p| p.is_element() == kind.targets_elements())
                .map(|p| p.name().to_string()),
        );
        names
    }

    /// A lock target must be a schema property of the right shape, the
    /// wildcard, or a collection directive, and may not be required.
    pub(crate) fn validate_lock_name(
        &self,
        kind: LockKind,
        name: &str,
        location: Option<&SourceInfo>,
    ) -> Result<(), EngineError> {
        if name == LOCK_ALL && !kind.is_exception_list() {
            return Ok(());
        }
        let prop = self
            .schema
            .property(name)
            .filter(|p| !p.is_default_collection() && !is_lock_attribute_name(name));
        let shape_ok = prop.map_or(false, |p| p.is_element() == kind.targets_elements());
        if !shape_ok {
            let vocabulary = self.collection_lock_vocabulary();
            let in_vocabulary =
                kind.targets_elements() && vocabulary.iter().any(|v| v == name);
            if !in_vocabulary {
                return Err(self.invalid_lock(kind, name, &vocabulary, location));
            }
        }
        if let Some(prop) = prop {
            if prop.is_required() {
                let err = EngineError::schema(format!(
                    "The attribute '{}' is required and cannot be locked",
                    prop.name()
                ));
                return Err(match location {
                    Some(info) => err.with_location(info),
                    None => err,
                });
            }
        }
        Ok(())
    }

    fn invalid_lock(
        &self,
        kind: LockKind,
        name: &str,
        vocabulary: &[String],
        location: Option<&SourceInfo>,
    ) -> EngineError {
        let mut lockable: Vec<String> = Vec::new();
        if kind.targets_elements() {
            lockable.extend(vocabulary.iter().map(|v| format!("'{}'", v)));
        }
        lockable.extend(
            self.schema
                .properties()
                .filter(|p| !p.is_default_collection())
                .filter(|p| p.is_element() == kind.targets_elements())
                .map(|p| format!("'{}'", p.name())),
        );
        let what = if kind.targets_elements() {
            "element"
        } else {
            "attribute"
        };
        let err = EngineError::schema(format!(
            "The {} '{}' is not valid in the locked list for this section. The following can be locked: {}",
            what,
            name,
            lockable.join(", ")
        ));
        match location {
            Some(info) => err.with_location(info),
            None => err,
        }
    }

    /// Fails when child element `name` may not appear at this level.
    pub(crate) fn check_locked_element(&self, name: &str) -> Result<(), EngineError> {
        let by_list = self
            .locks
            .elements
            .as_ref()
            .map_or(false, |l| l.defined_in_parent(LOCK_ALL) || l.defined_in_parent(name));
        let by_exception = self.locks.elements_except.as_ref().map_or(false, |l| {
            l.has_parent_elements() && !l.defined_in_parent(name)
        });
        if by_list || by_exception || self.item_locked.contains(ValueFlags::INHERITED) {
            return Err(EngineError::element_locked(name));
        }
        Ok(())
    }

    /// Rebuild the four lock lists as inherited copies of `parent`'s.
    pub(crate) fn reset_lock_lists(&mut self, parent: Option<&Element>) {
        self.locks = LockLists::default();
        if let Some(parent) = parent {
            self.item_locked = if parent.item_locked.contains(ValueFlags::LOCKED) {
                ValueFlags::INHERITED | parent.item_locked
            } else {
                ValueFlags::NONE
            };
            if let Some(list) = &parent.locks.attributes {
                self.locks.attributes = Some(LockSet::inherit(LockKind::Attributes, "", list));
            }
            if let Some(list) = &parent.locks.attributes_except {
                self.locks.attributes_except =
                    Some(LockSet::inherit(LockKind::AttributesExcept, "", list));
            }
            if let Some(list) = &parent.locks.elements {
                self.locks.elements = Some(LockSet::inherit(LockKind::Elements, "", list));
            }
            if let Some(list) = &parent.locks.elements_except {
                self.locks.elements_except = Some(LockSet::inherit(
                    LockKind::ElementsExcept,
                    parent.tag_name.clone(),
                    list,
                ));
            }
            self.sync_default_collection_locks();
        }
    }

    /// A default collection shares the element lock lists of its owner.
    pub(crate) fn sync_default_collection_locks(&mut self) {
        let elements = self.locks.elements.clone();
        let elements_except = self.locks.elements_except.clone();
        if let Some(collection) = self.default_collection_mut() {
            collection.locks.elements = elements;
            collection.locks.elements_except = elements_except;
        }
    }

    /// Fold `source`'s locks into this node, as when a collection member is
    /// replaced by a re-declaration.
    pub(crate) fn merge_locks(&mut self, source: &Element) {
        if source.item_locked.contains(ValueFlags::LOCKED) {
            self.item_locked = ValueFlags::INHERITED | source.item_locked;
        }
        if let Some(list) = &source.locks.attributes {
            let own = self
                .locks
                .attributes
                .get_or_insert_with(|| LockSet::new(LockKind::Attributes));
            for name in list.names() {
                own.insert(name, ValueFlags::INHERITED);
            }
        }
        if let Some(list) = &source.locks.attributes_except {
            let own = self
                .locks
                .attributes_except
                .get_or_insert_with(|| LockSet::inherit(LockKind::AttributesExcept, "", list));
            let keep = own.intersect(list, &self.tag_name);
            own.clear_internal(false);
            for name in keep {
                own.insert(&name, ValueFlags::NONE);
            }
        }
        if let Some(list) = &source.locks.elements {
            let own = self
                .locks
                .elements
                .get_or_insert_with(|| LockSet::new(LockKind::Elements));
            for name in list.names() {
                own.insert(name, ValueFlags::INHERITED);
            }
        }
        if let Some(list) = &source.locks.elements_except {
            let tag = self.tag_name.clone();
            let own = self.locks.elements_except.get_or_insert_with(|| {
                LockSet::inherit(LockKind::ElementsExcept, source.tag_name.clone(), list)
            });
            if own.is_empty() && !own.has_parent_elements() {
                *own = LockSet::inherit(LockKind::ElementsExcept, source.tag_name.clone(), list);
            }
            let keep = own.intersect(list, &tag);
            own.clear_internal(false);
            for name in keep {
                if !own.contains(&name) || name == tag {
                    own.insert(&name, ValueFlags::NONE);
                }
            }
            if own.has_parent_elements() {
                let unlocked: Vec<String> = self
                    .schema
                    .properties()
                    .filter(|p| p.is_element() && !own.contains(p.name()))
                    .map(|p| p.name().to_string())
                    .collect();
                for name in unlocked {
                    if let Some(child) = self.values.element_mut(&name) {
                        child.set_locked();
                    }
                }
            }
        }
        self.sync_default_collection_locks();
    }

    /// Keep `source`'s locked attribute values: a locked attribute set here
    /// is a violation, an unset one takes the locked value.
    pub(crate) fn handle_locked_attributes(&mut self, source: &Element) -> Result<(), EngineError> {
        if source.locks.attributes.is_none() && source.locks.attributes_except.is_none() {
            return Ok(());
        }
        let schema = Arc::clone(&self.schema);
        for prop in schema.properties().filter(|p| !p.is_element()) {
            let name = prop.name();
            if !source.attribute_lock_propagates(name) {
                continue;
            }
            let set_here = self
                .values
                .get(name)
                .map_or(false, |v| !v.flags.contains(ValueFlags::INHERITED));
            if set_here {
                return Err(EngineError::attribute_locked(name));
            }
            if let Some(value) = source.values.get(name) {
                self.values.set(
                    name,
                    value.value.clone(),
                    ValueFlags::INHERITED | ValueFlags::LOCKED,
                    value.source.clone(),
                );
            }
        }
        Ok(())
    }

    /// Mark this subtree as locked by its enclosing element.
    pub(crate) fn set_locked(&mut self) {
        self.item_locked = ValueFlags::LOCKED | ValueFlags::XML_PARENT_INHERITED;
        for (_, child) in self.values.elements_mut() {
            child.set_locked();
        }
        if let Some(collection) = self.collection_state_mut() {
            for item in collection.values_mut() {
                item.set_locked();
            }
        }
    }

    pub(crate) fn remove_all_inherited_locks(&mut self) {
        self.locks.for_each_mut(LockSet::remove_inherited_locks);
    }

    // Inheritance

    /// Rebuild this node as the inherited baseline of `parent`. With no
    /// parent the node is cleared and seeded by the type's defaults hook.
    pub fn reset(&mut self, parent: Option<&Element>) -> Result<(), EngineError> {
        self.values.clear();
        self.create_children();
        self.reset_lock_lists(parent);
        self.present = false;

        match parent {
            None => {
                if let Some(hooks) = self.schema.hooks().cloned() {
                    hooks.initialize_default(self)?;
                }
            }
            Some(parent) => {
                for (name, value) in parent.values.iter() {
                    let is_element = match self.schema.property(name) {
                        Some(prop) => prop.is_element(),
                        None => continue,
                    };
                    if is_element || value.value.is_empty() {
                        continue;
                    }
                    let mut flags = ValueFlags::INHERITED;
                    if self.attribute_lock_propagates(name) {
                        flags |= ValueFlags::LOCKED;
                    }
                    self.values
                        .set(name, value.value.clone(), flags, value.source.clone());
                }
                for (name, parent_child) in parent.values.elements() {
                    if let Some(child) = self.values.element_mut(name) {
                        child.reset(Some(parent_child))?;
                    }
                }
                self.sync_default_collection_locks();
            }
        }

        if self.is_collection() {
            self.reset_collection(parent)?;
        }
        Ok(())
    }

    /// Compute what must be written so that `source` is reproduced on top of
    /// `parent` under `mode`.
    pub fn unmerge(
        source: &Element,
        parent: Option<&Element>,
        mode: SaveMode,
    ) -> Result<Element, EngineError> {
        trace!(element = %source.tag_name, mode = %mode, has_parent = parent.is_some(), "Unmerging");
        let mut out = Element::with_tag(Arc::clone(&source.schema), source.tag_name.clone());
        if let (NodeKind::Collection(out_state), Some(src_state)) =
            (&mut out.kind, source.collection())
        {
            out_state.names = src_state.names.clone();
        }
        out.unmerge_from(source, parent, mode)?;
        Ok(out)
    }

    fn unmerge_from(
        &mut self,
        source: &Element,
        parent: Option<&Element>,
        mode: SaveMode,
    ) -> Result<(), EngineError> {
        self.locks = source.locks.clone();
        self.item_locked = source.item_locked;
        self.associate_context(source.context.clone());

        if let Some(parent) = parent {
            for kind in LockKind::ALL {
                if let Some(parent_list) = parent.locks.get(kind) {
                    *self.locks.slot(kind) =
                        unmerge_lock_list(source.locks.get(kind), parent_list, mode);
                }
            }
        }

        let schema = Arc::clone(&self.schema);
        for prop in schema.properties().filter(|p| !p.is_element()) {
            let name = prop.name();
            let mut value = source
                .values
                .value(name)
                .filter(|v| !v.is_empty())
                .cloned();
            if value.is_none() && (prop.is_required() || mode == SaveMode::Full) {
                value = prop.default_value().cloned().map(StoredValue::Scalar);
            }
            let parent_value = parent.and_then(|p| p.values.value(name));
            if value.is_none() && mode == SaveMode::Full {
                value = parent_value.filter(|v| !v.is_empty()).cloned();
            }
            let Some(value) = value else {
                continue;
            };

            let baseline = match parent_value {
                Some(v) => Some(v.clone()),
                None => prop.default_value().cloned().map(StoredValue::Scalar),
            };
            let same_as_baseline = same_value(&value, baseline.as_ref());

            let emit = match mode {
                SaveMode::Minimal => !same_as_baseline || prop.is_required(),
                SaveMode::Modified => {
                    let modified = source.values.is_modified(name);
                    let inherited = source.values.is_inherited(name);
                    prop.is_required()
                        || modified
                        || !inherited
                        || (parent.is_none() && inherited && !same_as_baseline)
                }
                SaveMode::Full => true,
            };
            if emit {
                self.values.set_modified(name, value);
            }
        }

        for prop in schema.properties().filter(|p| p.is_element()) {
            let name = prop.name();
            let Some(source_child) = source.values.element(name) else {
                continue;
            };
            let parent_child = parent.and_then(|p| p.values.element(name));
            let child = Element::unmerge(source_child, parent_child, mode)?;
            if let Some(slot) = self.values.element_mut(name) {
                *slot = child;
            }
        }

        if self.is_collection() {
            self.unmerge_collection(source, parent, mode)?;
        }
        Ok(())
    }

    // State

    pub fn is_modified(&self) -> bool {
        if self.modified || self.item_locked.contains(ValueFlags::MODIFIED) {
            return true;
        }
        if LockKind::ALL
            .iter()
            .any(|k| self.locks.get(*k).map_or(false, LockSet::is_modified))
        {
            return true;
        }
        if self.values.elements().any(|(_, child)| child.is_modified()) {
            return true;
        }
        self.collection().map_or(false, Collection::is_modified)
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
        self.item_locked.remove(ValueFlags::MODIFIED);
        self.locks.for_each_mut(LockSet::reset_modified);
        for (_, child) in self.values.elements_mut() {
            child.reset_modified();
        }
        if let Some(collection) = self.collection_state_mut() {
            collection.reset_modified();
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Freeze this subtree.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
        for (_, child) in self.values.elements_mut() {
            child.set_read_only();
        }
        if let Some(collection) = self.collection_state_mut() {
            for item in collection.values_mut() {
                item.set_read_only();
            }
        }
    }

    pub fn associate_context(&mut self, context: Option<HostContext>) {
        self.context = context.clone();
        self.values.associate_context(context.clone());
        if let Some(collection) = self.collection_state_mut() {
            for item in collection.values_mut() {
                item.associate_context(context.clone());
            }
        }
    }

    /// Errors retained from values that failed to parse, in this node and
    /// below.
    pub fn errors(&self) -> Vec<EngineError> {
        let mut errors: Vec<EngineError> = self
            .values
            .invalid_values()
            .map(|invalid| invalid.error.clone())
            .collect();
        for (_, child) in self.values.elements() {
            errors.extend(child.errors());
        }
        if let Some(collection) = self.collection() {
            for item in collection.values() {
                errors.extend(item.errors());
            }
        }
        errors
    }
}

/// Structural equality: same node type and equal property values, where an
/// absent or empty value equals the schema default.
impl PartialEq for Element {
    fn eq(&self, other: &Element) -> bool {
        if !NodeSchema::same_type(&self.schema, &other.schema) {
            return false;
        }
        for prop in self.schema.properties() {
            let name = prop.name();
            if prop.is_element() {
                match (self.values.element(name), other.values.element(name)) {
                    (Some(a), Some(b)) if a != b => return false,
                    (Some(_), None) | (None, Some(_)) => return false,
                    _ => {}
                }
                continue;
            }
            let a = self.values.value(name);
            let b = other.values.value(name);
            if values_equal(a, b) {
                continue;
            }
            let default = prop.default_value().cloned().map(StoredValue::Scalar);
            let a_unset = a.map_or(true, StoredValue::is_empty);
            let b_unset = b.map_or(true, StoredValue::is_empty);
            if (a_unset && values_equal(b, default.as_ref()))
                || (b_unset && values_equal(a, default.as_ref()))
            {
                continue;
            }
            return false;
        }
        match (self.collection(), other.collection()) {
            (Some(a), Some(b)) => a.same_items(b),
            (None, None) => true,
            _ => false,
        }
    }
}

fn values_equal(a: Option<&StoredValue>, b: Option<&StoredValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), b) => same_value(a, b),
        (None, Some(_)) => false,
    }
}

fn same_value(a: &StoredValue, b: Option<&StoredValue>) -> bool {
    match (a, b) {
        (StoredValue::Scalar(a), Some(StoredValue::Scalar(b))) => a == b,
        (StoredValue::Empty, Some(StoredValue::Empty)) => true,
        (StoredValue::Invalid(a), Some(StoredValue::Invalid(b))) => a.raw == b.raw,
        (StoredValue::Element(a), Some(StoredValue::Element(b))) => a == b,
        _ => false,
    }
}

/// The part of `source` a level must write given its parent's list.
/// Exception lists are written whole or not at all.
fn unmerge_lock_list(
    source: Option<&LockSet>,
    parent: &LockSet,
    mode: SaveMode,
) -> Option<LockSet> {
    let source = source?;
    if !source.is_exception_list() {
        let keep = |name: &str| match mode {
            SaveMode::Modified => !parent.contains(name) || source.is_value_modified(name),
            SaveMode::Minimal => !parent.contains(name),
            SaveMode::Full => true,
        };
        if mode == SaveMode::Full {
            return Some(source.clone());
        }
        let mut list = LockSet::new(source.kind());
        for name in source.names().filter(|n| keep(n)) {
            list.insert(name, ValueFlags::NONE);
        }
        return Some(list);
    }

    if mode != SaveMode::Full && source.len() == parent.len() {
        let same_as_parent = source.names().all(|name| {
            parent.contains(name)
                && !(source.is_value_modified(name) && mode == SaveMode::Modified)
        });
        if same_as_parent {
            return None;
        }
    }
    Some(source.clone())
}
