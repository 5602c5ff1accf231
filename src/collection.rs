//! Keyed collections of elements.
//!
//! Membership changes go through `base_add` / `base_remove` / `base_clear`
//! so that inherited-region bookkeeping, tombstones and lock checks stay in
//! one place.

use crate::element::{Element, SaveMode};
use crate::error::EngineError;
use crate::schema::{CollectionSchema, CollectionType, DirectiveNames, ElementKey, KeyComparer};
use std::mem;
use std::sync::Arc;
use tracing::trace;

/// Lifecycle of a collection slot.
#[derive(Debug, Clone)]
pub enum EntryState {
    /// Copied from the parent level by `reset`.
    Inherited(Box<Element>),
    Added(Box<Element>),
    /// Re-declared after being removed or inherited.
    Replaced(Box<Element>),
    /// Tombstone. Keeps the removed value when there was one.
    Removed(Option<Box<Element>>),
}

/// Discriminant of [`EntryState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Inherited,
    Added,
    Replaced,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Entry {
    key: ElementKey,
    state: EntryState,
}

impl Entry {
    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    pub fn state(&self) -> &EntryState {
        &self.state
    }

    pub fn status(&self) -> EntryStatus {
        match self.state {
            EntryState::Inherited(_) => EntryStatus::Inherited,
            EntryState::Added(_) => EntryStatus::Added,
            EntryState::Replaced(_) => EntryStatus::Replaced,
            EntryState::Removed(_) => EntryStatus::Removed,
        }
    }

    pub fn value(&self) -> Option<&Element> {
        match &self.state {
            EntryState::Inherited(e) | EntryState::Added(e) | EntryState::Replaced(e) => Some(e),
            EntryState::Removed(e) => e.as_deref(),
        }
    }

    fn value_mut(&mut self) -> Option<&mut Element> {
        match &mut self.state {
            EntryState::Inherited(e) | EntryState::Added(e) | EntryState::Replaced(e) => Some(e),
            EntryState::Removed(e) => e.as_deref_mut(),
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self.state, EntryState::Removed(_))
    }

    /// Inherited entries count as added everywhere except in reporting.
    fn is_added(&self) -> bool {
        matches!(self.state, EntryState::Inherited(_) | EntryState::Added(_))
    }

    fn replace_value(&mut self, element: Element) {
        let value = Box::new(element);
        self.state = match mem::replace(&mut self.state, EntryState::Removed(None)) {
            EntryState::Inherited(_) => EntryState::Inherited(value),
            EntryState::Added(_) => EntryState::Added(value),
            EntryState::Replaced(_) => EntryState::Replaced(value),
            EntryState::Removed(_) => EntryState::Removed(Some(value)),
        };
    }

    fn mark_removed(&mut self) {
        self.state = match mem::replace(&mut self.state, EntryState::Removed(None)) {
            EntryState::Inherited(v) | EntryState::Added(v) | EntryState::Replaced(v) => {
                EntryState::Removed(Some(v))
            }
            removed => removed,
        };
    }

    fn mark_inherited(&mut self) {
        if let EntryState::Added(_) = self.state {
            if let EntryState::Added(v) = mem::replace(&mut self.state, EntryState::Removed(None)) {
                self.state = EntryState::Inherited(v);
            }
        }
    }
}

/// Collection state of a node.
#[derive(Debug, Clone)]
pub struct Collection {
    policy: CollectionSchema,
    pub(crate) names: DirectiveNames,
    entries: Vec<Entry>,
    removed_count: usize,
    inherited_count: usize,
    cleared: bool,
    emit_clear: bool,
    modified: bool,
}

impl Collection {
    pub(crate) fn new(policy: &CollectionSchema) -> Self {
        Self {
            names: policy.names().clone(),
            policy: policy.clone(),
            entries: Vec::new(),
            removed_count: 0,
            inherited_count: 0,
            cleared: false,
            emit_clear: false,
            modified: false,
        }
    }

    pub fn collection_type(&self) -> CollectionType {
        self.policy.collection_type()
    }

    pub fn comparer(&self) -> KeyComparer {
        self.policy.comparer()
    }

    pub fn names(&self) -> &DirectiveNames {
        &self.names
    }

    /// Tag used for members of a basic map.
    pub fn element_name(&self) -> &str {
        self.policy.element_name()
    }

    /// Tag under which members are written and read.
    pub fn item_tag(&self) -> &str {
        if self.collection_type().is_add_remove_clear() {
            &self.names.add
        } else {
            self.policy.element_name()
        }
    }

    /// Every slot, tombstones included.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of live members.
    pub fn len(&self) -> usize {
        self.entries.len() - self.removed_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inherited_count(&self) -> usize {
        self.inherited_count
    }

    pub fn removed_count(&self) -> usize {
        self.removed_count
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    pub fn emits_clear(&self) -> bool {
        self.emit_clear
    }

    pub(crate) fn set_emit_clear(&mut self) {
        self.emit_clear = true;
    }

    fn live_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_removed())
    }

    /// Live members in order.
    pub fn values(&self) -> impl Iterator<Item = &Element> {
        self.live_entries().filter_map(Entry::value)
    }

    /// Every held value, including the ones kept by tombstones.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.entries.iter_mut().filter_map(Entry::value_mut)
    }

    pub fn get(&self, key: &ElementKey) -> Option<&Element> {
        let comparer = self.comparer();
        self.live_entries()
            .find(|e| comparer.eq(&e.key, key))
            .and_then(Entry::value)
    }

    fn get_mut(&mut self, key: &ElementKey) -> Option<&mut Element> {
        let comparer = self.comparer();
        self.entries
            .iter_mut()
            .filter(|e| !e.is_removed())
            .find(|e| comparer.eq(&e.key, key))
            .and_then(Entry::value_mut)
    }

    pub fn is_removed(&self, key: &ElementKey) -> bool {
        let comparer = self.comparer();
        self.entries
            .iter()
            .any(|e| e.is_removed() && comparer.eq(&e.key, key))
    }

    fn position(&self, key: &ElementKey) -> Option<usize> {
        let comparer = self.comparer();
        self.entries.iter().position(|e| comparer.eq(&e.key, key))
    }

    /// Translate an index over live members into a slot index.
    fn real_index(&self, visible: usize) -> usize {
        if visible == 0 {
            return 0;
        }
        let mut remaining = visible;
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.is_removed() {
                remaining -= 1;
                if remaining == 0 {
                    return index + 1;
                }
            }
        }
        self.entries.len() + remaining
    }

    /// Element lock names this collection answers for.
    pub(crate) fn lockable_names(&self) -> Vec<String> {
        if self.collection_type().is_add_remove_clear() {
            [&self.names.add, &self.names.remove, &self.names.clear]
                .into_iter()
                .filter(|n| !n.is_empty())
                .cloned()
                .collect()
        } else {
            vec![self.policy.element_name().to_string()]
        }
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.modified || self.values().any(Element::is_modified)
    }

    pub(crate) fn reset_modified(&mut self) {
        self.modified = false;
        for value in self.values_mut() {
            value.reset_modified();
        }
    }

    /// Same live count, and members sharing a key are equal.
    pub(crate) fn same_items(&self, other: &Collection) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.live_entries().all(|entry| match (entry.value(), other.get(&entry.key)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inheritance {
    InParent,
    InSelf,
    InBothSame,
    InBothDiff,
    InBothCopyNoRemove,
}

fn lookup(
    table: &[(ElementKey, Inheritance)],
    comparer: KeyComparer,
    key: &ElementKey,
) -> Option<usize> {
    table.iter().position(|(k, _)| comparer.eq(k, key))
}

impl Element {
    fn collection_checked(&self) -> Result<&Collection, EngineError> {
        self.collection()
            .ok_or_else(|| EngineError::schema(format!("'{}' is not a collection", self.tag_name)))
    }

    fn collection_checked_mut(&mut self) -> Result<&mut Collection, EngineError> {
        let tag = self.tag_name.clone();
        self.collection_state_mut()
            .ok_or_else(|| EngineError::schema(format!("'{}' is not a collection", tag)))
    }

    /// Number of live members.
    pub fn item_count(&self) -> usize {
        self.collection().map_or(0, Collection::len)
    }

    pub fn items(&self) -> impl Iterator<Item = &Element> {
        self.collection().into_iter().flat_map(Collection::values)
    }

    pub fn item(&self, key: &ElementKey) -> Option<&Element> {
        self.collection()?.get(key)
    }

    pub fn item_mut(&mut self, key: &ElementKey) -> Option<&mut Element> {
        self.collection_state_mut()?.get_mut(key)
    }

    pub fn item_at(&self, index: usize) -> Option<&Element> {
        self.items().nth(index)
    }

    pub fn item_keys(&self) -> Vec<ElementKey> {
        self.collection()
            .map(|c| c.live_entries().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_item_removed(&self, key: &ElementKey) -> bool {
        self.collection().map_or(false, |c| c.is_removed(key))
    }

    /// A fresh member of this collection's item type.
    pub fn create_item(&self) -> Result<Element, EngineError> {
        let collection = self.collection_checked()?;
        let schema = self
            .schema
            .collection()
            .map(|c| Arc::clone(c.item()))
            .ok_or_else(|| EngineError::schema(format!("'{}' is not a collection", self.tag_name)))?;
        let mut item = Element::with_tag(schema, collection.item_tag().to_string());
        item.associate_context(self.context.clone());
        Ok(item)
    }

    /// Add a member, rejecting a different member under the same key when
    /// the collection throws on duplicates.
    pub fn add_item(&mut self, element: Element) -> Result<(), EngineError> {
        let throw = self.collection_checked()?.policy.throw_on_duplicate();
        self.base_add(element, throw, false)
    }

    /// Add a member at a position among the live members.
    pub fn add_item_at(&mut self, index: usize, element: Element) -> Result<(), EngineError> {
        self.base_add_at(Some(index), element, false)
    }

    pub fn remove_item(&mut self, key: &ElementKey) -> Result<(), EngineError> {
        self.base_remove(key, false)
    }

    pub fn clear_items(&mut self) -> Result<(), EngineError> {
        self.base_clear()
    }

    pub fn item_key_at(&self, index: usize) -> Option<ElementKey> {
        self.collection()?
            .live_entries()
            .nth(index)
            .map(|e| e.key.clone())
    }

    /// Position of `key` among the live members.
    pub fn item_index(&self, key: &ElementKey) -> Option<usize> {
        let collection = self.collection()?;
        let comparer = collection.comparer();
        collection
            .live_entries()
            .position(|e| comparer.eq(&e.key, key))
    }

    pub fn remove_item_at(&mut self, index: usize) -> Result<(), EngineError> {
        let key = self.item_key_at(index).ok_or_else(|| {
            EngineError::schema(format!(
                "Index {} is out of range for the collection '{}'",
                index, self.tag_name
            ))
        })?;
        self.base_remove(&key, true)
    }

    /// Request a `clear` directive on the next save.
    pub fn set_emit_clear(&mut self, emit: bool) -> Result<(), EngineError> {
        if !emit {
            self.collection_checked_mut()?.emit_clear = false;
            return Ok(());
        }
        if self.is_item_locked_by_parent() {
            return Err(EngineError::locked(format!(
                "The collection '{}' has been locked in a higher level configuration",
                self.tag_name
            )));
        }
        let names = self.collection_checked()?.names.clone();
        for name in [&names.clear, &names.remove] {
            if !name.is_empty() {
                self.check_locked_element(name)?;
            }
        }
        self.collection_checked_mut()?.set_emit_clear();
        Ok(())
    }

    fn check_add_allowed(&self, ignore_locks: bool) -> Result<(), EngineError> {
        if ignore_locks {
            return Ok(());
        }
        if self.is_item_locked_by_parent() {
            return Err(EngineError::locked(format!(
                "The collection '{}' has been locked in a higher level configuration",
                self.tag_name
            )));
        }
        let name = self.collection_checked()?.item_tag().to_string();
        self.check_locked_element(&name)
    }

    pub(crate) fn base_add(
        &mut self,
        mut element: Element,
        throw_if_exists: bool,
        ignore_locks: bool,
    ) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        self.check_add_allowed(ignore_locks)?;
        let key = element.element_key()?;
        element.associate_context(self.context.clone());

        let state = self.collection_checked_mut()?;
        let kind = state.collection_type();
        let comparer = state.comparer();
        let mut add_to_end = state.policy.add_to_end();
        let mut replaced = false;
        let mut found = None;

        for index in 0..state.entries.len() {
            let entry = &state.entries[index];
            if !comparer.eq(&key, &entry.key) {
                continue;
            }
            if !ignore_locks && entry.value().map_or(false, Element::is_item_locked_by_parent) {
                return Err(EngineError::locked(format!(
                    "The entry '{}' has been locked in a higher level configuration",
                    key
                )));
            }
            let removed = entry.is_removed();
            let added = entry.is_added();
            if !removed && throw_if_exists {
                if entry.value() != Some(&element) {
                    return Err(EngineError::duplicate(format!(
                        "The entry '{}' has already been added",
                        key
                    )));
                }
                state.entries[index].replace_value(element);
                return Ok(());
            }
            if !added {
                if kind.is_add_remove_clear() && removed && state.removed_count > 0 {
                    state.removed_count -= 1;
                }
                replaced = true;
            }
            if add_to_end || kind.is_add_remove_clear() {
                found = Some(index);
                if added {
                    add_to_end = true;
                }
                break;
            }

            // Basic maps replace the member in place.
            if !ignore_locks {
                if let Some(existing) = state.entries[index].value() {
                    element.handle_locked_attributes(existing)?;
                    element.merge_locks(existing);
                }
            }
            state.entries[index].replace_value(element);
            state.modified = true;
            return Ok(());
        }

        if let Some(index) = found {
            state.entries.remove(index);
            let boundary = state.entries.len().saturating_sub(state.inherited_count);
            if kind == CollectionType::AddRemoveClearMapAlternate && index > boundary {
                state.inherited_count = state.inherited_count.saturating_sub(1);
            }
        }
        let index = if add_to_end { None } else { found };
        self.base_add_internal(index, element, replaced)
    }

    fn base_add_internal(
        &mut self,
        index: Option<usize>,
        element: Element,
        replaced: bool,
    ) -> Result<(), EngineError> {
        let key = element.element_key()?;
        let state = self.collection_checked_mut()?;
        let kind = state.collection_type();
        let boundary = state.entries.len().saturating_sub(state.inherited_count);
        let index = match index {
            None if kind.is_alternate() => Some(boundary),
            other => other,
        };
        if let Some(index) = index {
            if kind.is_alternate() && index > boundary && !replaced {
                return Err(EngineError::locked(
                    "Items cannot be added below the inherited items of this collection",
                ));
            }
            if kind == CollectionType::BasicMap && index < state.inherited_count && !replaced {
                return Err(EngineError::locked(
                    "Items cannot be added above the inherited items of this collection",
                ));
            }
            if index > state.entries.len() {
                return Err(EngineError::schema(format!(
                    "Index {} is out of range for a collection of {} entries",
                    index,
                    state.entries.len()
                )));
            }
        }
        let value = Box::new(element);
        let entry = Entry {
            key,
            state: if replaced {
                EntryState::Replaced(value)
            } else {
                EntryState::Added(value)
            },
        };
        match index {
            Some(index) => state.entries.insert(index, entry),
            None => state.entries.push(entry),
        }
        state.modified = true;
        Ok(())
    }

    pub(crate) fn base_add_at(
        &mut self,
        index: Option<usize>,
        mut element: Element,
        ignore_locks: bool,
    ) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        self.check_add_allowed(ignore_locks)?;
        let key = element.element_key()?;
        let state = self.collection_checked_mut()?;
        if state.get(&key).is_some() {
            return Err(EngineError::duplicate(format!(
                "The entry '{}' has already been added",
                key
            )));
        }
        let kind = state.collection_type();
        let mut replaced = false;
        if kind.is_add_remove_clear() {
            if let Some(tombstone) = state.position(&key) {
                let boundary = state.entries.len().saturating_sub(state.inherited_count);
                state.entries.remove(tombstone);
                state.removed_count = state.removed_count.saturating_sub(1);
                if kind == CollectionType::AddRemoveClearMapAlternate && tombstone > boundary {
                    state.inherited_count = state.inherited_count.saturating_sub(1);
                }
                trace!(key = %key, "Tombstone consumed by indexed add");
                replaced = true;
            }
        }
        let index = match index {
            Some(visible) if kind.is_add_remove_clear() => Some(state.real_index(visible)),
            other => other,
        };
        element.associate_context(self.context.clone());
        self.base_add_internal(index, element, replaced)
    }

    pub(crate) fn base_remove(
        &mut self,
        key: &ElementKey,
        throw_if_missing: bool,
    ) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        let state = self.collection_checked()?;
        let kind = state.collection_type();
        let remove_name = state.names.remove.clone();
        let position = state.position(key);

        let Some(index) = position else {
            if throw_if_missing {
                return Err(EngineError::schema(format!(
                    "The entry '{}' is not in the collection",
                    key
                )));
            }
            if kind.is_add_remove_clear() {
                let state = self.collection_checked_mut()?;
                let at = if kind.is_alternate() {
                    state.entries.len().saturating_sub(state.inherited_count)
                } else {
                    state.entries.len()
                };
                state.entries.insert(
                    at,
                    Entry {
                        key: key.clone(),
                        state: EntryState::Removed(None),
                    },
                );
                state.removed_count += 1;
                trace!(key = %key, "Recorded removal of absent entry");
            }
            return Ok(());
        };

        let entry = &state.entries[index];
        let status = entry.status();
        let Some(value) = entry.value() else {
            if throw_if_missing {
                return Err(EngineError::schema(format!(
                    "The entry '{}' is not in the collection",
                    key
                )));
            }
            return Ok(());
        };
        if value.lock_item() {
            return Err(EngineError::locked(format!(
                "The entry '{}' has been locked in a higher level configuration",
                key
            )));
        }
        if !value.is_present() {
            self.check_locked_element(&remove_name)?;
        }

        let state = self.collection_checked_mut()?;
        match status {
            EntryStatus::Inherited | EntryStatus::Added => {
                if kind.is_add_remove_clear() {
                    state.entries[index].mark_removed();
                    state.removed_count += 1;
                    trace!(key = %key, "Entry tombstoned");
                } else {
                    let in_inherited_region = match kind {
                        CollectionType::BasicMapAlternate => {
                            index >= state.len().saturating_sub(state.inherited_count)
                        }
                        _ => index < state.inherited_count,
                    };
                    if in_inherited_region {
                        return Err(EngineError::locked(
                            "Inherited items may not be removed from this collection",
                        ));
                    }
                    state.entries.remove(index);
                }
            }
            EntryStatus::Removed => {
                if throw_if_missing {
                    return Err(EngineError::schema(format!(
                        "The entry '{}' has already been removed",
                        key
                    )));
                }
                return Ok(());
            }
            EntryStatus::Replaced => {
                if !kind.is_add_remove_clear() {
                    return Err(EngineError::locked(
                        "Elements may not be removed from this collection",
                    ));
                }
                state.entries[index].mark_removed();
                state.removed_count += 1;
            }
        }
        state.modified = true;
        Ok(())
    }

    pub(crate) fn base_clear(&mut self) -> Result<(), EngineError> {
        if self.read_only {
            return Err(EngineError::ReadOnlyViolation);
        }
        let state = self.collection_checked()?;
        let kind = state.collection_type();
        let clear_name = state.names.clear.clone();
        let remove_name = state.names.remove.clone();
        let keeps_inherited = kind.is_basic() && state.inherited_count > 0;
        if !keeps_inherited
            && state
                .entries
                .iter()
                .any(|e| e.value().map_or(false, Element::lock_item))
        {
            return Err(EngineError::locked(
                "The collection cannot be cleared because it contains locked items",
            ));
        }
        self.check_locked_element(&clear_name)?;
        self.check_locked_element(&remove_name)?;

        let state = self.collection_checked_mut()?;
        trace!(entries = state.len(), keeps_inherited, "Clearing collection");
        state.modified = true;
        state.cleared = true;
        if keeps_inherited {
            let start = if kind == CollectionType::BasicMapAlternate {
                0
            } else {
                state.inherited_count
            };
            while state.len() > state.inherited_count {
                state.entries.remove(start);
            }
        } else {
            state.entries.clear();
            state.inherited_count = 0;
            state.removed_count = 0;
        }
        Ok(())
    }

    /// Collection part of `reset`: copy the parent's live members.
    pub(crate) fn reset_collection(&mut self, parent: Option<&Element>) -> Result<(), EngineError> {
        let (kind, item_schema) = {
            let state = self.collection_checked_mut()?;
            state.entries.clear();
            state.removed_count = 0;
            state.inherited_count = 0;
            state.cleared = false;
            state.emit_clear = false;
            (state.collection_type(), Arc::clone(state.policy.item()))
        };
        let Some(parent_state) = parent.and_then(Element::collection) else {
            return Ok(());
        };
        for entry in parent_state.live_entries() {
            let Some(value) = entry.value() else {
                continue;
            };
            let mut item = Element::with_tag(Arc::clone(&item_schema), value.tag_name.clone());
            item.reset(Some(value))?;
            if kind.is_add_remove_clear() {
                self.base_add(item, true, true)?;
            } else {
                self.base_add_at(None, item, true)?;
            }
        }
        let state = self.collection_checked_mut()?;
        state.inherited_count = state.len();
        for entry in &mut state.entries {
            entry.mark_inherited();
        }
        state.modified = false;
        Ok(())
    }

    /// Collection part of `unmerge`.
    pub(crate) fn unmerge_collection(
        &mut self,
        source: &Element,
        parent: Option<&Element>,
        mode: SaveMode,
    ) -> Result<(), EngineError> {
        let Some(source_state) = source.collection() else {
            return Ok(());
        };
        let parent_state = parent.and_then(Element::collection);
        let (kind, comparer, item_schema, throw_on_duplicate, clear_name) = {
            let state = self.collection_checked()?;
            (
                state.collection_type(),
                state.comparer(),
                Arc::clone(state.policy.item()),
                state.policy.throw_on_duplicate(),
                state.names.clear.clone(),
            )
        };

        if kind.is_basic() {
            for entry in source_state.live_entries() {
                let Some(value) = entry.value() else {
                    continue;
                };
                let mut found_key = false;
                let mut in_parent = false;
                let mut parent_value = None;
                for parent_entry in parent_state.iter().flat_map(|p| p.entries.iter()) {
                    if comparer.eq(&entry.key, &parent_entry.key) {
                        found_key = true;
                        parent_value = parent_entry.value();
                    }
                    if parent_entry.value() == Some(value) {
                        found_key = true;
                        in_parent = true;
                        parent_value = parent_entry.value();
                        break;
                    }
                }
                if !found_key {
                    let item = Element::unmerge(value, None, mode)?;
                    self.base_add_at(None, item, true)?;
                } else if !in_parent
                    || (mode == SaveMode::Modified && value.is_modified())
                    || mode == SaveMode::Full
                {
                    let item = Element::unmerge(value, parent_value, mode)?;
                    self.base_add_at(None, item, true)?;
                }
            }
            return Ok(());
        }

        let emit_clear = (mode == SaveMode::Full && !clear_name.is_empty())
            || (mode == SaveMode::Modified && source_state.cleared)
            || source_state.emit_clear;
        {
            let state = self.collection_checked_mut()?;
            state.cleared = source_state.cleared;
            state.emit_clear = emit_clear;
        }

        let mut table: Vec<(ElementKey, Inheritance)> = Vec::new();
        if let (Some(parent_state), false) = (parent_state, emit_clear) {
            for entry in parent_state.live_entries() {
                table.push((entry.key.clone(), Inheritance::InParent));
            }
        }
        for entry in source_state.live_entries() {
            let Some(value) = entry.value() else {
                continue;
            };
            match lookup(&table, comparer, &entry.key) {
                Some(pos) => {
                    let parent_value = parent_state.and_then(|p| p.get(&entry.key));
                    let how = if parent_value == Some(value) {
                        match mode {
                            SaveMode::Modified if value.is_modified() => Inheritance::InBothDiff,
                            SaveMode::Modified if value.is_present() => {
                                Inheritance::InBothCopyNoRemove
                            }
                            _ => Inheritance::InBothSame,
                        }
                    } else if kind == CollectionType::AddRemoveClearMapAlternate && entry.is_added()
                    {
                        Inheritance::InBothCopyNoRemove
                    } else {
                        Inheritance::InBothDiff
                    };
                    table[pos].1 = how;
                }
                None => table.push((entry.key.clone(), Inheritance::InSelf)),
            }
        }

        if let (Some(parent_state), false) = (parent_state, emit_clear) {
            for entry in parent_state.live_entries() {
                let how = lookup(&table, comparer, &entry.key).map(|pos| table[pos].1);
                if !matches!(how, Some(Inheritance::InParent) | Some(Inheritance::InBothDiff)) {
                    continue;
                }
                let Some(value) = entry.value() else {
                    continue;
                };
                let mut item = Element::with_tag(Arc::clone(&item_schema), value.tag_name.clone());
                item.reset(Some(value))?;
                self.base_add(item, throw_on_duplicate, true)?;
                self.base_remove(&entry.key, false)?;
            }
        }

        for entry in source_state.live_entries() {
            let how = lookup(&table, comparer, &entry.key).map(|pos| table[pos].1);
            let Some(how) = how else {
                continue;
            };
            if !matches!(
                how,
                Inheritance::InSelf | Inheritance::InBothDiff | Inheritance::InBothCopyNoRemove
            ) {
                continue;
            }
            let Some(value) = entry.value() else {
                continue;
            };
            let mut item = Element::unmerge(value, None, mode)?;
            if how == Inheritance::InSelf {
                item.remove_all_inherited_locks();
            }
            self.base_add(item, throw_on_duplicate, true)?;
        }
        Ok(())
    }
}
