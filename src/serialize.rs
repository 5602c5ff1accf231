//! Reading elements from a document stream and writing them back.
//!
//! Deserialization accumulates recoverable errors so that one pass reports
//! every problem in a file; only stream failures abort.

use crate::document::{reborrow, Attribute, DocumentEvent, DocumentReader, DocumentWriter, StartElement};
use crate::element::Element;
use crate::error::EngineError;
use crate::lock::{split_lock_list, LockKind, LockSet, LOCK_ALL, LOCK_ITEM};
use crate::value::{InvalidValue, ScalarKind, ScalarValue, SourceInfo, StoredValue, ValueFlags};
use std::sync::Arc;
use tracing::debug;

impl Element {
    /// Populate this node from the element that starts with `start`,
    /// consuming the stream up to its end tag.
    ///
    /// With `key_only` only key properties are accepted, as for a `remove`
    /// directive.
    pub fn deserialize(
        &mut self,
        start: &StartElement,
        reader: &mut dyn DocumentReader,
        key_only: bool,
        errors: &mut Vec<EngineError>,
    ) -> Result<(), EngineError> {
        let renamed = start.name != self.tag_name;
        self.present = true;
        self.tag_name = start.name.clone();

        let locked_here = self
            .locks
            .elements
            .as_ref()
            .map_or(false, |l| {
                l.contains(&start.name) || (renamed && l.contains(LOCK_ALL))
            })
            || self
                .locks
                .elements_except
                .as_ref()
                .map_or(false, |l| !l.is_empty() && !l.contains(&start.name))
            || self.is_item_locked_by_parent();
        if locked_here {
            debug!(element = %start.name, "Element locked at a higher level");
            errors.push(EngineError::element_locked(&start.name).with_location(&start.location));
            return reader.skip_subtree();
        }

        let mut directives: Vec<(LockKind, &Attribute)> = Vec::new();
        let mut lock_item = None;
        for attr in &start.attributes {
            let name = attr.name.as_str();
            let kind = LockKind::from_directive(name);
            let is_attribute_list = matches!(
                kind,
                Some(LockKind::Attributes) | Some(LockKind::AttributesExcept)
            );
            if !is_attribute_list && self.attribute_locked_for_parse(name) {
                debug!(attribute = name, "Attribute locked at a higher level");
                errors.push(EngineError::attribute_locked(name).with_location(&attr.location));
                continue;
            }

            let prop = self.schema.property(name).filter(|p| !p.is_element());
            if let Some(prop) = prop {
                if key_only && !prop.is_key() {
                    errors.push(unrecognized_attribute(name).with_location(&attr.location));
                    continue;
                }
                let stored = match prop.parse(&attr.value) {
                    Ok(value) => StoredValue::Scalar(value),
                    Err(err) => StoredValue::Invalid(InvalidValue {
                        raw: attr.value.clone(),
                        error: err.with_location(&attr.location),
                    }),
                };
                self.values
                    .set(name, stored, ValueFlags::MODIFIED, Some(attr.location.clone()));
            } else if name == LOCK_ITEM && !key_only {
                match ScalarKind::Boolean.parse(&attr.value) {
                    Ok(ScalarValue::Boolean(locked)) => lock_item = Some(locked),
                    _ => errors.push(
                        EngineError::schema(format!(
                            "The value of '{}' must be 'true' or 'false'",
                            LOCK_ITEM
                        ))
                        .with_location(&attr.location),
                    ),
                }
            } else if let (Some(kind), false) = (kind, key_only) {
                directives.push((kind, attr));
            } else {
                let accepted = !key_only
                    && self
                        .schema
                        .hooks()
                        .map_or(false, |h| h.accept_unrecognized_attribute(name, &attr.value));
                if !accepted {
                    errors.push(unrecognized_attribute(name).with_location(&attr.location));
                }
            }
        }

        self.deserialize_children(reader, key_only, errors)?;

        self.ensure_required(key_only, &start.location, errors);
        if let Some(validator) = self.schema.validator().cloned() {
            if let Err(message) = validator.validate(self) {
                errors.push(
                    EngineError::invalid(self.tag_name.clone(), message)
                        .with_location(&start.location),
                );
            }
        }

        if lock_item == Some(true) {
            self.set_locked();
            self.item_locked = ValueFlags::LOCKED;
        }
        for (kind, attr) in directives {
            if let Err(err) = self.apply_lock_directive(kind, &attr.value, &attr.location) {
                errors.push(err);
            }
        }
        self.sync_default_collection_locks();
        Ok(())
    }

    /// Lock test used while reading attributes: unlike API assignment, it
    /// looks at every entry of the lists, inherited or not.
    fn attribute_locked_for_parse(&self, name: &str) -> bool {
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
        by_list || by_exception || self.is_item_locked_by_parent()
    }

    fn deserialize_children(
        &mut self,
        reader: &mut dyn DocumentReader,
        key_only: bool,
        errors: &mut Vec<EngineError>,
    ) -> Result<(), EngineError> {
        let mut seen: Vec<String> = Vec::new();
        loop {
            match reader.next_event()? {
                DocumentEvent::Start(child) => {
                    if let Err(err) = self.check_locked_element(&child.name) {
                        errors.push(err.with_location(&child.location));
                        reader.skip_subtree()?;
                        continue;
                    }
                    let prop = self
                        .schema
                        .property(&child.name)
                        .filter(|p| !p.is_default_collection())
                        .map(|p| (p.is_element(), p.element_validator().cloned()));
                    match prop {
                        Some((true, validator)) => {
                            if seen.contains(&child.name) {
                                errors.push(
                                    EngineError::schema(format!(
                                        "The element '{}' may only appear once in this section",
                                        child.name
                                    ))
                                    .with_location(&child.location),
                                );
                                reader.skip_subtree()?;
                                continue;
                            }
                            seen.push(child.name.clone());
                            let Some(element) = self.values.element_mut(&child.name) else {
                                reader.skip_subtree()?;
                                continue;
                            };
                            element.deserialize(&child, reader, key_only, errors)?;
                            if let Some(validator) = validator {
                                if let Err(message) = validator.validate(element) {
                                    errors.push(
                                        EngineError::invalid(child.name.clone(), message)
                                            .with_location(&child.location),
                                    );
                                }
                            }
                        }
                        Some((false, _)) => {
                            errors.push(
                                EngineError::schema(format!(
                                    "Property '{}' is not a ConfigurationElement",
                                    child.name
                                ))
                                .with_location(&child.location),
                            );
                            reader.skip_subtree()?;
                        }
                        None => {
                            let mut handled =
                                self.deserialize_collection_directive(&child, reader, errors)?;
                            if !handled {
                                if let Some(collection) = self.default_collection_mut() {
                                    handled = collection
                                        .deserialize_collection_directive(&child, reader, errors)?;
                                }
                            }
                            if !handled {
                                errors.push(
                                    EngineError::schema(format!(
                                        "Unrecognized element '{}'",
                                        child.name
                                    ))
                                    .with_location(&child.location),
                                );
                                reader.skip_subtree()?;
                            }
                        }
                    }
                }
                DocumentEvent::Text(_, location) => {
                    errors.push(
                        EngineError::schema(format!(
                            "The element '{}' cannot contain text",
                            self.tag_name
                        ))
                        .with_location(&location),
                    );
                }
                DocumentEvent::End => return Ok(()),
                DocumentEvent::Eof => {
                    return Err(EngineError::document(format!(
                        "Unexpected end of document inside '{}'",
                        self.tag_name
                    )))
                }
            }
        }
    }

    /// Handle an add/remove/clear directive (or basic map member) addressed
    /// to this node. Returns false when `start` is not one.
    fn deserialize_collection_directive(
        &mut self,
        start: &StartElement,
        reader: &mut dyn DocumentReader,
        errors: &mut Vec<EngineError>,
    ) -> Result<bool, EngineError> {
        let Some(state) = self.collection() else {
            return Ok(false);
        };
        let kind = state.collection_type();
        let names = state.names().clone();
        let is_member = start.name == state.item_tag();

        if is_member {
            let before = errors.len();
            let item = self.read_item(start, reader, false, errors)?;
            if errors.len() == before {
                if let Err(err) = self.add_item(item) {
                    errors.push(err.with_location(&start.location));
                }
            }
            return Ok(true);
        }
        if !kind.is_add_remove_clear() {
            return Ok(false);
        }

        if start.name == names.remove {
            let before = errors.len();
            let item = self.read_item(start, reader, true, errors)?;
            if errors.len() == before {
                let result = item.element_key().and_then(|key| self.base_remove(&key, false));
                if let Err(err) = result {
                    errors.push(err.with_location(&start.location));
                }
            }
            return Ok(true);
        }

        if start.name == names.clear {
            for attr in &start.attributes {
                errors.push(unrecognized_attribute(&attr.name).with_location(&attr.location));
            }
            match self.base_clear() {
                Ok(()) => {
                    if let Some(state) = self.collection_state_mut() {
                        state.set_emit_clear();
                    }
                }
                Err(err) => errors.push(err.with_location(&start.location)),
            }
            reader.skip_subtree()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_item(
        &self,
        start: &StartElement,
        reader: &mut dyn DocumentReader,
        key_only: bool,
        errors: &mut Vec<EngineError>,
    ) -> Result<Element, EngineError> {
        let mut item = self.create_item()?;
        item.reset_lock_lists(Some(self));
        item.deserialize(start, reader, key_only, errors)?;
        Ok(item)
    }

    fn ensure_required(
        &mut self,
        key_only: bool,
        location: &SourceInfo,
        errors: &mut Vec<EngineError>,
    ) {
        let schema = Arc::clone(&self.schema);
        for prop in schema.properties() {
            if !prop.is_required() || prop.is_element() || self.values.contains(prop.name()) {
                continue;
            }
            if key_only && !prop.is_key() {
                continue;
            }
            let supplied = match schema.hooks() {
                Some(hooks) => hooks.on_required_missing(prop.name()),
                None => Err(EngineError::required(prop.name())),
            };
            match supplied {
                Ok(value) => {
                    self.values.set(
                        prop.name(),
                        StoredValue::Scalar(value),
                        ValueFlags::MODIFIED,
                        None,
                    );
                }
                Err(err) => errors.push(err.with_location(location)),
            }
        }
    }

    /// Validate and record one lock directive read from the document.
    fn apply_lock_directive(
        &mut self,
        kind: LockKind,
        value: &str,
        location: &SourceInfo,
    ) -> Result<(), EngineError> {
        if value.trim().is_empty() {
            return Err(EngineError::schema(format!(
                "The attribute '{}' cannot be an empty string",
                kind.directive()
            ))
            .with_location(location));
        }
        let names = split_lock_list(value);
        for name in &names {
            self.validate_lock_name(kind, name, Some(location))?;
        }
        let tag = self.tag_name.clone();

        match kind {
            LockKind::Attributes => {
                let list = self
                    .locks
                    .attributes
                    .get_or_insert_with(|| LockSet::new(kind));
                for name in &names {
                    let flags = if list.contains(name) {
                        ValueFlags::MODIFIED | ValueFlags::INHERITED
                    } else {
                        ValueFlags::NONE
                    };
                    list.insert(name, flags);
                }
            }
            LockKind::AttributesExcept | LockKind::ElementsExcept => {
                let ignore = if kind == LockKind::ElementsExcept {
                    tag.clone()
                } else {
                    String::new()
                };
                let mut declared = LockSet::new(kind);
                for name in &names {
                    declared.insert(name, ValueFlags::NONE);
                }
                let list = self.locks.slot(kind).get_or_insert_with(|| {
                    let mut fresh = LockSet::inherit(kind, ignore.clone(), &declared);
                    fresh.clear_seed();
                    fresh
                });
                let keep = list.intersect(&declared, &tag);
                list.clear_internal(false);
                for name in keep {
                    if kind == LockKind::AttributesExcept || !list.contains(&name) || name == tag {
                        list.insert(&name, ValueFlags::NONE);
                    }
                }
                if kind == LockKind::ElementsExcept {
                    let unlocked: Vec<String> = self
                        .schema
                        .properties()
                        .filter(|p| p.is_element() && !p.is_default_collection())
                        .filter(|p| {
                            !self
                                .locks
                                .elements_except
                                .as_ref()
                                .map_or(false, |l| l.contains(p.name()))
                        })
                        .map(|p| p.name().to_string())
                        .collect();
                    for name in unlocked {
                        if let Some(child) = self.values.element_mut(&name) {
                            child.set_locked();
                        }
                    }
                }
            }
            LockKind::Elements => {
                let list = self
                    .locks
                    .elements
                    .get_or_insert_with(|| LockSet::new(kind));
                let mut newly_locked = Vec::new();
                for name in &names {
                    if !list.contains(name) {
                        list.insert(name, ValueFlags::NONE);
                        newly_locked.push(name.clone());
                    }
                }
                let schema = Arc::clone(&self.schema);
                for name in newly_locked {
                    if name == LOCK_ALL {
                        for prop in schema.properties().filter(|p| p.is_element()) {
                            if prop.is_default_collection() {
                                continue;
                            }
                            if let Some(child) = self.values.element_mut(prop.name()) {
                                child.set_locked();
                            }
                        }
                    } else if let Some(child) = self.values.element_mut(&name) {
                        child.set_locked();
                    }
                }
            }
        }
        Ok(())
    }

    /// Write this node as element `name`. Returns whether anything was (or,
    /// without a writer, would be) written.
    pub fn serialize_to_element(
        &self,
        mut writer: Option<&mut dyn DocumentWriter>,
        name: &str,
    ) -> Result<bool, EngineError> {
        if let Some(context) = &self.context {
            if let Some(version) = context.hooks().target_version() {
                if !context.hooks().should_serialize_element(self, name, version) {
                    return Ok(false);
                }
            }
        }
        let locked_by_list = self
            .locks
            .elements
            .as_ref()
            .map_or(false, |l| l.defined_in_parent(name));
        let locked_by_exception = self
            .locks
            .elements_except
            .as_ref()
            .map_or(false, |l| l.has_parent_elements() && !l.defined_in_parent(name));
        if locked_by_list || locked_by_exception {
            return Ok(false);
        }

        if !self.serialize_body(None, false, true)? {
            return Ok(false);
        }
        if let Some(w) = writer.as_mut() {
            w.start_element(name)?;
        }
        self.serialize_body(reborrow(&mut writer), false, true)?;
        if let Some(w) = writer.as_mut() {
            w.end_element()?;
        }
        Ok(true)
    }

    /// Write this node's attributes and children into the element the
    /// writer currently has open.
    pub fn serialize_element(
        &self,
        writer: Option<&mut dyn DocumentWriter>,
        key_only: bool,
    ) -> Result<bool, EngineError> {
        self.serialize_body(writer, key_only, true)
    }

    fn serialize_body(
        &self,
        mut writer: Option<&mut dyn DocumentWriter>,
        key_only: bool,
        with_locks: bool,
    ) -> Result<bool, EngineError> {
        let mut data = false;
        let hooks = self.context.as_ref().map(|c| c.hooks());
        let version = hooks.and_then(|h| h.target_version());

        for (name, stored) in self.values.iter() {
            let Some(prop) = self.schema.property(name) else {
                continue;
            };
            if let (Some(hooks), Some(version), true) =
                (hooks, version, prop.is_version_check_required())
            {
                if !hooks.should_serialize_property(self, name, version) {
                    continue;
                }
            }
            if prop.is_element() {
                continue;
            }
            let locked_in_parent = self
                .locks
                .attributes_except
                .as_ref()
                .map_or(false, |l| l.has_parent_elements() && !l.defined_in_parent(name))
                || self
                    .locks
                    .attributes
                    .as_ref()
                    .map_or(false, |l| l.defined_in_parent(name));
            if locked_in_parent {
                if prop.is_required() {
                    return Err(EngineError::locked(format!(
                        "The required attribute '{}' is locked at a higher level configuration",
                        name
                    )));
                }
                continue;
            }
            if key_only && !prop.is_key() {
                continue;
            }
            let text = match &stored.value {
                StoredValue::Scalar(value) => {
                    prop.validate(value)?;
                    value.to_string()
                }
                StoredValue::Invalid(invalid) => invalid.raw.clone(),
                StoredValue::Empty | StoredValue::Element(_) => continue,
            };
            if let Some(w) = writer.as_mut() {
                let text = match hooks {
                    Some(h) if prop.needs_type_string_transform() => h.transform_type_string(&text),
                    Some(h) if prop.needs_assembly_string_transform() => {
                        h.transform_assembly_string(&text)
                    }
                    _ => text,
                };
                w.attribute(name, &text)?;
            }
            data = true;
        }

        if !key_only && with_locks {
            for kind in LockKind::ALL {
                let Some(list) = self.locks.get(kind) else {
                    continue;
                };
                let local = list.local_attribute_value();
                if local.is_empty() {
                    continue;
                }
                if let Some(w) = writer.as_mut() {
                    w.attribute(kind.directive(), &local)?;
                }
                data = true;
            }
            let locked_here = self.item_locked.contains(ValueFlags::LOCKED)
                && !self.item_locked.contains(ValueFlags::INHERITED)
                && !self.item_locked.contains(ValueFlags::XML_PARENT_INHERITED);
            if locked_here {
                if let Some(w) = writer.as_mut() {
                    w.attribute(LOCK_ITEM, "true")?;
                }
                data = true;
            }
        }

        let mut wrote_default_collection = false;
        for (name, stored) in self.values.iter() {
            let Some(prop) = self.schema.property(name) else {
                continue;
            };
            if key_only && !prop.is_key() {
                continue;
            }
            let StoredValue::Element(child) = &stored.value else {
                continue;
            };
            let locked = self
                .locks
                .elements
                .as_ref()
                .map_or(false, |l| l.defined_in_parent(name))
                || self
                    .locks
                    .elements_except
                    .as_ref()
                    .map_or(false, |l| l.has_parent_elements() && !l.defined_in_parent(name));
            if locked {
                continue;
            }
            if !prop.is_default_collection() {
                data |= child.serialize_to_element(reborrow(&mut writer), name)?;
            } else if !wrote_default_collection {
                data |= child.serialize_body(reborrow(&mut writer), false, false)?;
                wrote_default_collection = true;
            }
        }

        if !key_only {
            data |= self.serialize_collection_items(reborrow(&mut writer))?;
        }
        Ok(data)
    }

    fn serialize_collection_items(
        &self,
        mut writer: Option<&mut dyn DocumentWriter>,
    ) -> Result<bool, EngineError> {
        use crate::collection::EntryStatus;

        let Some(state) = self.collection() else {
            return Ok(false);
        };
        let mut data = false;
        if !state.collection_type().is_add_remove_clear() {
            for entry in state.entries() {
                if entry.status() == EntryStatus::Removed {
                    continue;
                }
                if let Some(value) = entry.value() {
                    data |= value.serialize_to_element(reborrow(&mut writer), state.element_name())?;
                }
            }
            return Ok(data);
        }

        let names = state.names();
        if state.emits_clear() {
            if let Some(w) = writer.as_mut() {
                w.start_element(&names.clear)?;
                w.end_element()?;
            }
            data = true;
        }
        for entry in state.entries() {
            let status = entry.status();
            let Some(value) = entry.value() else {
                continue;
            };
            if matches!(status, EntryStatus::Removed | EntryStatus::Replaced) {
                if let Some(w) = writer.as_mut() {
                    w.start_element(&names.remove)?;
                }
                value.serialize_element(reborrow(&mut writer), true)?;
                if let Some(w) = writer.as_mut() {
                    w.end_element()?;
                }
                data = true;
            }
            if status != EntryStatus::Removed {
                data |= value.serialize_to_element(reborrow(&mut writer), &names.add)?;
            }
        }
        Ok(data)
    }
}

fn unrecognized_attribute(name: &str) -> EngineError {
    EngineError::schema(format!(
        "Unrecognized attribute '{}'. Note that attribute names are case-sensitive",
        name
    ))
}
