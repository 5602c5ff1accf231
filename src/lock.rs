//! Lock lists: enumerated ("lock these names") and exception ("lock all but
//! these names") sets with per-name inheritance tracking.

use crate::error::EngineError;
use crate::value::ValueFlags;
use indexmap::IndexMap;

pub const LOCK_ATTRIBUTES: &str = "lockAttributes";
pub const LOCK_ALL_ATTRIBUTES_EXCEPT: &str = "lockAllAttributesExcept";
pub const LOCK_ELEMENTS: &str = "lockElements";
pub const LOCK_ALL_ELEMENTS_EXCEPT: &str = "lockAllElementsExcept";
pub const LOCK_ITEM: &str = "lockItem";
/// Wildcard accepted by enumerated lock lists.
pub const LOCK_ALL: &str = "*";

const LOCK_ATTRIBUTE_NAMES: [&str; 5] = [
    LOCK_ATTRIBUTES,
    LOCK_ALL_ATTRIBUTES_EXCEPT,
    LOCK_ELEMENTS,
    LOCK_ALL_ELEMENTS_EXCEPT,
    LOCK_ITEM,
];

/// True for the reserved lock directive attribute names.
pub fn is_lock_attribute_name(name: &str) -> bool {
    name.starts_with("lock") && LOCK_ATTRIBUTE_NAMES.contains(&name)
}

/// Which of the four lock lists of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Attributes,
    AttributesExcept,
    Elements,
    ElementsExcept,
}

impl LockKind {
    pub const ALL: [LockKind; 4] = [
        LockKind::Attributes,
        LockKind::AttributesExcept,
        LockKind::Elements,
        LockKind::ElementsExcept,
    ];

    pub fn is_exception_list(self) -> bool {
        matches!(self, LockKind::AttributesExcept | LockKind::ElementsExcept)
    }

    pub fn targets_elements(self) -> bool {
        matches!(self, LockKind::Elements | LockKind::ElementsExcept)
    }

    /// Attribute name that declares this list in a document.
    pub fn directive(self) -> &'static str {
        match self {
            LockKind::Attributes => LOCK_ATTRIBUTES,
            LockKind::AttributesExcept => LOCK_ALL_ATTRIBUTES_EXCEPT,
            LockKind::Elements => LOCK_ELEMENTS,
            LockKind::ElementsExcept => LOCK_ALL_ELEMENTS_EXCEPT,
        }
    }

    pub fn from_directive(name: &str) -> Option<LockKind> {
        LockKind::ALL.into_iter().find(|k| k.directive() == name)
    }
}

/// A set of locked (or, for exception lists, unlocked) names.
///
/// Each name carries `INHERITED` when it was copied from the parent level and
/// `MODIFIED` when it was re-declared locally on top of an inherited entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSet {
    kind: LockKind,
    names: IndexMap<String, ValueFlags>,
    seed: Vec<String>,
    ignore_name: String,
    /// Exception list copied from a higher level, even if narrowed to nothing.
    from_parent: bool,
    modified: bool,
}

impl LockSet {
    pub fn new(kind: LockKind) -> Self {
        Self::with_ignore_name(kind, "")
    }

    /// An empty list whose `contains` always reports `ignore_name`.
    pub fn with_ignore_name(kind: LockKind, ignore_name: impl Into<String>) -> Self {
        Self {
            kind,
            names: IndexMap::new(),
            seed: Vec::new(),
            ignore_name: ignore_name.into(),
            from_parent: false,
            modified: false,
        }
    }

    /// Copy of `parent` with every entry marked inherited. Exception lists
    /// also remember the parent's names as their seed, and stay parent-defined
    /// when the parent narrowed them to nothing.
    pub fn inherit(kind: LockKind, ignore_name: impl Into<String>, parent: &LockSet) -> Self {
        let mut set = Self::with_ignore_name(kind, ignore_name);
        set.from_parent = set.is_exception_list();
        for name in parent.names() {
            set.insert(name, ValueFlags::INHERITED);
            if set.is_exception_list() {
                set.seed.push(name.to_string());
            }
        }
        set
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn is_exception_list(&self) -> bool {
        self.kind.is_exception_list()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn flags(&self, name: &str) -> ValueFlags {
        self.names.get(name).copied().unwrap_or(ValueFlags::NONE)
    }

    pub fn seed(&self) -> &[String] {
        &self.seed
    }

    /// Record `name`. A non-inherited re-declaration of an existing entry keeps
    /// the old flags and adds `MODIFIED`, moving the name to the end.
    pub fn insert(&mut self, name: &str, flags: ValueFlags) {
        let flags = match self.names.shift_remove(name) {
            Some(existing) if flags != ValueFlags::INHERITED => ValueFlags::MODIFIED | existing,
            _ => flags,
        };
        self.names.insert(name.to_string(), flags);
    }

    /// Local add through the API; marks the list modified.
    pub(crate) fn add_local(&mut self, name: &str) {
        let flags = match self.names.shift_remove(name) {
            Some(existing) => ValueFlags::MODIFIED | existing,
            None => ValueFlags::MODIFIED,
        };
        self.names.insert(name.to_string(), flags);
        self.modified = true;
    }

    pub fn contains(&self, name: &str) -> bool {
        if self.is_exception_list() && name == self.ignore_name {
            return true;
        }
        self.names.contains_key(name)
    }

    /// Whether `name` was declared at a higher level.
    pub fn defined_in_parent(&self, name: &str) -> bool {
        if self.is_exception_list() && (name == self.ignore_name || self.seed.iter().any(|s| s == name)) {
            return true;
        }
        self.flags(name).contains(ValueFlags::INHERITED)
    }

    pub fn is_value_modified(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::MODIFIED)
    }

    /// True when at least one entry came from a higher level.
    pub fn has_parent_elements(&self) -> bool {
        // An empty inherited exception list locks everything.
        if self.is_exception_list()
            && self.names.is_empty()
            && (self.from_parent || !self.seed.is_empty())
        {
            return true;
        }
        self.names
            .values()
            .any(|flags| flags.contains(ValueFlags::INHERITED))
    }

    pub fn remove_inherited_locks(&mut self) {
        let inherited: Vec<String> = self
            .names()
            .filter(|name| self.defined_in_parent(name))
            .map(str::to_string)
            .collect();
        for name in inherited {
            self.names.shift_remove(&name);
        }
    }

    /// Remove `name`. Enumerated lists refuse to drop a parent's lock; a local
    /// re-declaration of one only loses its `MODIFIED` mark.
    pub fn remove(&mut self, name: &str) -> Result<(), EngineError> {
        let flags = match self.names.get(name) {
            Some(flags) => *flags,
            None => {
                return Err(EngineError::schema(format!(
                    "The entry '{}' is not in the lock list",
                    name
                )))
            }
        };
        if !self.is_exception_list() && flags.contains(ValueFlags::INHERITED) {
            if flags.contains(ValueFlags::MODIFIED) {
                let mut flags = flags;
                flags.remove(ValueFlags::MODIFIED);
                self.names.insert(name.to_string(), flags);
                self.modified = true;
                return Ok(());
            }
            return Err(EngineError::attribute_locked(name));
        }
        self.names.shift_remove(name);
        self.modified = true;
        Ok(())
    }

    /// Clearing an exception list reverts it to the parent's seed.
    pub fn clear(&mut self) {
        self.clear_internal(true);
        self.modified = true;
    }

    pub(crate) fn clear_internal(&mut self, use_seed: bool) {
        let exception = self.is_exception_list();
        self.names
            .retain(|_, flags| !exception && flags.contains(ValueFlags::INHERITED));
        if use_seed {
            let seed = self.seed.clone();
            for name in seed {
                self.insert(&name, ValueFlags::INHERITED);
            }
        }
    }

    /// Forget that this list was seeded by a parent.
    pub(crate) fn clear_seed(&mut self) {
        self.seed.clear();
        self.from_parent = false;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
    }

    /// Names present in both lists. `self_tag` survives regardless.
    pub fn intersect(&self, other: &LockSet, self_tag: &str) -> Vec<String> {
        let (small, large) = if self.len() < other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .names()
            .filter(|name| large.contains(name) || *name == self_tag)
            .map(str::to_string)
            .collect()
    }

    /// Comma separated list of the names declared at this level, as written
    /// back to a document. Empty when nothing is local.
    pub fn local_attribute_value(&self) -> String {
        self.names()
            .filter(|name| !self.defined_in_parent(name))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Split a lock directive value on `,` `;` and `:`, dropping blanks.
pub fn split_lock_list(value: &str) -> Vec<String> {
    value
        .split(&[',', ';', ':'][..])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
