//! Host hooks: string transforms and target-version filtering applied on write.

use crate::element::Element;
use std::fmt;
use std::sync::Arc;

/// Callbacks supplied by the host that owns a configuration tree.
///
/// Every method has a pass-through default.
pub trait HostHooks: Send + Sync {
    /// Applied to properties flagged as holding type names.
    fn transform_type_string(&self, value: &str) -> String {
        value.to_string()
    }

    /// Applied to properties flagged as holding assembly names.
    fn transform_assembly_string(&self, value: &str) -> String {
        value.to_string()
    }

    /// Compatibility version output is being written for, if any.
    fn target_version(&self) -> Option<&str> {
        None
    }

    /// Whether `property` of `element` is valid under `version`.
    fn should_serialize_property(&self, _element: &Element, _property: &str, _version: &str) -> bool {
        true
    }

    /// Whether the child element written as `name` is valid under `version`.
    fn should_serialize_element(&self, _element: &Element, _name: &str, _version: &str) -> bool {
        true
    }
}

/// Shared handle to the host hooks of a tree.
#[derive(Clone)]
pub struct HostContext(Arc<dyn HostHooks>);

impl HostContext {
    pub fn new(hooks: impl HostHooks + 'static) -> Self {
        Self(Arc::new(hooks))
    }

    pub fn hooks(&self) -> &dyn HostHooks {
        self.0.as_ref()
    }

    pub fn ptr_eq(&self, other: &HostContext) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("target_version", &self.0.target_version())
            .finish()
    }
}

/// Hooks that only pin a target version.
#[derive(Debug, Clone)]
pub struct TargetVersion(pub String);

impl HostHooks for TargetVersion {
    fn target_version(&self) -> Option<&str> {
        Some(&self.0)
    }
}
