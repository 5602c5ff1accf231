//! Shared fixtures for integration tests
//!
//! A small web-style schema used across the suites, plus helpers for
//! environment isolation when settings files are involved.

use confstack::schema::IntegerRange;
use confstack::{
    CollectionSchema, CollectionType, Element, NodeSchema, PropertyDescriptor, Section,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Global mutex to serialize HOME/XDG environment access across tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// `configuration` root with an add/remove/clear `appSettings`, a basic
/// `sites` list and a `session` element.
pub fn web_schema() -> Arc<NodeSchema> {
    let add = NodeSchema::builder("add")
        .property(PropertyDescriptor::string("key").key().required())
        .property(PropertyDescriptor::string("value"))
        .build()
        .unwrap();
    let app_settings = NodeSchema::builder("appSettings")
        .collection(CollectionSchema::new(CollectionType::AddRemoveClearMap, add))
        .build()
        .unwrap();
    let site = NodeSchema::builder("site")
        .property(PropertyDescriptor::integer("id").key().required())
        .property(PropertyDescriptor::string("v"))
        .build()
        .unwrap();
    let sites = NodeSchema::builder("sites")
        .collection(CollectionSchema::new(CollectionType::BasicMap, site))
        .build()
        .unwrap();
    let session = NodeSchema::builder("session")
        .property(
            PropertyDescriptor::integer("timeout")
                .with_default(20)
                .with_validator(IntegerRange { min: 1, max: 600 }),
        )
        .property(PropertyDescriptor::string("mode").with_default("InProc"))
        .build()
        .unwrap();
    NodeSchema::builder("configuration")
        .property(PropertyDescriptor::element("appSettings", app_settings))
        .property(PropertyDescriptor::element("sites", sites))
        .property(PropertyDescriptor::element("session", session))
        .build()
        .unwrap()
}

pub fn web_section() -> Section {
    Section::new("configuration", web_schema())
}

/// Parse `text` over `parent`, panicking on any error.
pub fn load(parent: Option<&Element>, text: &str) -> Element {
    web_section()
        .load(parent, "test.config", text)
        .unwrap_or_else(|e| panic!("failed to load {:?}: {}", text, e))
}

/// Keys of the live members of a collection, as text.
pub fn keys(collection: &Element) -> Vec<String> {
    collection
        .item_keys()
        .iter()
        .map(ToString::to_string)
        .collect()
}

pub const MANIFEST: &str = r#"
root = "configuration"

[[types]]
name = "add"
properties = [
    { name = "key", kind = "string", key = true, required = true },
    { name = "value", kind = "string" },
]

[[types]]
name = "appSettings"
collection = { type = "add_remove_clear_map", item = "add" }

[[types]]
name = "session"
properties = [
    { name = "timeout", kind = "integer", default = 20, range = { min = 1, max = 600 } },
    { name = "mode", kind = "string", default = "InProc" },
]

[[types]]
name = "configuration"
properties = [
    { name = "appSettings", element = "appSettings" },
    { name = "session", element = "session" },
]
"#;

/// Run `f` with HOME and XDG_CONFIG_HOME pointed inside `home`, restoring
/// both afterwards.
pub fn with_isolated_home<F, R>(home: &Path, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved_home = std::env::var_os("HOME");
    let saved_xdg = std::env::var_os("XDG_CONFIG_HOME");

    std::fs::create_dir_all(home).unwrap();
    std::env::set_var("HOME", home);
    std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));

    let result = f();

    match saved_home {
        Some(v) => std::env::set_var("HOME", v),
        None => std::env::remove_var("HOME"),
    }
    match saved_xdg {
        Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}
