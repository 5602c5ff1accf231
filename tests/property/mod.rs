//! Property tests over randomly generated levels

pub mod inheritance;
pub mod locks;

use confstack::schema::IntegerRange;
use confstack::{
    CollectionSchema, CollectionType, Element, NodeSchema, PropertyDescriptor, Section,
};
use std::sync::Arc;

/// `configuration` with an add/remove/clear `appSettings` and a `session`
/// element carrying four plain attributes.
pub fn schema() -> Arc<NodeSchema> {
    let add = NodeSchema::builder("add")
        .property(PropertyDescriptor::string("key").key().required())
        .property(PropertyDescriptor::string("value"))
        .build()
        .unwrap();
    let app_settings = NodeSchema::builder("appSettings")
        .collection(CollectionSchema::new(CollectionType::AddRemoveClearMap, add))
        .build()
        .unwrap();
    let session = NodeSchema::builder("session")
        .property(
            PropertyDescriptor::integer("timeout")
                .with_default(20)
                .with_validator(IntegerRange { min: 1, max: 600 }),
        )
        .property(PropertyDescriptor::string("mode").with_default("InProc"))
        .property(PropertyDescriptor::string("cookie"))
        .property(PropertyDescriptor::boolean("secure").with_default(false))
        .build()
        .unwrap();
    NodeSchema::builder("configuration")
        .property(PropertyDescriptor::element("appSettings", app_settings))
        .property(PropertyDescriptor::element("session", session))
        .build()
        .unwrap()
}

pub const SESSION_ATTRIBUTES: [&str; 4] = ["timeout", "mode", "cookie", "secure"];

pub fn section() -> Section {
    Section::new("configuration", schema())
}

pub fn load(parent: Option<&Element>, text: &str) -> Element {
    section()
        .load(parent, "prop.config", text)
        .unwrap_or_else(|e| panic!("failed to load {:?}: {}", text, e))
}

/// A fresh level inheriting from `parent`.
pub fn inherit(parent: Option<&Element>) -> Element {
    load(parent, "<configuration/>")
}

/// Add `key=value` to the appSettings of `root`.
pub fn add_setting(root: &mut Element, key: &str, value: &str) {
    let settings = root.child_mut("appSettings").unwrap();
    let mut item = settings.create_item().unwrap();
    item.set("key", Some(key.into())).unwrap();
    item.set("value", Some(value.into())).unwrap();
    settings.add_item(item).unwrap();
}
