//! Whole stacks: resolving, checking and writing levels back

use super::test_utils::{keys, load, web_section};
use confstack::{
    CollectionSchema, CollectionType, Element, ErrorKind, HostContext, HostHooks, LevelSource,
    NodeSchema, PropertyDescriptor, SaveMode, ScalarValue, Section,
};
use std::sync::Arc;

const MACHINE: &str = r#"<configuration>
  <appSettings>
    <add key="a" value="1"/>
  </appSettings>
  <session timeout="45"/>
</configuration>"#;

#[test]
fn test_resolve_returns_every_level() {
    let levels = vec![
        LevelSource::new("machine.config", MACHINE),
        LevelSource::missing("site.config"),
        LevelSource::new(
            "app.config",
            r#"<configuration><appSettings><add key="b" value="2"/></appSettings></configuration>"#,
        ),
    ];
    let resolved = web_section().resolve(&levels).unwrap();
    assert_eq!(resolved.len(), 3);
    assert_eq!(keys(resolved[1].child("appSettings").unwrap()), vec!["a"]);
    assert_eq!(keys(resolved[2].child("appSettings").unwrap()), vec!["a", "b"]);
    assert_eq!(
        resolved[2].child("session").unwrap().get("timeout").unwrap(),
        Some(&ScalarValue::Integer(45))
    );
}

#[test]
fn test_resolve_fails_on_first_bad_level() {
    let levels = vec![
        LevelSource::new("machine.config", MACHINE),
        LevelSource::new("app.config", "<configuration><session colour=\"red\"/></configuration>"),
    ];
    let err = web_section().resolve(&levels).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaViolation);
    assert_eq!(err.location().unwrap().file, "app.config");
}

#[test]
fn test_check_continues_past_malformed_level() {
    let levels = vec![
        LevelSource::new("machine.config", MACHINE),
        LevelSource::new("site.config", "<configuration><session"),
        LevelSource::new("app.config", "<configuration><session colour=\"red\"/></configuration>"),
    ];
    let problems = web_section().check(&levels);
    assert_eq!(problems.len(), 2, "{:?}", problems);
    assert_eq!(problems[0].kind(), ErrorKind::Document);
    assert_eq!(problems[1].kind(), ErrorKind::SchemaViolation);
}

#[test]
fn test_saved_delta_reloads_to_the_same_node() {
    let machine = load(None, MACHINE);
    let app = load(
        Some(&machine),
        r#"<configuration>
  <appSettings>
    <add key="c" value="3"/>
  </appSettings>
  <session mode="Off"/>
</configuration>"#,
    );
    let section = web_section();
    let text = section
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    let reloaded = load(Some(&machine), &text);
    assert_eq!(reloaded, app);

    let again = section
        .save(&reloaded, Some(&machine), SaveMode::Minimal)
        .unwrap();
    assert_eq!(again.as_deref(), Some(text.as_str()));
}

#[test]
fn test_save_output_is_indented() {
    let app = load(
        None,
        r#"<configuration><appSettings><add key="a" value="1"/></appSettings></configuration>"#,
    );
    let text = web_section().save(&app, None, SaveMode::Minimal).unwrap().unwrap();
    assert_eq!(
        text,
        "<configuration>\n  <appSettings>\n    <add key=\"a\" value=\"1\"/>\n  </appSettings>\n</configuration>"
    );
}

#[derive(Debug)]
struct LegacyHost;

impl HostHooks for LegacyHost {
    fn transform_type_string(&self, value: &str) -> String {
        format!("{}, Legacy", value)
    }

    fn target_version(&self) -> Option<&str> {
        Some("1.0")
    }

    fn should_serialize_property(&self, _element: &Element, property: &str, version: &str) -> bool {
        !(version == "1.0" && property == "optimizer")
    }
}

fn host_schema() -> Arc<NodeSchema> {
    let compilation = NodeSchema::builder("compilation")
        .property(PropertyDescriptor::boolean("debug").with_default(false))
        .property(PropertyDescriptor::string("optimizer").version_checked())
        .property(PropertyDescriptor::string("handlerType").transforms_type_string())
        .build()
        .unwrap();
    let module = NodeSchema::builder("add")
        .property(PropertyDescriptor::string("name").key().required())
        .build()
        .unwrap();
    let module_list = NodeSchema::builder("moduleList")
        .collection(CollectionSchema::new(CollectionType::AddRemoveClearMap, module))
        .build()
        .unwrap();
    let modules = NodeSchema::builder("modules")
        .property(PropertyDescriptor::boolean("enabled").with_default(true))
        .property(PropertyDescriptor::default_collection(module_list))
        .build()
        .unwrap();
    NodeSchema::builder("configuration")
        .property(PropertyDescriptor::element("compilation", compilation))
        .property(PropertyDescriptor::element("modules", modules))
        .build()
        .unwrap()
}

#[test]
fn test_host_hooks_shape_written_output() {
    let section = Section::new("configuration", host_schema()).with_context(HostContext::new(LegacyHost));
    let app = section
        .load(
            None,
            "app.config",
            r#"<configuration><compilation debug="true" optimizer="fast" handlerType="Web.Handler"/></configuration>"#,
        )
        .unwrap();
    let compilation = app.child("compilation").unwrap();
    assert_eq!(compilation.get("optimizer").unwrap(), Some(&ScalarValue::from("fast")));

    let text = section.save(&app, None, SaveMode::Minimal).unwrap().unwrap();
    assert!(text.contains("debug=\"true\""), "{}", text);
    assert!(!text.contains("optimizer"), "{}", text);
    assert!(text.contains("handlerType=\"Web.Handler, Legacy\""), "{}", text);
}

#[test]
fn test_default_collection_directives_sit_inside_owner() {
    let section = Section::new("configuration", host_schema());
    let machine = section
        .load(
            None,
            "machine.config",
            r#"<configuration><modules><add name="auth"/><add name="cache"/></modules></configuration>"#,
        )
        .unwrap();
    let app = section
        .load(
            Some(&machine),
            "app.config",
            r#"<configuration><modules enabled="false"><remove name="auth"/></modules></configuration>"#,
        )
        .unwrap();
    let modules = app.child("modules").unwrap();
    assert_eq!(modules.get("enabled").unwrap(), Some(&ScalarValue::Boolean(false)));
    assert_eq!(keys(modules.default_collection().unwrap()), vec!["cache"]);

    let text = section
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    assert!(text.contains("<modules enabled=\"false\">"), "{}", text);
    assert!(text.contains("<remove name=\"auth\"/>"), "{}", text);
    assert!(!text.contains("cache"), "{}", text);
}
