//! Locks declared at one level and enforced at the levels below it

use super::test_utils::{load, web_section};
use confstack::{ElementKey, ErrorKind, LevelSource, LockKind, SaveMode, ScalarValue};

#[test]
fn test_locked_attribute_survives_child_assignment() {
    let machine = load(
        None,
        "<configuration><session timeout=\"30\" lockAttributes=\"timeout\"/></configuration>",
    );
    let mut app = load(Some(&machine), "<configuration/>");
    let session = app.child_mut("session").unwrap();
    assert!(session.is_attribute_locked("timeout"));

    let err = session.set("timeout", Some(60.into())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(30)));
    session.set("mode", Some("StateServer".into())).unwrap();
}

#[test]
fn test_locked_attribute_in_child_document_is_reported() {
    let machine = load(
        None,
        "<configuration><session timeout=\"30\" lockAttributes=\"timeout\"/></configuration>",
    );
    let parsed = web_section()
        .parse(
            Some(&machine),
            "app.config",
            "<configuration>\n  <session timeout=\"60\" mode=\"Off\"/>\n</configuration>",
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::LockViolation);
    assert_eq!(parsed.errors[0].location().unwrap().line, 2);

    let session = parsed.element.child("session").unwrap();
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(30)));
    assert_eq!(session.get("mode").unwrap(), Some(&ScalarValue::from("Off")));
}

#[test]
fn test_exception_list_locks_everything_else() {
    let machine = load(
        None,
        "<configuration><session lockAllAttributesExcept=\"mode\"/></configuration>",
    );
    let mut app = load(Some(&machine), "<configuration/>");
    let session = app.child_mut("session").unwrap();
    assert!(session.is_attribute_locked("timeout"));
    assert!(!session.is_attribute_locked("mode"));
    assert!(session.set("timeout", Some(10.into())).is_err());
    session.set("mode", Some("Off".into())).unwrap();
}

#[test]
fn test_exception_list_narrowed_to_nothing_locks_every_attribute_below() {
    let machine = load(
        None,
        "<configuration><session timeout=\"30\" lockAllAttributesExcept=\"mode\"/></configuration>",
    );
    let site = load(
        Some(&machine),
        "<configuration><session lockAllAttributesExcept=\"timeout\"/></configuration>",
    );
    let mut app = load(Some(&site), "<configuration/>");
    let session = app.child_mut("session").unwrap();
    assert!(session.is_attribute_locked("timeout"));
    assert!(session.is_attribute_locked("mode"));

    let err = session.set("timeout", Some(60.into())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(30)));

    let parsed = web_section()
        .parse(
            Some(&site),
            "app.config",
            "<configuration><session timeout=\"60\"/></configuration>",
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::LockViolation);
}

#[test]
fn test_lock_reaches_every_lower_level() {
    let levels = vec![
        LevelSource::new(
            "machine.config",
            "<configuration><session timeout=\"30\" lockAttributes=\"timeout\"/></configuration>",
        ),
        LevelSource::new("site.config", "<configuration><session mode=\"Off\"/></configuration>"),
        LevelSource::new(
            "app.config",
            "<configuration><session timeout=\"5\"/></configuration>",
        ),
    ];
    let problems = web_section().check(&levels);
    assert_eq!(problems.len(), 1, "{:?}", problems);
    assert_eq!(problems[0].kind(), ErrorKind::LockViolation);
    assert_eq!(problems[0].location().unwrap().file, "app.config");
}

#[test]
fn test_locked_element_cannot_appear_below() {
    let machine = load(
        None,
        "<configuration lockElements=\"session\"><session timeout=\"30\"/></configuration>",
    );
    let parsed = web_section()
        .parse(
            Some(&machine),
            "app.config",
            "<configuration><session timeout=\"40\"/></configuration>",
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::LockViolation);
    assert!(parsed.errors[0].to_string().contains("'session'"));
    let session = parsed.element.child("session").unwrap();
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(30)));
}

#[test]
fn test_locked_item_cannot_be_removed_or_redeclared() {
    let machine = load(
        None,
        r#"<configuration><appSettings><add key="a" value="1" lockItem="true"/></appSettings></configuration>"#,
    );
    let mut app = load(Some(&machine), "<configuration/>");
    let settings = app.child_mut("appSettings").unwrap();
    let err = settings.remove_item(&ElementKey::single("a")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);

    let parsed = web_section()
        .parse(
            Some(&machine),
            "app.config",
            r#"<configuration><appSettings><add key="a" value="2"/></appSettings></configuration>"#,
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::LockViolation);
}

#[test]
fn test_invalid_lock_target_names_the_alternatives() {
    let parsed = web_section()
        .parse(
            None,
            "machine.config",
            "<configuration><session lockAttributes=\"colour\"/></configuration>",
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::SchemaViolation);
    let message = parsed.errors[0].to_string();
    assert!(message.contains("'timeout'"), "{}", message);
    assert!(message.contains("'mode'"), "{}", message);
}

#[test]
fn test_lock_added_through_api_is_written() {
    let machine = load(None, "<configuration><session timeout=\"30\"/></configuration>");
    let mut app = load(Some(&machine), "<configuration/>");
    app.child_mut("session")
        .unwrap()
        .add_lock(LockKind::Attributes, "mode")
        .unwrap();

    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    assert!(text.contains("lockAttributes=\"mode\""), "{}", text);
    assert!(!text.contains("timeout"), "{}", text);
}

#[test]
fn test_inherited_lock_is_not_rewritten_in_minimal_mode() {
    let machine_text =
        "<configuration><session timeout=\"30\" lockAttributes=\"timeout\"/></configuration>";
    let machine = load(None, machine_text);
    let app = load(Some(&machine), "<configuration/>");
    let saved = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap();
    assert_eq!(saved, None);

    let machine_saved = web_section()
        .save(&machine, None, SaveMode::Minimal)
        .unwrap()
        .unwrap();
    assert!(machine_saved.contains("lockAttributes=\"timeout\""), "{}", machine_saved);
    assert!(machine_saved.contains("timeout=\"30\""), "{}", machine_saved);
}
