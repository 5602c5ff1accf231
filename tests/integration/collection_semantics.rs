//! Collection membership across levels: basic maps, add/remove/clear maps,
//! tombstones and the directives written back out

use super::test_utils::{keys, load, web_section};
use confstack::{ElementKey, EntryStatus, ErrorKind, SaveMode, ScalarValue};

const MACHINE: &str = r#"<configuration>
  <appSettings>
    <add key="a" value="1"/>
    <add key="b" value="2"/>
  </appSettings>
  <sites>
    <site id="1" v="a"/>
    <site id="2" v="b"/>
  </sites>
</configuration>"#;

#[test]
fn test_basic_map_appends_child_members_after_inherited_ones() {
    let machine = load(None, MACHINE);
    let app = load(
        Some(&machine),
        "<configuration><sites><site id=\"3\" v=\"c\"/></sites></configuration>",
    );
    let sites = app.child("sites").unwrap();
    assert_eq!(keys(sites), vec!["1", "2", "3"]);

    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    assert!(text.contains("id=\"3\""), "{}", text);
    assert!(!text.contains("id=\"1\""), "{}", text);
    assert!(!text.contains("id=\"2\""), "{}", text);
}

#[test]
fn test_basic_map_redeclaration_replaces_in_place() {
    let machine = load(None, MACHINE);
    let app = load(
        Some(&machine),
        "<configuration><sites><site id=\"1\" v=\"z\"/></sites></configuration>",
    );
    let sites = app.child("sites").unwrap();
    assert_eq!(keys(sites), vec!["1", "2"]);
    let first = sites.item(&ElementKey::single(1)).unwrap();
    assert_eq!(first.get("v").unwrap(), Some(&ScalarValue::from("z")));
}

#[test]
fn test_basic_map_keeps_inherited_members() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    let sites = app.child_mut("sites").unwrap();
    let err = sites.remove_item(&ElementKey::single(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    assert_eq!(keys(sites), vec!["1", "2"]);
}

#[test]
fn test_remove_directive_leaves_tombstone() {
    let machine = load(None, MACHINE);
    let app = load(
        Some(&machine),
        "<configuration><appSettings><remove key=\"a\"/></appSettings></configuration>",
    );
    let settings = app.child("appSettings").unwrap();
    assert_eq!(keys(settings), vec!["b"]);
    assert!(settings.is_item_removed(&ElementKey::single("a")));

    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    assert!(text.contains("<remove key=\"a\"/>"), "{}", text);
    assert!(!text.contains("<add"), "{}", text);
}

#[test]
fn test_clear_drops_inherited_members() {
    let machine = load(None, MACHINE);
    let app = load(
        Some(&machine),
        r#"<configuration><appSettings><clear/><add key="c" value="3"/></appSettings></configuration>"#,
    );
    let settings = app.child("appSettings").unwrap();
    assert_eq!(keys(settings), vec!["c"]);

    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    let clear = text.find("<clear/>").expect("clear directive written");
    let add = text.find("<add key=\"c\"").expect("member written");
    assert!(clear < add, "{}", text);
}

#[test]
fn test_remove_and_readd_is_written_as_replacement() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    let settings = app.child_mut("appSettings").unwrap();
    let key = ElementKey::single("a");
    settings.remove_item(&key).unwrap();
    let mut item = settings.create_item().unwrap();
    item.set("key", Some("a".into())).unwrap();
    item.set("value", Some("z".into())).unwrap();
    settings.add_item(item).unwrap();

    let status = settings
        .collection()
        .unwrap()
        .entries()
        .iter()
        .find(|e| e.key() == &key)
        .map(|e| e.status());
    assert_eq!(status, Some(EntryStatus::Replaced));
    assert_eq!(
        settings.item(&key).unwrap().get("value").unwrap(),
        Some(&ScalarValue::from("z"))
    );

    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Modified)
        .unwrap()
        .unwrap();
    let remove = text.find("<remove key=\"a\"/>").expect("remove written");
    let add = text.find("<add key=\"a\" value=\"z\"/>").expect("add written");
    assert!(remove < add, "{}", text);
    assert!(!text.contains("key=\"b\""), "{}", text);
}

#[test]
fn test_indexed_readd_consumes_the_removal() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    let settings = app.child_mut("appSettings").unwrap();
    let key = ElementKey::single("a");
    settings.remove_item(&key).unwrap();
    assert!(settings.is_item_removed(&key));

    let mut item = settings.create_item().unwrap();
    item.set("key", Some("a".into())).unwrap();
    item.set("value", Some("2".into())).unwrap();
    settings.add_item_at(0, item).unwrap();

    assert!(!settings.is_item_removed(&key));
    assert_eq!(settings.item_count(), 2);
    assert_eq!(settings.item_index(&key), Some(0));
    let entries = settings.collection().unwrap().entries();
    assert_eq!(entries.iter().filter(|e| e.key() == &key).count(), 1);
    assert_eq!(settings.collection().unwrap().removed_count(), 0);
    let status = entries.iter().find(|e| e.key() == &key).map(|e| e.status());
    assert_eq!(status, Some(EntryStatus::Replaced));

    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Modified)
        .unwrap()
        .unwrap();
    let remove = text.find("<remove key=\"a\"/>").expect("remove written");
    let add = text.find("<add key=\"a\" value=\"2\"/>").expect("add written");
    assert!(remove < add, "{}", text);
}

#[test]
fn test_distinct_duplicate_is_rejected() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    let settings = app.child_mut("appSettings").unwrap();
    let mut item = settings.create_item().unwrap();
    item.set("key", Some("a".into())).unwrap();
    item.set("value", Some("other".into())).unwrap();
    let err = settings.add_item(item).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
}

#[test]
fn test_duplicate_in_document_is_reported() {
    let parsed = web_section()
        .parse(
            None,
            "dup.config",
            r#"<configuration><appSettings>
  <add key="a" value="1"/>
  <add key="a" value="2"/>
</appSettings></configuration>"#,
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::DuplicateKey);
    assert_eq!(parsed.errors[0].location().map(|l| l.line), Some(3));

    let settings = parsed.element.child("appSettings").unwrap();
    let first = settings.item(&ElementKey::single("a")).unwrap();
    assert_eq!(first.get("value").unwrap(), Some(&ScalarValue::from("1")));
}

#[test]
fn test_missing_key_is_reported_and_member_skipped() {
    let parsed = web_section()
        .parse(
            None,
            "nokey.config",
            "<configuration><appSettings><add value=\"1\"/></appSettings></configuration>",
        )
        .unwrap();
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].kind(), ErrorKind::RequiredMissing);
    assert_eq!(parsed.element.child("appSettings").unwrap().item_count(), 0);
}

#[test]
fn test_positional_access() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    let settings = app.child_mut("appSettings").unwrap();
    assert_eq!(settings.item_key_at(1), Some(ElementKey::single("b")));
    assert_eq!(settings.item_index(&ElementKey::single("a")), Some(0));

    let mut item = settings.create_item().unwrap();
    item.set("key", Some("first".into())).unwrap();
    settings.add_item_at(0, item).unwrap();
    assert_eq!(keys(settings), vec!["first", "a", "b"]);

    settings.remove_item_at(1).unwrap();
    assert_eq!(keys(settings), vec!["first", "b"]);
    assert!(settings.remove_item_at(5).is_err());
}
