//! Round trips through save and reload

use super::{add_setting, inherit, load, section};
use confstack::{ElementKey, SaveMode};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn settings_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z]{1,6}", "[A-Za-z0-9]{0,8}", 0..5)
}

/// A full save of a level, reloaded with no parent, reproduces it.
#[test]
fn test_full_save_reproduces_level() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(1i64..=600, "[A-Za-z]{1,8}", settings_strategy()),
            |(timeout, mode, settings)| {
                let mut level = inherit(None);
                let session = level.child_mut("session").unwrap();
                session.set("timeout", Some(timeout.into())).unwrap();
                session.set("mode", Some(mode.as_str().into())).unwrap();
                for (key, value) in &settings {
                    add_setting(&mut level, key, value);
                }

                let text = section()
                    .save(&level, None, SaveMode::Full)
                    .unwrap()
                    .unwrap();
                let reloaded = load(None, &text);
                prop_assert_eq!(&reloaded, &level);
                Ok(())
            },
        )
        .unwrap();
}

/// Saving the reloaded minimal delta again writes the same text.
#[test]
fn test_minimal_save_is_idempotent() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                settings_strategy(),
                settings_strategy(),
                prop::option::of(1i64..=600),
                any::<bool>(),
            ),
            |(inherited, added, timeout, drop_first)| {
                let mut parent = inherit(None);
                for (key, value) in &inherited {
                    add_setting(&mut parent, key, value);
                }

                let mut child = inherit(Some(&parent));
                if let Some(timeout) = timeout {
                    child
                        .child_mut("session")
                        .unwrap()
                        .set("timeout", Some(timeout.into()))
                        .unwrap();
                }
                if drop_first {
                    if let Some(key) = inherited.keys().next() {
                        child
                            .child_mut("appSettings")
                            .unwrap()
                            .remove_item(&ElementKey::single(key.as_str()))
                            .unwrap();
                    }
                }
                for (key, value) in &added {
                    add_setting(&mut child, &format!("{}0", key), value);
                }

                let first = section()
                    .save(&child, Some(&parent), SaveMode::Minimal)
                    .unwrap();
                let reloaded = load(
                    Some(&parent),
                    first.as_deref().unwrap_or("<configuration/>"),
                );
                prop_assert_eq!(&reloaded, &child);
                let second = section()
                    .save(&reloaded, Some(&parent), SaveMode::Minimal)
                    .unwrap();
                prop_assert_eq!(first, second);
                Ok(())
            },
        )
        .unwrap();
}
