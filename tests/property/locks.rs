//! Lock propagation properties

use super::{inherit, load, SESSION_ATTRIBUTES};
use confstack::{LockKind, ScalarValue};
use proptest::prelude::*;

fn attribute_subset() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(SESSION_ATTRIBUTES.to_vec(), 1..=SESSION_ATTRIBUTES.len())
}

/// A locked value can never be changed below the level that locked it.
#[test]
fn test_locked_value_is_monotonic() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(1i64..=600, 1i64..=600, any::<bool>()),
            |(parent_timeout, child_timeout, locked)| {
                let lock = if locked { " lockAttributes=\"timeout\"" } else { "" };
                let parent = load(
                    None,
                    &format!(
                        "<configuration><session timeout=\"{}\"{}/></configuration>",
                        parent_timeout, lock
                    ),
                );
                let mut child = inherit(Some(&parent));
                let session = child.child_mut("session").unwrap();
                let result = session.set("timeout", Some(child_timeout.into()));

                let expected = if locked { parent_timeout } else { child_timeout };
                prop_assert_eq!(result.is_err(), locked);
                prop_assert_eq!(
                    session.get("timeout").unwrap(),
                    Some(&ScalarValue::Integer(expected))
                );

                let grandchild = inherit(Some(&child));
                prop_assert_eq!(
                    grandchild.child("session").unwrap().is_attribute_locked("timeout"),
                    locked
                );
                Ok(())
            },
        )
        .unwrap();
}

/// A level can only narrow the exception list it inherits.
#[test]
fn test_exception_list_only_narrows() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(attribute_subset(), attribute_subset()),
            |(parent_except, child_except)| {
                let parent = load(
                    None,
                    &format!(
                        "<configuration><session lockAllAttributesExcept=\"{}\"/></configuration>",
                        parent_except.join(",")
                    ),
                );
                let child = load(
                    Some(&parent),
                    &format!(
                        "<configuration><session lockAllAttributesExcept=\"{}\"/></configuration>",
                        child_except.join(",")
                    ),
                );
                let list = child
                    .child("session")
                    .unwrap()
                    .locks(LockKind::AttributesExcept)
                    .unwrap();
                for name in list.names() {
                    prop_assert!(
                        parent_except.iter().any(|p| *p == name),
                        "{} widened the list",
                        name
                    );
                }

                let open: Vec<&str> = parent_except
                    .iter()
                    .copied()
                    .filter(|name| child_except.contains(name))
                    .collect();
                let grandchild = inherit(Some(&child));
                let session = grandchild.child("session").unwrap();
                for name in SESSION_ATTRIBUTES {
                    prop_assert_eq!(
                        session.is_attribute_locked(name),
                        !open.contains(&name),
                        "{}",
                        name
                    );
                }
                Ok(())
            },
        )
        .unwrap();
}
