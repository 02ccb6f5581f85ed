//! Law-style properties: deep-equality laws, discovery determinism, and
//! call-sequence monotonicity over generated inputs.

use proptest::prelude::*;
use std::cell::Cell;
use std::rc::Rc;
use vouch::assertion::compare::deep_equal;
use vouch::mock::Spy;
use vouch::Value;

fn arb_json() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        (-1000i64..1000).prop_map(|n| serde_json::json!(n)),
        "[a-z]{0,8}".prop_map(serde_json::Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn deep_equal_is_reflexive(json in arb_json()) {
        let value = Value::from_json(&json);
        prop_assert!(deep_equal(&value, &value, 0.0));
    }

    #[test]
    fn deep_equal_is_symmetric(a in arb_json(), b in arb_json()) {
        let va = Value::from_json(&a);
        let vb = Value::from_json(&b);
        prop_assert_eq!(deep_equal(&va, &vb, 0.0), deep_equal(&vb, &va, 0.0));
    }

    #[test]
    fn deep_equal_agrees_with_json_equality(a in arb_json(), b in arb_json()) {
        // from_json produces fresh structures, so equality must be purely
        // structural and match serde_json's
        let va = Value::from_json(&a);
        let vb = Value::from_json(&b);
        prop_assert_eq!(deep_equal(&va, &vb, 0.0), a == b);
    }

    #[test]
    fn json_roundtrip_preserves_equality(json in arb_json()) {
        let value = Value::from_json(&json);
        let back = Value::from_json(&value.to_json());
        prop_assert!(deep_equal(&value, &back, 0.0));
    }

    #[test]
    fn discovery_is_deterministic(
        names in prop::collection::btree_set("[a-z]{1,8}_test", 1..8)
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        for name in &names {
            std::fs::write(dir.path().join(format!("{}.lua", name)), "").unwrap();
        }
        let mut config = vouch::config::ConfigStore::new();
        vouch::discovery::register_config(&mut config);

        let first = vouch::discovery::discover(&config, Some(dir.path()), None).unwrap();
        let second = vouch::discovery::discover(&config, Some(dir.path()), None).unwrap();
        prop_assert_eq!(&first.files, &second.files);
        prop_assert_eq!(first.files.len(), names.len());
        // lexicographic, case-sensitive
        prop_assert!(first.files.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn spy_sequence_numbers_strictly_increase(calls in prop::collection::vec(0usize..4, 1..32)) {
        let seq = Rc::new(Cell::new(0u64));
        let spies: Vec<Spy> = (0..4).map(|_| Spy::new(seq.clone(), None)).collect();
        for &which in &calls {
            spies[which].callable().call(&[]).unwrap();
        }
        let mut all: Vec<u64> = spies
            .iter()
            .flat_map(|spy| spy.calls().into_iter().map(|record| record.seq))
            .collect();
        all.sort_unstable();
        prop_assert_eq!(all.len(), calls.len());
        prop_assert!(all.windows(2).all(|w| w[0] < w[1]), "strictly increasing");
    }

    #[test]
    fn glob_star_matches_expansions(prefix in "[a-z]{0,5}", middle in "[a-z]{0,5}", suffix in "[a-z]{0,5}") {
        let pattern = format!("{}*{}", prefix, suffix);
        let candidate = format!("{}{}{}", prefix, middle, suffix);
        let re = vouch::fsys::glob_to_regex(&pattern).unwrap();
        prop_assert!(re.is_match(&candidate));
    }
}
