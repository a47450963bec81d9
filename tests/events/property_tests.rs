use proptest::prelude::*;

use param_rs::{Context, Value};

use crate::test_helpers::{delivery_log, numbered_class};

proptest! {
    #[test]
    fn prop_single_fire_per_batch(count in 1usize..8, mask in any::<u8>()) {
        let ctx = Context::new();
        let obj = numbered_class(&ctx, count).new_instance().unwrap();
        let names: Vec<String> = (0..count).map(|i| format!("p{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (seen, record) = delivery_log();
        let _watcher = obj.param().watch(record, &refs).unwrap();

        let changed: Vec<&str> = refs
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, name)| *name)
            .collect();
        obj.param()
            .batch(|| {
                for name in &refs {
                    let value = if changed.contains(name) { 1 } else { 0 };
                    obj.set(name, value)?;
                }
                Ok(())
            })
            .unwrap();

        let seen = seen.borrow();
        if changed.is_empty() {
            prop_assert!(seen.is_empty());
        } else {
            prop_assert_eq!(seen.len(), 1);
            let mut delivered: Vec<&str> = seen[0].iter().map(|(n, _)| n.as_str()).collect();
            delivered.sort_unstable();
            let mut expected = changed.clone();
            expected.sort_unstable();
            prop_assert_eq!(delivered, expected);
        }
    }

    #[test]
    fn prop_onlychanged_suppresses_equal_values(values in prop::collection::vec(-3i64..3, 1..20)) {
        let ctx = Context::new();
        let obj = numbered_class(&ctx, 1).new_instance().unwrap();
        let (seen, record) = delivery_log();
        let _watcher = obj.param().watch(record, &["p0"]).unwrap();

        let mut current = 0i64;
        let mut expected = 0usize;
        for value in values {
            obj.set("p0", value).unwrap();
            if value != current {
                expected += 1;
            }
            current = value;
        }
        prop_assert_eq!(seen.borrow().len(), expected);
        prop_assert_eq!(obj.get("p0").unwrap(), Value::Int(current));
    }
}
