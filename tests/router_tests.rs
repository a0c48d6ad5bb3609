//! Unit tests for owner and read-set resolution.

use std::sync::Arc;

use hotshard::{DialogueStore, MemoryDialogueStore, ShardRouter};

fn router_with(num_defaults: usize) -> ShardRouter {
    let defaults: Vec<Arc<dyn DialogueStore>> = (0..num_defaults)
        .map(|i| Arc::new(MemoryDialogueStore::new(format!("default-{i}"))) as Arc<dyn DialogueStore>)
        .collect();
    ShardRouter::new(defaults)
}

#[cfg(test)]
mod owner_tests {
    use super::*;

    #[test]
    fn test_owner_deterministic() {
        let router = router_with(4);

        for user in [1i64, 2, 57, 1_000_003] {
            let first = router.resolve_owner(user);
            for _ in 0..10 {
                let again = router.resolve_owner(user);
                assert!(
                    Arc::ptr_eq(&first, &again),
                    "user {} must always route to the same default shard",
                    user
                );
            }
        }
    }

    #[test]
    fn test_mod_rule() {
        let router = router_with(4);

        assert_eq!(router.default_index(0), 0);
        assert_eq!(router.default_index(5), 1);
        assert_eq!(router.default_index(7), 3);
        assert_eq!(router.default_count(), 4);
    }

    #[test]
    fn test_single_default_shard_owns_everyone() {
        let router = router_with(1);

        let a = router.resolve_owner(1);
        let b = router.resolve_owner(999);
        assert!(Arc::ptr_eq(&a, &b));
    }
}

#[cfg(test)]
mod assignment_tests {
    use super::*;

    #[test]
    fn test_read_set_grows_on_flip() {
        let router = router_with(2);
        assert_eq!(router.resolve_read_set(7).len(), 1);
        assert!(!router.is_dedicated(7));

        let dedicated: Arc<dyn DialogueStore> = Arc::new(MemoryDialogueStore::new("user-7"));
        assert!(router.assign_dedicated(7, dedicated.clone()));

        assert!(router.is_dedicated(7));
        assert!(Arc::ptr_eq(&router.resolve_owner(7), &dedicated));

        // the default shard stays in the read set: pre-promotion history
        // and writes that raced the backfill still live there
        let read_set = router.resolve_read_set(7);
        assert_eq!(read_set.len(), 2);
        assert!(Arc::ptr_eq(&read_set[0], &router.default_store(7)));
        assert!(Arc::ptr_eq(&read_set[1], &dedicated));
    }

    #[test]
    fn test_first_assignment_wins() {
        let router = router_with(2);
        let first: Arc<dyn DialogueStore> = Arc::new(MemoryDialogueStore::new("user-7"));
        let second: Arc<dyn DialogueStore> = Arc::new(MemoryDialogueStore::new("user-7-again"));

        assert!(router.assign_dedicated(7, first.clone()));
        assert!(!router.assign_dedicated(7, second));
        assert!(Arc::ptr_eq(&router.resolve_owner(7), &first));
    }

    #[test]
    fn test_flip_leaves_other_users_untouched() {
        let router = router_with(2);
        let before = router.resolve_owner(8);

        router.assign_dedicated(7, Arc::new(MemoryDialogueStore::new("user-7")));

        assert!(Arc::ptr_eq(&before, &router.resolve_owner(8)));
        assert_eq!(router.dedicated_users(), vec![7]);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn mod_rule_is_total_and_stable(user in any::<i64>(), shards in 1usize..=16) {
            let router = router_with(shards);
            let idx = router.default_index(user);
            prop_assert!(idx < shards);
            prop_assert_eq!(idx, router.default_index(user));
        }
    }
}
