//! End-to-end reconciliation cycles over an in-memory store.

use std::collections::BTreeSet;

use converge_core::{ConfigCategory, Identity, MessageHash};
use converge_engine::{EngineError, EngineEvent};
use converge_groups::GroupControlMessage;
use converge_store::DumpStore;
use converge_testkit::{delta_for, group_of, wire_message, TestAccount};

/// Two devices edit disjoint profile fields; a third device merging
/// both deltas keeps both edits.
#[tokio::test]
async fn concurrent_disjoint_profile_edits_both_survive() {
    let account = TestAccount::with_seed(1);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    let rename = delta_for(ConfigCategory::UserProfile, |config| {
        config
            .as_profile_mut()
            .unwrap()
            .set_display_name("Alicia", 100);
    });
    let avatar = delta_for(ConfigCategory::UserProfile, |config| {
        config
            .as_profile_mut()
            .unwrap()
            .set_avatar("http://files/avatar.png", b"avatar-key", 105);
    });

    engine
        .handle_incoming(
            &local,
            vec![
                wire_message(ConfigCategory::UserProfile, 100, "hash-rename", rename, 1),
                wire_message(ConfigCategory::UserProfile, 105, "hash-avatar", avatar, 1),
            ],
        )
        .await
        .unwrap();

    let (name, url) = engine
        .with_config(ConfigCategory::UserProfile, &local, |config| {
            let profile = config.as_profile().unwrap();
            (
                profile.display_name().map(str::to_string),
                profile.avatar_url().map(str::to_string),
            )
        })
        .await
        .unwrap();

    assert_eq!(name.as_deref(), Some("Alicia"));
    assert_eq!(url.as_deref(), Some("http://files/avatar.png"));
}

/// An admin-sent removal shrinks the member set, rotates the group key,
/// and addresses the fresh pair to each survivor.
#[tokio::test]
async fn member_removal_rotates_and_flags_push() {
    let alice = TestAccount::with_seed(1);
    let bob = TestAccount::with_seed(2);
    let carol = TestAccount::with_seed(3);

    let engine = alice.engine();
    let group = group_of(
        "03group",
        "trio",
        &[(&alice.keys, true), (&bob.keys, false), (&carol.keys, false)],
        1000,
    );
    engine.register_group(group);

    let outcome = engine
        .handle_group_control(
            &Identity::new("03group"),
            &alice.identity(),
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![bob.identity()],
            },
            2000,
        )
        .await
        .unwrap();

    assert!(outcome.needs_push);
    assert_eq!(outcome.distributions.len(), 1);
    assert_eq!(outcome.distributions[0].0, carol.identity());

    let group = engine.group(&Identity::new("03group")).unwrap();
    assert_eq!(group.members.len(), 2);
    assert_eq!(group.key_pairs.len(), 2);

    // The rotation landed in the push path.
    let pushes = engine
        .compute_pending_pushes(&alice.identity())
        .await
        .unwrap();
    assert!(pushes
        .iter()
        .any(|p| p.category == ConfigCategory::UserGroups));
}

/// Removal of the local user clears the key history, emits a disband
/// event, and deletes the group's dumps.
#[tokio::test]
async fn self_removal_tears_down_group_state() {
    let alice = TestAccount::with_seed(1);
    let bob = TestAccount::with_seed(2);

    let (engine, mut events) = bob.engine_with_events();
    let group = group_of(
        "03group",
        "duo",
        &[(&alice.keys, true), (&bob.keys, false)],
        1000,
    );
    engine.register_group(group);

    let outcome = engine
        .handle_group_control(
            &Identity::new("03group"),
            &alice.identity(),
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![bob.identity()],
            },
            2000,
        )
        .await
        .unwrap();

    assert!(outcome.disbanded);
    assert!(engine.group(&Identity::new("03group")).is_none());

    let mut disbanded = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::GroupDisbanded { group } = event {
            assert_eq!(group, Identity::new("03group"));
            disbanded = true;
        }
    }
    assert!(disbanded);

    for category in ConfigCategory::in_priority_order() {
        assert!(bob
            .store
            .load_dump(category, &Identity::new("03group"))
            .await
            .unwrap()
            .is_none());
    }
}

/// A push cycle drains pending state: computing twice without an
/// intervening mutation yields a payload once.
#[tokio::test]
async fn push_cycle_drains_pending_state() {
    let account = TestAccount::with_seed(4);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    engine
        .with_config(ConfigCategory::Contacts, &local, |config| {
            let contacts = config.as_contacts_mut().unwrap();
            contacts.set_approved(&Identity::new("05friend"), true, 100);
        })
        .await
        .unwrap();

    let first = engine.compute_pending_pushes(&local).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].category, ConfigCategory::Contacts);
    assert!(!first[0].payload.is_empty());

    let second = engine.compute_pending_pushes(&local).await.unwrap();
    assert!(second.is_empty());
}

/// A corrupt cached dump reinitializes empty state instead of crashing,
/// and subsequent edits still produce a valid push.
#[tokio::test]
async fn corrupt_dump_falls_back_to_empty_state() {
    use bytes::Bytes;
    use converge_store::ConfigDump;

    let account = TestAccount::with_seed(5);
    let local = account.identity();
    account
        .store
        .save_dump(&ConfigDump {
            category: ConfigCategory::Contacts,
            identity: local.clone(),
            serialized_state: Bytes::from_static(b"definitely not cbor"),
            message_hashes: BTreeSet::new(),
            last_mutation_ms: 1,
        })
        .await
        .unwrap();

    let engine = account.engine();
    let approved = engine
        .with_config(ConfigCategory::Contacts, &local, |config| {
            let contacts = config.as_contacts_mut().unwrap();
            contacts.set_approved(&Identity::new("05friend"), true, 100);
            contacts.is_approved(&Identity::new("05friend"))
        })
        .await
        .unwrap();
    assert!(approved);

    let pushes = engine.compute_pending_pushes(&local).await.unwrap();
    assert_eq!(pushes.len(), 1);
}

/// The stored hash set grows across batches and is trimmed only by a
/// confirmed push.
#[tokio::test]
async fn hash_set_grows_until_push_confirmation_trims_it() {
    let account = TestAccount::with_seed(6);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    let first = delta_for(ConfigCategory::Contacts, |config| {
        config
            .as_contacts_mut()
            .unwrap()
            .set_name(&Identity::new("05friend"), "Friend", 100);
    });
    engine
        .handle_incoming(
            &local,
            vec![wire_message(ConfigCategory::Contacts, 100, "hash-1", first, 1)],
        )
        .await
        .unwrap();

    let after_first = account
        .store
        .message_hashes(ConfigCategory::Contacts, &local)
        .await
        .unwrap();
    assert_eq!(after_first.len(), 1);

    let second = delta_for(ConfigCategory::Contacts, |config| {
        config
            .as_contacts_mut()
            .unwrap()
            .set_nickname(&Identity::new("05friend"), "F", 200);
    });
    engine
        .handle_incoming(
            &local,
            vec![wire_message(ConfigCategory::Contacts, 200, "hash-2", second, 2)],
        )
        .await
        .unwrap();

    let after_second = account
        .store
        .message_hashes(ConfigCategory::Contacts, &local)
        .await
        .unwrap();
    assert!(after_second.is_superset(&after_first));
    assert_eq!(after_second.len(), 2);

    // Local edit, push it, confirm it; the new push supersedes both
    // prior relay messages.
    engine
        .with_config(ConfigCategory::Contacts, &local, |config| {
            config
                .as_contacts_mut()
                .unwrap()
                .set_blocked(&Identity::new("05spam"), true, 300);
        })
        .await
        .unwrap();
    let pushes = engine.compute_pending_pushes(&local).await.unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].obsolete_message_hashes, after_second);

    let needs_dump = engine.mark_pushed(&pushes[0]).await.unwrap();
    assert!(needs_dump);
    engine
        .persist_if_dirty(
            ConfigCategory::Contacts,
            &local,
            Some([MessageHash::new("hash-3")].into_iter().collect()),
        )
        .await
        .unwrap();

    let trimmed = account
        .store
        .message_hashes(ConfigCategory::Contacts, &local)
        .await
        .unwrap();
    assert_eq!(trimmed.len(), 1);
    assert!(trimmed.contains(&MessageHash::new("hash-3")));
}

/// Re-processing an identical batch writes nothing: no new dump, no
/// hash update, so the cycle completes even with storage failing.
#[tokio::test]
async fn duplicate_batch_writes_nothing() {
    let account = TestAccount::with_seed(7);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    let delta = delta_for(ConfigCategory::Contacts, |config| {
        config
            .as_contacts_mut()
            .unwrap()
            .set_name(&Identity::new("05friend"), "Friend", 100);
    });
    let batch = vec![wire_message(
        ConfigCategory::Contacts,
        100,
        "hash-1",
        delta,
        1,
    )];

    engine.handle_incoming(&local, batch.clone()).await.unwrap();

    // With writes failing, a clean handle and unchanged hash set mean
    // the duplicate batch touches the store not at all.
    account.store.set_fail_writes(true);
    engine.handle_incoming(&local, batch).await.unwrap();
    account.store.set_fail_writes(false);
}

/// A failed dump write leaves the dirty flag set; the next cycle
/// persists what the first one could not.
#[tokio::test]
async fn failed_dump_write_retries_next_cycle() {
    let account = TestAccount::with_seed(8);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    account.store.set_fail_writes(true);
    let delta = delta_for(ConfigCategory::UserProfile, |config| {
        config
            .as_profile_mut()
            .unwrap()
            .set_display_name("Alice", 100);
    });
    engine
        .handle_incoming(
            &local,
            vec![wire_message(ConfigCategory::UserProfile, 100, "hash-1", delta, 1)],
        )
        .await
        .unwrap();
    assert!(account
        .store
        .load_dump(ConfigCategory::UserProfile, &local)
        .await
        .unwrap()
        .is_none());

    account.store.set_fail_writes(false);
    engine
        .persist_if_dirty(ConfigCategory::UserProfile, &local, None)
        .await
        .unwrap();

    let dump = account
        .store
        .load_dump(ConfigCategory::UserProfile, &local)
        .await
        .unwrap();
    assert!(dump.is_some());
}

/// Hashes from a batch whose dump write failed are not lost: the retry
/// persists them alongside the state, so the stored set still covers
/// every message captured in it.
#[tokio::test]
async fn failed_dump_retry_carries_batch_hashes() {
    let account = TestAccount::with_seed(15);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    account.store.set_fail_writes(true);
    let delta = delta_for(ConfigCategory::UserProfile, |config| {
        config
            .as_profile_mut()
            .unwrap()
            .set_display_name("Alice", 100);
    });
    engine
        .handle_incoming(
            &local,
            vec![wire_message(ConfigCategory::UserProfile, 100, "hash-1", delta, 1)],
        )
        .await
        .unwrap();

    // The failed cycle recorded nothing durable, but a pending push
    // still reports the merged message as obsolete.
    engine
        .with_config(ConfigCategory::UserProfile, &local, |config| {
            config
                .as_profile_mut()
                .unwrap()
                .set_avatar("http://files/a.png", b"key", 200);
        })
        .await
        .unwrap();
    let pushes = engine.compute_pending_pushes(&local).await.unwrap();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0]
        .obsolete_message_hashes
        .contains(&MessageHash::new("hash-1")));

    account.store.set_fail_writes(false);
    engine
        .persist_if_dirty(ConfigCategory::UserProfile, &local, None)
        .await
        .unwrap();

    let dump = account
        .store
        .load_dump(ConfigCategory::UserProfile, &local)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        dump.message_hashes,
        [MessageHash::new("hash-1")].into_iter().collect()
    );
}

/// A malformed delta in one category never blocks its siblings.
#[tokio::test]
async fn malformed_category_is_isolated() {
    let account = TestAccount::with_seed(9);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    let good = delta_for(ConfigCategory::Contacts, |config| {
        config
            .as_contacts_mut()
            .unwrap()
            .set_name(&Identity::new("05friend"), "Friend", 100);
    });

    engine
        .handle_incoming(
            &local,
            vec![
                wire_message(ConfigCategory::UserProfile, 90, "hash-bad", b"garbage".to_vec(), 1),
                wire_message(ConfigCategory::Contacts, 100, "hash-good", good, 1),
            ],
        )
        .await
        .unwrap();

    let name = engine
        .with_config(ConfigCategory::Contacts, &local, |config| {
            config
                .as_contacts()
                .unwrap()
                .name(&Identity::new("05friend"))
                .map(str::to_string)
        })
        .await
        .unwrap();
    assert_eq!(name.as_deref(), Some("Friend"));

    // The failed category recorded nothing.
    assert!(account
        .store
        .message_hashes(ConfigCategory::UserProfile, &local)
        .await
        .unwrap()
        .is_empty());
}

/// A fresh install with no dump rows still pushes local edits.
#[tokio::test]
async fn cold_start_pushes_without_prior_dump() {
    let account = TestAccount::with_seed(10);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    assert!(account.store.list_dumped().await.unwrap().is_empty());

    engine
        .with_config(ConfigCategory::UserProfile, &local, |config| {
            config.as_profile_mut().unwrap().set_display_name("New", 50);
        })
        .await
        .unwrap();

    let pushes = engine.compute_pending_pushes(&local).await.unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].category, ConfigCategory::UserProfile);
    assert!(pushes[0].obsolete_message_hashes.is_empty());
}

/// Volatile state edited for a group that has never been dumped is
/// still picked up by the push cycle.
#[tokio::test]
async fn loaded_group_state_without_dump_is_pushed() {
    let account = TestAccount::with_seed(16);
    let engine = account.engine();
    let local = engine.local_identity().clone();
    let group = Identity::new("03group");

    engine
        .with_config(ConfigCategory::ConvoVolatile, &group, |config| {
            config
                .as_convo_volatile_mut()
                .unwrap()
                .set_unread(&Identity::new("05convo"), true, 100);
        })
        .await
        .unwrap();

    let pushes = engine.compute_pending_pushes(&local).await.unwrap();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].category, ConfigCategory::ConvoVolatile);
    assert_eq!(pushes[0].destination, group);
}

/// Confirming a superseded sequence number is a no-op; the newer push
/// remains pending until its own confirmation.
#[tokio::test]
async fn stale_push_confirmation_is_ignored() {
    let account = TestAccount::with_seed(11);
    let engine = account.engine();
    let local = engine.local_identity().clone();

    engine
        .with_config(ConfigCategory::Contacts, &local, |config| {
            config
                .as_contacts_mut()
                .unwrap()
                .set_approved(&Identity::new("05a"), true, 100);
        })
        .await
        .unwrap();
    let stale = engine.compute_pending_pushes(&local).await.unwrap();

    engine
        .with_config(ConfigCategory::Contacts, &local, |config| {
            config
                .as_contacts_mut()
                .unwrap()
                .set_approved(&Identity::new("05b"), true, 200);
        })
        .await
        .unwrap();
    let fresh = engine.compute_pending_pushes(&local).await.unwrap();
    assert!(fresh[0].seq_no > stale[0].seq_no);

    // The stale confirmation must not mark the newer payload synced.
    engine.mark_pushed(&stale[0]).await.unwrap();
    let needs_dump = engine.mark_pushed(&fresh[0]).await.unwrap();
    assert!(needs_dump);
}

/// Group membership disappearing from a merged UserGroups delta tears
/// the group down via the post-merge reducer.
#[tokio::test]
async fn reducer_tears_down_departed_groups() {
    let alice = TestAccount::with_seed(12);
    let bob = TestAccount::with_seed(13);

    let (engine, mut events) = alice.engine_with_events();
    let local = engine.local_identity().clone();
    engine.register_group(group_of(
        "03group",
        "duo",
        &[(&alice.keys, true), (&bob.keys, false)],
        1000,
    ));

    // Another device's UserGroups state no longer lists the group.
    let delta = delta_for(ConfigCategory::UserGroups, |config| {
        config
            .as_user_groups_mut()
            .unwrap()
            .set_group(&Identity::new("03other"), "kept", b"seed", 2000);
    });
    engine
        .handle_incoming(
            &local,
            vec![wire_message(ConfigCategory::UserGroups, 2000, "hash-g", delta, 1)],
        )
        .await
        .unwrap();

    assert!(engine.group(&Identity::new("03group")).is_none());
    let disbanded = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| matches!(e, EngineEvent::GroupDisbanded { .. }));
    assert!(disbanded);
}

#[tokio::test]
async fn unknown_group_control_is_rejected() {
    let account = TestAccount::with_seed(14);
    let engine = account.engine();

    let err = engine
        .handle_group_control(
            &Identity::new("03nope"),
            &account.identity(),
            2000,
            &GroupControlMessage::KeyPairRequest,
            2000,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IdentityUnknown(_)));
}
