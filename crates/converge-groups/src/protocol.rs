//! The group key rotation state machine.
//!
//! Invariant: every active member can decrypt with at least one key in
//! the group's history, and only active members can decrypt the newest
//! key. Membership shrink therefore rotates the key; membership growth
//! only re-distributes the current one.

use converge_core::{Identity, IdentityKeys};

use crate::error::{GroupError, Result};
use crate::group::{ClosedGroup, GroupKeyPair, GroupMember};
use crate::keyshare::KeyShare;

/// A membership or key control message for one group.
#[derive(Debug, Clone)]
pub enum GroupControlMessage {
    MembersRemoved { removed: Vec<Identity> },
    MembersAdded { added: Vec<(Identity, GroupMember)> },
    /// A member lost its key material and asks for the latest pair.
    KeyPairRequest,
    /// A wrapped key pair addressed to the local user.
    KeyPair(KeyShare),
}

/// What a control message did to local state, reported to the engine.
#[derive(Debug, Default)]
pub struct RotationOutcome {
    /// A rotation or distribution happened; the group's config handle
    /// must be flagged for push.
    pub needs_push: bool,
    /// Local state must be torn down: key history cleared, handle
    /// discarded, push channel unsubscribed.
    pub disbanded: bool,
    /// Wrapped key pairs to deliver, one per recipient.
    pub distributions: Vec<(Identity, KeyShare)>,
}

/// Apply one control message to a group.
///
/// Violations fail closed: on error the group is unchanged.
///
/// `now_ms` stamps any key pair generated or received here.
pub fn apply_control(
    group: &mut ClosedGroup,
    local: &Identity,
    local_keys: &IdentityKeys,
    sender: &Identity,
    sent_timestamp_ms: i64,
    message: &GroupControlMessage,
    now_ms: i64,
) -> Result<RotationOutcome> {
    if !group.is_member(sender) {
        return Err(GroupError::StaleOrUnauthorizedUpdate(format!(
            "sender {} is not a member of {}",
            sender, group.id
        )));
    }
    if sent_timestamp_ms < group.formed_at_ms {
        return Err(GroupError::StaleOrUnauthorizedUpdate(format!(
            "message sent at {} pre-dates group formation at {}",
            sent_timestamp_ms, group.formed_at_ms
        )));
    }

    match message {
        GroupControlMessage::MembersRemoved { removed } => {
            apply_members_removed(group, local, sender, removed, now_ms)
        }
        GroupControlMessage::MembersAdded { added } => apply_members_added(group, local, added),
        GroupControlMessage::KeyPairRequest => answer_key_request(group, local, sender),
        GroupControlMessage::KeyPair(share) => {
            let pair = share.open(local_keys, now_ms)?;
            let added = group.add_key_pair(pair);
            if !added {
                tracing::debug!(group = %group.id, "ignoring already-known group key pair");
            }
            Ok(RotationOutcome::default())
        }
    }
}

fn apply_members_removed(
    group: &mut ClosedGroup,
    local: &Identity,
    sender: &Identity,
    removed: &[Identity],
    now_ms: i64,
) -> Result<RotationOutcome> {
    let actually_removed: Vec<&Identity> =
        removed.iter().filter(|id| group.is_member(id)).collect();
    if actually_removed.is_empty() {
        return Ok(RotationOutcome::default());
    }

    let removed_admins: Vec<&&Identity> = actually_removed
        .iter()
        .filter(|id| group.is_admin(id))
        .collect();

    if !removed_admins.is_empty() {
        // An admin leaving disbands the group for everyone else. Any
        // other attempt to strip an admin is rejected, state unchanged.
        if removed_admins.iter().any(|id| **id == sender) {
            group.clear_key_pairs();
            return Ok(RotationOutcome {
                disbanded: true,
                ..Default::default()
            });
        }
        return Err(GroupError::InvalidGroupUpdate(format!(
            "removal would strip admin from {}",
            group.id
        )));
    }

    if actually_removed.iter().any(|id| **id == *local) {
        group.clear_key_pairs();
        return Ok(RotationOutcome {
            disbanded: true,
            ..Default::default()
        });
    }

    for id in removed {
        group.members.remove(id);
    }

    // Membership shrank: the departed can still read the old epoch, so
    // the surviving admin mints a fresh pair for the survivors.
    if group.is_admin(local) {
        let fresh = GroupKeyPair::generate(now_ms);
        let distributions = distribute(group, local, &fresh)?;
        group.add_key_pair(fresh);
        return Ok(RotationOutcome {
            needs_push: true,
            disbanded: false,
            distributions,
        });
    }

    Ok(RotationOutcome::default())
}

fn apply_members_added(
    group: &mut ClosedGroup,
    local: &Identity,
    added: &[(Identity, GroupMember)],
) -> Result<RotationOutcome> {
    let mut new_members = Vec::new();
    for (id, member) in added {
        if !group.is_member(id) {
            group.members.insert(id.clone(), member.clone());
            new_members.push(id.clone());
        }
    }

    // Growth never rotates: new members get the current latest pair.
    let mut distributions = Vec::new();
    if group.is_admin(local) {
        if let Some(latest) = group.latest_key_pair() {
            for id in &new_members {
                let member = &group.members[id];
                let share = KeyShare::create(group.id.clone(), latest, &member.exchange_public)?;
                distributions.push((id.clone(), share));
            }
        }
    }

    Ok(RotationOutcome {
        needs_push: !distributions.is_empty(),
        disbanded: false,
        distributions,
    })
}

fn answer_key_request(
    group: &ClosedGroup,
    local: &Identity,
    sender: &Identity,
) -> Result<RotationOutcome> {
    if sender == local {
        return Err(GroupError::InvalidSelfRequest);
    }

    let Some(latest) = group.latest_key_pair() else {
        return Ok(RotationOutcome::default());
    };
    let member = group
        .members
        .get(sender)
        .ok_or_else(|| GroupError::StaleOrUnauthorizedUpdate(format!(
            "key request from non-member {}",
            sender
        )))?;

    let share = KeyShare::create(group.id.clone(), latest, &member.exchange_public)?;
    Ok(RotationOutcome {
        needs_push: true,
        disbanded: false,
        distributions: vec![(sender.clone(), share)],
    })
}

/// Wrap a pair for every member except the local user.
fn distribute(
    group: &ClosedGroup,
    local: &Identity,
    pair: &GroupKeyPair,
) -> Result<Vec<(Identity, KeyShare)>> {
    let mut shares = Vec::new();
    for (id, member) in &group.members {
        if id == local {
            continue;
        }
        let share = KeyShare::create(group.id.clone(), pair, &member.exchange_public)?;
        shares.push((id.clone(), share));
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        group: ClosedGroup,
        alice: (Identity, IdentityKeys),
        bob: (Identity, IdentityKeys),
        carol: (Identity, IdentityKeys),
    }

    /// Group {alice(admin), bob, carol}, formed at t=1000, one key.
    fn fixture() -> Fixture {
        let alice_keys = IdentityKeys::from_seed(&[1u8; 32]);
        let bob_keys = IdentityKeys::from_seed(&[2u8; 32]);
        let carol_keys = IdentityKeys::from_seed(&[3u8; 32]);

        let mut group = ClosedGroup::new(Identity::new("03group"), "trio", 1000);
        for (keys, admin) in [(&alice_keys, true), (&bob_keys, false), (&carol_keys, false)] {
            group.members.insert(
                keys.identity(),
                GroupMember {
                    exchange_public: keys.exchange_public(),
                    admin,
                },
            );
        }
        group.add_key_pair(GroupKeyPair::generate(1000));

        Fixture {
            alice: (alice_keys.identity(), alice_keys),
            bob: (bob_keys.identity(), bob_keys),
            carol: (carol_keys.identity(), carol_keys),
            group,
        }
    }

    #[test]
    fn test_removal_rotates_key_for_survivors() {
        let mut fx = fixture();
        let (alice, alice_keys) = &fx.alice;

        let outcome = apply_control(
            &mut fx.group,
            alice,
            alice_keys,
            alice,
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![fx.bob.0.clone()],
            },
            2000,
        )
        .unwrap();

        assert!(outcome.needs_push);
        assert!(!outcome.disbanded);
        assert_eq!(fx.group.members.len(), 2);
        assert!(!fx.group.is_member(&fx.bob.0));

        // Fresh epoch appended, addressed to the one other survivor.
        assert_eq!(fx.group.key_pairs.len(), 2);
        assert_eq!(outcome.distributions.len(), 1);
        assert_eq!(outcome.distributions[0].0, fx.carol.0);

        // Carol can open it and it matches the new latest pair.
        let opened = outcome.distributions[0].1.open(&fx.carol.1, 2001).unwrap();
        assert!(opened.same_material(fx.group.latest_key_pair().unwrap()));
    }

    #[test]
    fn test_self_removal_tears_down() {
        let mut fx = fixture();
        let (bob, bob_keys) = &fx.bob;

        let outcome = apply_control(
            &mut fx.group,
            bob,
            bob_keys,
            &fx.alice.0,
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![bob.clone()],
            },
            2000,
        )
        .unwrap();

        assert!(outcome.disbanded);
        assert!(!outcome.needs_push);
        assert!(fx.group.key_pairs.is_empty());
    }

    #[test]
    fn test_admin_departure_disbands() {
        let mut fx = fixture();
        let (bob, bob_keys) = &fx.bob;

        // Alice (admin) removes herself; bob observes a disband.
        let outcome = apply_control(
            &mut fx.group,
            bob,
            bob_keys,
            &fx.alice.0,
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![fx.alice.0.clone()],
            },
            2000,
        )
        .unwrap();

        assert!(outcome.disbanded);
        assert!(fx.group.key_pairs.is_empty());
        assert!(outcome.distributions.is_empty());
    }

    #[test]
    fn test_stripping_admin_rejected_unchanged() {
        let mut fx = fixture();
        let (bob, bob_keys) = &fx.bob;
        let members_before = fx.group.members.clone();

        let err = apply_control(
            &mut fx.group,
            bob,
            bob_keys,
            bob,
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![fx.alice.0.clone()],
            },
            2000,
        )
        .unwrap_err();

        assert!(matches!(err, GroupError::InvalidGroupUpdate(_)));
        assert_eq!(fx.group.members, members_before);
        assert_eq!(fx.group.key_pairs.len(), 1);
    }

    #[test]
    fn test_non_member_sender_rejected() {
        let mut fx = fixture();
        let (alice, alice_keys) = &fx.alice;

        let err = apply_control(
            &mut fx.group,
            alice,
            alice_keys,
            &Identity::new("mallory"),
            2000,
            &GroupControlMessage::MembersRemoved {
                removed: vec![fx.bob.0.clone()],
            },
            2000,
        )
        .unwrap_err();

        assert!(matches!(err, GroupError::StaleOrUnauthorizedUpdate(_)));
        assert_eq!(fx.group.members.len(), 3);
    }

    #[test]
    fn test_pre_formation_message_rejected() {
        let mut fx = fixture();
        let (alice, alice_keys) = &fx.alice;

        let err = apply_control(
            &mut fx.group,
            alice,
            alice_keys,
            alice,
            500, // before formed_at_ms = 1000
            &GroupControlMessage::MembersRemoved {
                removed: vec![fx.bob.0.clone()],
            },
            2000,
        )
        .unwrap_err();

        assert!(matches!(err, GroupError::StaleOrUnauthorizedUpdate(_)));
    }

    #[test]
    fn test_add_distributes_latest_without_rotation() {
        let mut fx = fixture();
        let (alice, alice_keys) = &fx.alice;
        let latest_before = fx.group.latest_key_pair().unwrap().clone();

        let dave = IdentityKeys::from_seed(&[4u8; 32]);
        let outcome = apply_control(
            &mut fx.group,
            alice,
            alice_keys,
            alice,
            2000,
            &GroupControlMessage::MembersAdded {
                added: vec![(
                    dave.identity(),
                    GroupMember {
                        exchange_public: dave.exchange_public(),
                        admin: false,
                    },
                )],
            },
            2000,
        )
        .unwrap();

        // No new epoch; the existing latest goes to the new member only.
        assert_eq!(fx.group.key_pairs.len(), 1);
        assert_eq!(outcome.distributions.len(), 1);
        assert_eq!(outcome.distributions[0].0, dave.identity());
        let opened = outcome.distributions[0].1.open(&dave, 0).unwrap();
        assert!(opened.same_material(&latest_before));
    }

    #[test]
    fn test_key_request_answered_with_latest() {
        let mut fx = fixture();
        let (alice, alice_keys) = &fx.alice;

        let outcome = apply_control(
            &mut fx.group,
            alice,
            alice_keys,
            &fx.bob.0,
            2000,
            &GroupControlMessage::KeyPairRequest,
            2000,
        )
        .unwrap();

        assert_eq!(outcome.distributions.len(), 1);
        assert_eq!(outcome.distributions[0].0, fx.bob.0);
    }

    #[test]
    fn test_self_key_request_rejected() {
        let mut fx = fixture();
        let (alice, alice_keys) = &fx.alice;
        let sender = alice.clone();

        let err = apply_control(
            &mut fx.group,
            alice,
            alice_keys,
            &sender,
            2000,
            &GroupControlMessage::KeyPairRequest,
            2000,
        )
        .unwrap_err();

        assert!(matches!(err, GroupError::InvalidSelfRequest));
    }

    #[test]
    fn test_key_receipt_idempotent() {
        let mut fx = fixture();
        let (bob, bob_keys) = &fx.bob;
        let pair = GroupKeyPair::generate(3000);
        let share = KeyShare::create(fx.group.id.clone(), &pair, &bob_keys.exchange_public())
            .unwrap();

        let msg = GroupControlMessage::KeyPair(share);
        apply_control(&mut fx.group, bob, bob_keys, &fx.alice.0, 2000, &msg, 3000).unwrap();
        assert_eq!(fx.group.key_pairs.len(), 2);

        // Receiving the identical material again changes nothing.
        apply_control(&mut fx.group, bob, bob_keys, &fx.alice.0, 2000, &msg, 4000).unwrap();
        assert_eq!(fx.group.key_pairs.len(), 2);
    }
}
