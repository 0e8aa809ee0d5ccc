//! Admission rules for stream creation.
//!
//! [`can_create_stream`] is a pure validator: given the on-chain settings,
//! the wall clock passed in by the caller, the requested id and the parsed
//! genesis events, it either rejects the request or returns the
//! preconditions the allocator must enforce before writing anything. Same
//! inputs always produce the same output, including the order of derived
//! events.

use std::collections::BTreeMap;
use towns_core::protocol::{MembershipOp, ParsedEvent, StreamPayload};
use towns_core::{Address, Err, Result, RiverError, StreamId, StreamKind, Tags};
use towns_registry::chain_config::OnChainSettings;
use towns_registry::entitlement::{EntitlementQuery, Permission};

/// Maximum tolerated clock skew for event timestamps.
const MAX_FUTURE_SKEW_MS: u64 = 3_600_000;

/// A side-effect to apply to a pre-existing stream after allocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DerivedEvent {
    pub stream_id: StreamId,
    pub payload: StreamPayload,
    pub tags: Tags,
}

/// Preconditions computed for one creation request. Empty fields mean "not
/// applicable".
#[derive(Debug, Default)]
pub struct CreationRules {
    /// Streams the creator must already be a member of.
    pub required_memberships: Vec<StreamId>,
    /// User addresses whose user-streams must already exist.
    pub required_user_addrs: Vec<Address>,
    /// The creator's user stream; populated iff a membership check is
    /// required. Loading it is the allocator's responsibility.
    pub creator_stream_id: Option<StreamId>,
    /// Policy query for the entitlement oracle.
    pub chain_auth: Option<EntitlementQuery>,
    /// Ordered side-effects to apply after successful allocation.
    pub derived_events: Vec<DerivedEvent>,
}

/// Validates the genesis event set for `stream_id` and returns the
/// preconditions for creating it.
pub fn can_create_stream(
    settings: &OnChainSettings,
    now_epoch_ms: u64,
    stream_id: StreamId,
    parsed_events: &[ParsedEvent],
    metadata: &BTreeMap<String, Vec<u8>>,
) -> Result<CreationRules> {
    let Some(kind) = stream_id.kind() else {
        return Err(bad("unknown stream prefix", stream_id));
    };
    let Some((inception, rest)) = parsed_events.split_first() else {
        return Err(RiverError::new(Err::BadStreamCreationParams, "no events"));
    };

    let creator = inception.creator_address();
    for event in parsed_events {
        if event.creator_address() != creator {
            return Err(bad("events have multiple creators", stream_id));
        }
        if event.event.created_at_epoch_ms > now_epoch_ms + MAX_FUTURE_SKEW_MS {
            return Err(bad("event timestamp too far in the future", stream_id));
        }
    }
    // Genesis may carry membership events after the inception, nothing else.
    for event in rest {
        if !matches!(event.event.payload, StreamPayload::Membership { .. }) {
            return Err(bad("only membership events may follow the inception", stream_id));
        }
    }

    let tags: Tags = metadata.clone();
    match (kind, &inception.event.payload) {
        (StreamKind::User, StreamPayload::UserInception { stream_id: inner })
        | (StreamKind::UserSettings, StreamPayload::UserSettingsInception { stream_id: inner })
        | (StreamKind::UserMetadata, StreamPayload::UserMetadataInception { stream_id: inner })
        | (StreamKind::UserInbox, StreamPayload::UserInboxInception { stream_id: inner }) => {
            user_stream_rules(stream_id, *inner, creator)
        },
        (StreamKind::Space, StreamPayload::SpaceInception { stream_id: inner }) => {
            space_rules(stream_id, *inner, creator, tags)
        },
        (StreamKind::Channel, StreamPayload::ChannelInception { stream_id: inner, space_id }) => {
            channel_rules(stream_id, *inner, *space_id, creator, tags)
        },
        (
            StreamKind::Media,
            StreamPayload::MediaInception { stream_id: inner, channel_id, chunk_count },
        ) => media_rules(settings, stream_id, *inner, *channel_id, *chunk_count, creator),
        (
            StreamKind::DmChannel,
            StreamPayload::DmChannelInception { stream_id: inner, first_party, second_party },
        ) => dm_rules(stream_id, *inner, *first_party, *second_party, creator, tags),
        (
            StreamKind::GdmChannel,
            StreamPayload::GdmChannelInception { stream_id: inner, parties },
        ) => gdm_rules(settings, stream_id, *inner, parties, creator, tags),
        _ => Err(bad("inception payload does not match stream prefix", stream_id)),
    }
}

fn bad(message: &'static str, stream_id: StreamId) -> RiverError {
    RiverError::new(Err::BadStreamCreationParams, message)
        .tag("streamId", stream_id)
        .func("can_create_stream")
}

fn check_inner_id(stream_id: StreamId, inner: StreamId) -> Result<()> {
    if inner != stream_id {
        return Err(bad("inception stream id does not match request", stream_id));
    }
    Ok(())
}

fn user_stream_rules(stream_id: StreamId, inner: StreamId, creator: Address) -> Result<CreationRules> {
    check_inner_id(stream_id, inner)?;
    if stream_id.user_addr() != Some(creator) {
        return Err(bad("user stream id does not embed the creator address", stream_id));
    }
    Ok(CreationRules::default())
}

fn space_rules(
    stream_id: StreamId,
    inner: StreamId,
    creator: Address,
    tags: Tags,
) -> Result<CreationRules> {
    check_inner_id(stream_id, inner)?;
    Ok(CreationRules {
        chain_auth: Some(EntitlementQuery {
            principal: creator,
            permission: Permission::CreateSpace,
            space_id: Some(stream_id),
            channel_id: None,
        }),
        derived_events: vec![join_event(creator, stream_id, creator, tags)],
        ..CreationRules::default()
    })
}

fn channel_rules(
    stream_id: StreamId,
    inner: StreamId,
    space_id: StreamId,
    creator: Address,
    tags: Tags,
) -> Result<CreationRules> {
    check_inner_id(stream_id, inner)?;
    if space_id.kind() != Some(StreamKind::Space) {
        return Err(bad("channel inception names a non-space parent", stream_id));
    }
    Ok(CreationRules {
        required_memberships: vec![space_id],
        creator_stream_id: Some(StreamId::user_stream_from_addr(creator)),
        chain_auth: Some(EntitlementQuery {
            principal: creator,
            permission: Permission::AddRemoveChannels,
            space_id: Some(space_id),
            channel_id: Some(stream_id),
        }),
        derived_events: vec![
            join_event(creator, stream_id, creator, tags.clone()),
            DerivedEvent {
                stream_id: space_id,
                payload: StreamPayload::ChannelCreated { channel_id: stream_id },
                tags,
            },
        ],
        ..CreationRules::default()
    })
}

fn media_rules(
    settings: &OnChainSettings,
    stream_id: StreamId,
    inner: StreamId,
    channel_id: StreamId,
    chunk_count: u32,
    creator: Address,
) -> Result<CreationRules> {
    check_inner_id(stream_id, inner)?;
    if u64::from(chunk_count) > settings.media_max_chunk_count() {
        return Err(bad("media chunk count exceeds limit", stream_id));
    }
    if !matches!(
        channel_id.kind(),
        Some(StreamKind::Channel | StreamKind::DmChannel | StreamKind::GdmChannel)
    ) {
        return Err(bad("media inception names a non-channel owner", stream_id));
    }
    Ok(CreationRules {
        required_memberships: vec![channel_id],
        creator_stream_id: Some(StreamId::user_stream_from_addr(creator)),
        ..CreationRules::default()
    })
}

fn dm_rules(
    stream_id: StreamId,
    inner: StreamId,
    first_party: Address,
    second_party: Address,
    creator: Address,
    tags: Tags,
) -> Result<CreationRules> {
    check_inner_id(stream_id, inner)?;
    if creator != first_party {
        return Err(bad("dm creator must be the first party", stream_id));
    }
    if first_party == second_party {
        return Err(bad("dm parties must be distinct", stream_id));
    }
    Ok(CreationRules {
        required_user_addrs: vec![first_party, second_party],
        derived_events: vec![
            join_event(first_party, stream_id, creator, tags.clone()),
            join_event(second_party, stream_id, creator, tags),
        ],
        ..CreationRules::default()
    })
}

fn gdm_rules(
    settings: &OnChainSettings,
    stream_id: StreamId,
    inner: StreamId,
    parties: &[Address],
    creator: Address,
    tags: Tags,
) -> Result<CreationRules> {
    check_inner_id(stream_id, inner)?;
    if parties.len() < 3 {
        return Err(bad("group dm requires at least three parties", stream_id));
    }
    if parties.len() > settings.gdm_membership_limit() {
        return Err(bad("group dm exceeds membership limit", stream_id));
    }
    if parties.first() != Some(&creator) {
        return Err(bad("group dm creator must be the first party", stream_id));
    }
    let mut seen = std::collections::BTreeSet::new();
    if !parties.iter().all(|party| seen.insert(*party)) {
        return Err(bad("group dm parties must be distinct", stream_id));
    }
    Ok(CreationRules {
        required_user_addrs: parties.to_vec(),
        derived_events: parties
            .iter()
            .map(|party| join_event(*party, stream_id, creator, tags.clone()))
            .collect(),
        ..CreationRules::default()
    })
}

fn join_event(member: Address, stream_id: StreamId, initiator: Address, tags: Tags) -> DerivedEvent {
    DerivedEvent {
        stream_id: StreamId::user_stream_from_addr(member),
        payload: StreamPayload::Membership { op: MembershipOp::Join, stream_id, initiator },
        tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::{H160, H256};
    use towns_core::protocol::{Envelope, StreamEvent};
    use towns_core::stream_id::{
        STREAM_CHANNEL_PREFIX, STREAM_DM_CHANNEL_PREFIX, STREAM_GDM_CHANNEL_PREFIX,
        STREAM_MEDIA_PREFIX, STREAM_SPACE_PREFIX,
    };

    const NOW: u64 = 1_700_000_000_000;

    fn id(prefix: u8) -> StreamId {
        let mut raw = [0x33u8; 32];
        raw[0] = prefix;
        StreamId::from_bytes(&raw).unwrap()
    }

    fn parsed(creator: Address, payload: StreamPayload) -> ParsedEvent {
        parsed_at(creator, payload, NOW)
    }

    fn parsed_at(creator: Address, payload: StreamPayload, created_at: u64) -> ParsedEvent {
        let event = StreamEvent {
            creator_address: creator,
            salt: vec![9],
            prev_miniblock_hash: None,
            created_at_epoch_ms: created_at,
            payload,
        };
        ParsedEvent {
            event: event.clone(),
            envelope: Envelope { event: vec![], signature: vec![], hash: H256::zero() },
            hash: H256::zero(),
        }
    }

    fn settings() -> OnChainSettings {
        OnChainSettings::default()
    }

    #[test]
    fn user_stream_requires_matching_creator() {
        let creator = H160::repeat_byte(7);
        let stream_id = StreamId::user_stream_from_addr(creator);
        let events = [parsed(creator, StreamPayload::UserInception { stream_id })];
        let rules =
            can_create_stream(&settings(), NOW, stream_id, &events, &BTreeMap::new()).unwrap();
        assert!(rules.required_memberships.is_empty());
        assert!(rules.chain_auth.is_none());
        assert!(rules.derived_events.is_empty());

        let other = StreamId::user_stream_from_addr(H160::repeat_byte(8));
        let events = [parsed(creator, StreamPayload::UserInception { stream_id: other })];
        let err = can_create_stream(&settings(), NOW, other, &events, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), Err::BadStreamCreationParams);
    }

    #[test]
    fn prefix_payload_mismatch_is_rejected() {
        let creator = H160::repeat_byte(7);
        let space = id(STREAM_SPACE_PREFIX);
        let events = [parsed(
            creator,
            StreamPayload::ChannelInception { stream_id: space, space_id: space },
        )];
        let err = can_create_stream(&settings(), NOW, space, &events, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), Err::BadStreamCreationParams);
    }

    #[test]
    fn space_rules_require_entitlement_and_derive_join() {
        let creator = H160::repeat_byte(7);
        let space = id(STREAM_SPACE_PREFIX);
        let events = [parsed(creator, StreamPayload::SpaceInception { stream_id: space })];
        let rules =
            can_create_stream(&settings(), NOW, space, &events, &BTreeMap::new()).unwrap();

        let auth = rules.chain_auth.unwrap();
        assert_eq!(auth.permission, Permission::CreateSpace);
        assert_eq!(auth.principal, creator);

        assert_eq!(rules.derived_events.len(), 1);
        assert_eq!(
            rules.derived_events[0].stream_id,
            StreamId::user_stream_from_addr(creator)
        );
    }

    #[test]
    fn channel_rules_require_space_membership() {
        let creator = H160::repeat_byte(7);
        let space = id(STREAM_SPACE_PREFIX);
        let channel = id(STREAM_CHANNEL_PREFIX);
        let events = [parsed(
            creator,
            StreamPayload::ChannelInception { stream_id: channel, space_id: space },
        )];
        let rules =
            can_create_stream(&settings(), NOW, channel, &events, &BTreeMap::new()).unwrap();

        assert_eq!(rules.required_memberships, vec![space]);
        assert_eq!(rules.creator_stream_id, Some(StreamId::user_stream_from_addr(creator)));
        assert_eq!(rules.chain_auth.unwrap().permission, Permission::AddRemoveChannels);
        // Join onto the creator's user stream, then the space annotation.
        assert_eq!(rules.derived_events.len(), 2);
        assert_eq!(rules.derived_events[1].stream_id, space);
        assert!(matches!(
            rules.derived_events[1].payload,
            StreamPayload::ChannelCreated { channel_id } if channel_id == channel
        ));
    }

    #[test]
    fn media_rules_enforce_chunk_limit() {
        let creator = H160::repeat_byte(7);
        let channel = id(STREAM_CHANNEL_PREFIX);
        let media = id(STREAM_MEDIA_PREFIX);
        let ok = [parsed(
            creator,
            StreamPayload::MediaInception { stream_id: media, channel_id: channel, chunk_count: 10 },
        )];
        let rules = can_create_stream(&settings(), NOW, media, &ok, &BTreeMap::new()).unwrap();
        assert_eq!(rules.required_memberships, vec![channel]);

        let too_big = [parsed(
            creator,
            StreamPayload::MediaInception {
                stream_id: media,
                channel_id: channel,
                chunk_count: 10_000,
            },
        )];
        let err =
            can_create_stream(&settings(), NOW, media, &too_big, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), Err::BadStreamCreationParams);
    }

    #[test]
    fn dm_rules_require_both_users() {
        let first = H160::repeat_byte(7);
        let second = H160::repeat_byte(8);
        let dm = id(STREAM_DM_CHANNEL_PREFIX);
        let events = [parsed(
            first,
            StreamPayload::DmChannelInception { stream_id: dm, first_party: first, second_party: second },
        )];
        let rules = can_create_stream(&settings(), NOW, dm, &events, &BTreeMap::new()).unwrap();
        assert_eq!(rules.required_user_addrs, vec![first, second]);
        assert_eq!(rules.derived_events.len(), 2);
        assert_eq!(rules.derived_events[0].stream_id, StreamId::user_stream_from_addr(first));
        assert_eq!(rules.derived_events[1].stream_id, StreamId::user_stream_from_addr(second));
    }

    #[test]
    fn gdm_rules_bound_party_count() {
        let creator = H160::repeat_byte(1);
        let gdm = id(STREAM_GDM_CHANNEL_PREFIX);
        let parties: Vec<Address> = (1u8..=4).map(H160::repeat_byte).collect();
        let events = [parsed(
            creator,
            StreamPayload::GdmChannelInception { stream_id: gdm, parties: parties.clone() },
        )];
        let rules = can_create_stream(&settings(), NOW, gdm, &events, &BTreeMap::new()).unwrap();
        assert_eq!(rules.required_user_addrs, parties);
        assert_eq!(rules.derived_events.len(), 4);

        let two = [parsed(
            creator,
            StreamPayload::GdmChannelInception {
                stream_id: gdm,
                parties: parties[..2].to_vec(),
            },
        )];
        assert_eq!(
            can_create_stream(&settings(), NOW, gdm, &two, &BTreeMap::new()).unwrap_err().kind(),
            Err::BadStreamCreationParams
        );
    }

    #[test]
    fn multiple_creators_are_rejected() {
        let creator = H160::repeat_byte(7);
        let space = id(STREAM_SPACE_PREFIX);
        let events = [
            parsed(creator, StreamPayload::SpaceInception { stream_id: space }),
            parsed(
                H160::repeat_byte(8),
                StreamPayload::Membership {
                    op: MembershipOp::Join,
                    stream_id: space,
                    initiator: creator,
                },
            ),
        ];
        assert_eq!(
            can_create_stream(&settings(), NOW, space, &events, &BTreeMap::new())
                .unwrap_err()
                .kind(),
            Err::BadStreamCreationParams
        );
    }

    #[test]
    fn future_timestamps_are_rejected() {
        let creator = H160::repeat_byte(7);
        let space = id(STREAM_SPACE_PREFIX);
        let events = [parsed_at(
            creator,
            StreamPayload::SpaceInception { stream_id: space },
            NOW + MAX_FUTURE_SKEW_MS + 1,
        )];
        assert_eq!(
            can_create_stream(&settings(), NOW, space, &events, &BTreeMap::new())
                .unwrap_err()
                .kind(),
            Err::BadStreamCreationParams
        );
    }

    #[test]
    fn output_is_deterministic() {
        let creator = H160::repeat_byte(1);
        let gdm = id(STREAM_GDM_CHANNEL_PREFIX);
        let parties: Vec<Address> = (1u8..=4).map(H160::repeat_byte).collect();
        let events = [parsed(
            creator,
            StreamPayload::GdmChannelInception { stream_id: gdm, parties },
        )];
        let a = can_create_stream(&settings(), NOW, gdm, &events, &BTreeMap::new()).unwrap();
        let b = can_create_stream(&settings(), NOW, gdm, &events, &BTreeMap::new()).unwrap();
        assert_eq!(a.derived_events, b.derived_events);
        assert_eq!(a.required_user_addrs, b.required_user_addrs);
    }
}
