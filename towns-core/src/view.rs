//! In-memory projection of a stream's miniblocks.

use crate::error::{Err, Result, RiverError};
use crate::protocol::{Address, MembershipOp, Miniblock, StreamEvent, StreamPayload, SyncCookie};
use crate::stream_id::StreamId;
use parity_scale_codec::Decode;
use std::collections::BTreeSet;

/// Projection of a stream's blocks: linkage-checked, with the membership set
/// folded out of the events. Immutable once built.
#[derive(Clone, Debug)]
pub struct StreamView {
    stream_id: StreamId,
    last_block_num: u64,
    last_block_hash: primitive_types::H256,
    memberships: BTreeSet<StreamId>,
}

impl StreamView {
    /// Builds a view from blocks `0..n`, verifying the hash chain.
    pub fn from_miniblocks(stream_id: StreamId, miniblocks: &[Miniblock]) -> Result<Self> {
        let Some(last) = miniblocks.last() else {
            return Err(RiverError::new(Err::Internal, "stream view requires at least one block")
                .tag("streamId", stream_id));
        };
        let mut memberships = BTreeSet::new();
        let mut prev_hash = None;
        for block in miniblocks {
            if let Some(prev) = prev_hash {
                if block.header.prev_miniblock_hash != prev {
                    return Err(RiverError::new(Err::Internal, "miniblock chain broken")
                        .tag("streamId", stream_id)
                        .tag("blockNum", block.header.sequence_number));
                }
            }
            prev_hash = Some(block.hash);
            for envelope in &block.events {
                let event = StreamEvent::decode(&mut envelope.event.as_slice()).map_err(|err| {
                    RiverError::with_base(Err::Internal, "failed to decode stream event", err)
                        .tag("streamId", stream_id)
                })?;
                apply_membership(&mut memberships, &event);
            }
        }
        Ok(Self {
            stream_id,
            last_block_num: last.header.sequence_number,
            last_block_hash: last.hash,
            memberships,
        })
    }

    pub const fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub const fn last_block_num(&self) -> u64 {
        self.last_block_num
    }

    pub const fn last_block_hash(&self) -> primitive_types::H256 {
        self.last_block_hash
    }

    /// Whether this (user) stream records a live membership of `stream_id`.
    pub fn is_member_of(&self, stream_id: StreamId) -> bool {
        self.memberships.contains(&stream_id)
    }

    /// Resumption token for this view from `node_address`'s vantage.
    pub fn sync_cookie(&self, node_address: Address) -> SyncCookie {
        SyncCookie {
            node_address,
            stream_id: self.stream_id,
            minipool_gen: self.last_block_num + 1,
            prev_miniblock_hash: self.last_block_hash,
        }
    }
}

fn apply_membership(memberships: &mut BTreeSet<StreamId>, event: &StreamEvent) {
    if let StreamPayload::Membership { op, stream_id, .. } = &event.payload {
        match op {
            MembershipOp::Join => {
                memberships.insert(*stream_id);
            },
            MembershipOp::Leave => {
                memberships.remove(stream_id);
            },
            MembershipOp::Invite => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Envelope, MiniblockHeader};
    use parity_scale_codec::Encode;
    use primitive_types::{H160, H256};

    fn membership_envelope(op: MembershipOp, stream_id: StreamId) -> Envelope {
        let event = StreamEvent {
            creator_address: H160::repeat_byte(1),
            salt: vec![7],
            prev_miniblock_hash: None,
            created_at_epoch_ms: 42,
            payload: StreamPayload::Membership { op, stream_id, initiator: H160::repeat_byte(1) },
        };
        Envelope { event: event.encode(), signature: vec![], hash: H256::zero() }
    }

    fn block(num: u64, prev: H256, hash: H256, events: Vec<Envelope>) -> Miniblock {
        Miniblock {
            header: MiniblockHeader {
                sequence_number: num,
                prev_miniblock_hash: prev,
                timestamp_epoch_ms: 0,
                event_hashes: vec![],
            },
            hash,
            signature: vec![],
            events,
        }
    }

    #[test]
    fn membership_folds_join_and_leave() {
        let user = StreamId::user_stream_from_addr(H160::repeat_byte(1));
        let space = StreamId::from_bytes(&[0x10; 32]).unwrap();
        let channel = StreamId::from_bytes(&[0x20; 32]).unwrap();
        let blocks = vec![
            block(
                0,
                H256::zero(),
                H256::repeat_byte(0xaa),
                vec![
                    membership_envelope(MembershipOp::Join, space),
                    membership_envelope(MembershipOp::Join, channel),
                ],
            ),
            block(
                1,
                H256::repeat_byte(0xaa),
                H256::repeat_byte(0xbb),
                vec![membership_envelope(MembershipOp::Leave, channel)],
            ),
        ];
        let view = StreamView::from_miniblocks(user, &blocks).unwrap();
        assert!(view.is_member_of(space));
        assert!(!view.is_member_of(channel));
        assert_eq!(view.last_block_num(), 1);

        let cookie = view.sync_cookie(H160::repeat_byte(9));
        assert_eq!(cookie.minipool_gen, 2);
        assert_eq!(cookie.prev_miniblock_hash, H256::repeat_byte(0xbb));
    }

    #[test]
    fn broken_chain_is_rejected() {
        let user = StreamId::user_stream_from_addr(H160::repeat_byte(1));
        let blocks = vec![
            block(0, H256::zero(), H256::repeat_byte(0xaa), vec![]),
            block(1, H256::repeat_byte(0xcc), H256::repeat_byte(0xbb), vec![]),
        ];
        let err = StreamView::from_miniblocks(user, &blocks).unwrap_err();
        assert_eq!(err.kind(), Err::Internal);
    }
}
