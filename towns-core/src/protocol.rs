//! Wire-level protocol types shared by the public RPC, the node-to-node RPC
//! and the on-chain genesis blob.
//!
//! Everything here encodes with SCALE so the byte representation is
//! canonical: the same struct always serializes to the same bytes, which is
//! what event hashing and the on-chain allocation blob rely on.

use crate::stream_id::StreamId;
use parity_scale_codec::{Decode, Encode};
use primitive_types::{H160, H256};
use std::collections::BTreeMap;

/// A 20-byte Ethereum-style account address.
pub type Address = H160;

/// Opaque key/value annotations attached to an event by the layer above.
pub type Tags = BTreeMap<String, Vec<u8>>;

/// Membership operations recorded on user streams.
#[derive(Clone, Copy, Debug, Decode, Encode, Eq, PartialEq)]
pub enum MembershipOp {
    Invite,
    Join,
    Leave,
}

/// Payload of a single stream event.
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub enum StreamPayload {
    /// First event of a user stream; the id embeds the owner address.
    UserInception { stream_id: StreamId },
    UserSettingsInception { stream_id: StreamId },
    UserMetadataInception { stream_id: StreamId },
    UserInboxInception { stream_id: StreamId },
    SpaceInception { stream_id: StreamId },
    ChannelInception { stream_id: StreamId, space_id: StreamId },
    MediaInception { stream_id: StreamId, channel_id: StreamId, chunk_count: u32 },
    DmChannelInception { stream_id: StreamId, first_party: Address, second_party: Address },
    GdmChannelInception { stream_id: StreamId, parties: Vec<Address> },
    /// Membership change applied to a user stream.
    Membership { op: MembershipOp, stream_id: StreamId, initiator: Address },
    /// Channel registration appended to the parent space stream.
    ChannelCreated { channel_id: StreamId },
    /// Opaque application payload.
    Message(Vec<u8>),
}

/// The canonical body of an event: what gets SCALE-encoded, hashed in the
/// events domain and signed.
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct StreamEvent {
    pub creator_address: Address,
    pub salt: Vec<u8>,
    pub prev_miniblock_hash: Option<H256>,
    pub created_at_epoch_ms: u64,
    pub payload: StreamPayload,
}

/// Signed wire envelope around a SCALE-encoded [`StreamEvent`].
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct Envelope {
    /// SCALE bytes of the [`StreamEvent`].
    pub event: Vec<u8>,
    /// 65-byte recoverable secp256k1 signature over `hash`.
    pub signature: Vec<u8>,
    /// Events-domain hash of `event`.
    pub hash: H256,
}

/// A validated envelope: the hash was recomputed and the signature recovered
/// to the event's `creator_address`. Immutable after parsing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedEvent {
    pub event: StreamEvent,
    pub envelope: Envelope,
    pub hash: H256,
}

impl ParsedEvent {
    pub fn creator_address(&self) -> Address {
        self.event.creator_address
    }
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct MiniblockHeader {
    pub sequence_number: u64,
    pub prev_miniblock_hash: H256,
    pub timestamp_epoch_ms: u64,
    pub event_hashes: Vec<H256>,
}

/// An atomic group of stream events with a linked-list header.
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct Miniblock {
    pub header: MiniblockHeader,
    /// Events-domain hash of the SCALE-encoded header.
    pub hash: H256,
    /// Signature of the producing node over `hash`.
    pub signature: Vec<u8>,
    pub events: Vec<Envelope>,
}

/// Opaque resumption token identifying a position in a stream from a
/// particular node's vantage.
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct SyncCookie {
    pub node_address: Address,
    pub stream_id: StreamId,
    pub minipool_gen: u64,
    pub prev_miniblock_hash: H256,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct StreamAndCookie {
    pub miniblocks: Vec<Miniblock>,
    pub next_sync_cookie: Option<SyncCookie>,
}

/// Reference to an event appended to a pre-existing stream.
#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct EventRef {
    pub stream_id: StreamId,
    pub hash: H256,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct CreateStreamRequest {
    pub stream_id: Vec<u8>,
    pub events: Vec<Envelope>,
    pub metadata: BTreeMap<String, Vec<u8>>,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct CreateStreamResponse {
    pub stream: Option<StreamAndCookie>,
    pub derived_events: Vec<EventRef>,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct AllocateStreamRequest {
    pub stream_id: StreamId,
    pub miniblock: Miniblock,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct AllocateStreamResponse {
    pub sync_cookie: SyncCookie,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct GetMiniblocksRequest {
    pub stream_id: StreamId,
    pub from_inclusive: u64,
    pub to_exclusive: u64,
}

#[derive(Clone, Debug, Decode, Encode, Eq, PartialEq)]
pub struct GetMiniblocksResponse {
    pub miniblocks: Vec<Miniblock>,
}
