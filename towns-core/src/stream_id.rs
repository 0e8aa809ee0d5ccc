//! Typed 32-byte stream identifiers.
//!
//! The first byte of a stream id names the stream kind; the remainder is
//! kind-specific (user streams embed the owner address, others carry random
//! bytes chosen by the client).

use crate::error::{Err, Result, RiverError};
use parity_scale_codec::{Decode, Encode};
use primitive_types::H160;
use std::fmt;
use std::str::FromStr;

pub const STREAM_ID_LEN: usize = 32;

pub const STREAM_SPACE_PREFIX: u8 = 0x10;
pub const STREAM_CHANNEL_PREFIX: u8 = 0x20;
pub const STREAM_GDM_CHANNEL_PREFIX: u8 = 0x77;
pub const STREAM_MEDIA_PREFIX: u8 = 0x7f;
pub const STREAM_DM_CHANNEL_PREFIX: u8 = 0x88;
pub const STREAM_USER_INBOX_PREFIX: u8 = 0xa1;
pub const STREAM_USER_SETTINGS_PREFIX: u8 = 0xa5;
pub const STREAM_USER_PREFIX: u8 = 0xa8;
pub const STREAM_USER_METADATA_PREFIX: u8 = 0xad;

/// Stream kind, decoded from the id prefix byte.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StreamKind {
    Space,
    Channel,
    GdmChannel,
    Media,
    DmChannel,
    UserInbox,
    UserSettings,
    User,
    UserMetadata,
}

impl StreamKind {
    pub const fn from_prefix(prefix: u8) -> Option<Self> {
        match prefix {
            STREAM_SPACE_PREFIX => Some(Self::Space),
            STREAM_CHANNEL_PREFIX => Some(Self::Channel),
            STREAM_GDM_CHANNEL_PREFIX => Some(Self::GdmChannel),
            STREAM_MEDIA_PREFIX => Some(Self::Media),
            STREAM_DM_CHANNEL_PREFIX => Some(Self::DmChannel),
            STREAM_USER_INBOX_PREFIX => Some(Self::UserInbox),
            STREAM_USER_SETTINGS_PREFIX => Some(Self::UserSettings),
            STREAM_USER_PREFIX => Some(Self::User),
            STREAM_USER_METADATA_PREFIX => Some(Self::UserMetadata),
            _ => None,
        }
    }
}

/// A 32-byte stream identifier with a typed prefix byte. Immutable for the
/// life of the stream.
#[derive(Clone, Copy, Decode, Encode, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId([u8; STREAM_ID_LEN]);

impl StreamId {
    /// Validates and converts raw bytes into a stream id.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Ok(raw) = <[u8; STREAM_ID_LEN]>::try_from(bytes) else {
            return Err(RiverError::new(Err::InvalidArgument, "invalid stream id length")
                .tag("len", bytes.len()));
        };
        Ok(Self(raw))
    }

    /// The user-stream id owned by `addr`: user prefix, the 20-byte address,
    /// zero padding.
    pub fn user_stream_from_addr(addr: H160) -> Self {
        let mut raw = [0u8; STREAM_ID_LEN];
        raw[0] = STREAM_USER_PREFIX;
        raw[1..21].copy_from_slice(addr.as_bytes());
        Self(raw)
    }

    pub const fn prefix(&self) -> u8 {
        self.0[0]
    }

    pub const fn kind(&self) -> Option<StreamKind> {
        StreamKind::from_prefix(self.0[0])
    }

    pub const fn as_bytes(&self) -> &[u8; STREAM_ID_LEN] {
        &self.0
    }

    /// For user-scoped streams, the owner address embedded in the id.
    pub fn user_addr(&self) -> Option<H160> {
        match self.kind() {
            Some(
                StreamKind::User
                | StreamKind::UserInbox
                | StreamKind::UserSettings
                | StreamKind::UserMetadata,
            ) => Some(H160::from_slice(&self.0[1..21])),
            _ => None,
        }
    }
}

impl AsRef<[u8]> for StreamId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for StreamId {
    type Err = RiverError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|err| {
            RiverError::with_base(Err::InvalidArgument, "invalid stream id hex", err)
        })?;
        Self::from_bytes(&bytes)
    }
}
