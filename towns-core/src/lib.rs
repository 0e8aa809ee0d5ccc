//! Core data structures and error types for the Towns node: stream ids,
//! protocol wire types, the structured error, the request context and the
//! capability traits the stream-creation path is built against.

pub mod context;
pub mod error;
pub mod protocol;
pub mod stream_id;
pub mod traits;
pub mod view;

pub use context::{CancelHandle, Context};
pub use error::{Err, Result, RiverError};
pub use protocol::{Address, Tags};
pub use stream_id::{StreamId, StreamKind};
pub use view::StreamView;

pub use primitive_types::{H160, H256, U256};
