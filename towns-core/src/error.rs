use std::error::Error as StdError;
use std::fmt;

/// Semantic error kind, mirrored by the protocol error codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum Err {
    /// Caller-provided bytes are malformed (hex, address length, stream id).
    #[error("INVALID_ARGUMENT")]
    InvalidArgument,
    /// Event set violates the schema or stream-prefix rules.
    #[error("BAD_STREAM_CREATION_PARAMS")]
    BadStreamCreationParams,
    /// Missing file, env var or unreadable key. Startup-only.
    #[error("BAD_CONFIG")]
    BadConfig,
    /// Requested entity is unknown to this node.
    #[error("NOT_FOUND")]
    NotFound,
    /// Membership, existence or entitlement check failed.
    #[error("PERMISSION_DENIED")]
    PermissionDenied,
    /// The chain reports the stream as already allocated.
    #[error("ALREADY_EXISTS")]
    AlreadyExists,
    /// Serialization, unexpected oracle errors, derived-event append failures.
    #[error("INTERNAL")]
    Internal,
    /// The request context was cancelled or timed out.
    #[error("CANCELED")]
    Canceled,
    /// A downstream node or chain endpoint could not be reached.
    #[error("UNAVAILABLE")]
    Unavailable,
}

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Structured error carried across the whole node: a semantic kind, a
/// message, a function tag for metrics, key/value context and an optional
/// base cause chain.
#[derive(Debug)]
pub struct RiverError {
    kind: Err,
    message: String,
    func: Option<&'static str>,
    tags: Vec<(&'static str, String)>,
    base: Option<BoxedCause>,
}

impl RiverError {
    pub fn new(kind: Err, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), func: None, tags: Vec::new(), base: None }
    }

    /// Like [`RiverError::new`], with the underlying cause attached.
    pub fn with_base(
        kind: Err,
        message: impl Into<String>,
        base: impl Into<BoxedCause>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            func: None,
            tags: Vec::new(),
            base: Some(base.into()),
        }
    }

    #[must_use]
    pub fn func(mut self, func: &'static str) -> Self {
        self.func = Some(func);
        self
    }

    #[must_use]
    pub fn tag(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.tags.push((key, value.to_string()));
        self
    }

    #[must_use]
    pub const fn kind(&self) -> Err {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tags(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.tags.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// True if this error or any `RiverError` in its cause chain carries
    /// `kind`. Used to treat e.g. a wrapped `AlreadyExists` as idempotent.
    pub fn is_kind_with_bases(&self, kind: Err) -> bool {
        if self.kind == kind {
            return true;
        }
        let mut cause = self.base.as_deref().map(|err| err as &(dyn StdError + 'static));
        while let Some(err) = cause {
            if let Some(river) = err.downcast_ref::<Self>() {
                if river.kind == kind {
                    return true;
                }
            }
            cause = err.source();
        }
        false
    }
}

impl fmt::Display for RiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(func) = self.func {
            write!(f, " [{func}]")?;
        }
        for (key, value) in &self.tags {
            write!(f, " {key}={value}")?;
        }
        if let Some(base) = &self.base {
            write!(f, ": {base}")?;
        }
        Ok(())
    }
}

impl StdError for RiverError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.base.as_deref().map(|err| err as &(dyn StdError + 'static))
    }
}

pub type Result<T> = std::result::Result<T, RiverError>;
