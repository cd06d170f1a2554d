pub mod compression;
pub mod hashing;
pub mod notification;
pub mod payload;

use thiserror::Error;

pub use notification::{
    CompressionKind, HashingAlgorithm, IncomingNotification, KeyList, MembershipNotification,
    NotificationKind, Scope, UpdateStrategy,
};
pub use payload::{Action, KeyListAction};

/// Failures while decoding wire material. Every one of these is recovered
/// locally by degrading to an unbounded fetch; none is surfaced to the
/// embedder.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("notification JSON malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown update strategy code {0}")]
    UnknownStrategy(u8),
    #[error("unknown compression code {0}")]
    UnknownCompression(u8),
    #[error("unknown hashing algorithm code {0}")]
    UnknownHashing(u8),
    #[error("payload is not valid base64")]
    Base64,
    #[error("payload decompression failed: {0}")]
    Inflate(String),
    #[error("decompressed payload is not valid UTF-8")]
    Utf8,
    #[error("bitmap payload is empty")]
    EmptyBitmap,
}
