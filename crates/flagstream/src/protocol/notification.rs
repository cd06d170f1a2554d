use std::collections::HashSet;

use serde::Deserialize;

use super::DecodeError;

pub const TYPE_SEGMENT_UPDATE: &str = "MEMBERSHIP_MS_UPDATE";
pub const TYPE_LARGE_SEGMENT_UPDATE: &str = "MEMBERSHIP_LS_UPDATE";

/// Which membership collection a notification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Segment,
    LargeSegment,
}

/// Wire code selecting the decode/decision algorithm for a membership
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    UnboundedFetch,
    BoundedFetch,
    KeyList,
    Removal,
}

impl UpdateStrategy {
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(UpdateStrategy::UnboundedFetch),
            1 => Ok(UpdateStrategy::BoundedFetch),
            2 => Ok(UpdateStrategy::KeyList),
            3 => Ok(UpdateStrategy::Removal),
            other => Err(DecodeError::UnknownStrategy(other)),
        }
    }
}

/// Compression applied to a notification's `data` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    Gzip,
    Zlib,
}

impl CompressionKind {
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Gzip),
            2 => Ok(CompressionKind::Zlib),
            other => Err(DecodeError::UnknownCompression(other)),
        }
    }
}

/// Hash family the server used for bitmap indices and desync delays.
/// Selected per notification so the server can roll new algorithms without
/// breaking deployed clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashingAlgorithm {
    None,
    Murmur3_32,
}

impl HashingAlgorithm {
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(HashingAlgorithm::None),
            1 => Ok(HashingAlgorithm::Murmur3_32),
            other => Err(DecodeError::UnknownHashing(other)),
        }
    }
}

/// A decoded membership-change notification. Transient: built per incoming
/// message and consumed immediately by the dispatcher.
#[derive(Debug, Clone)]
pub struct MembershipNotification {
    pub scope: Scope,
    pub strategy: UpdateStrategy,
    pub compression: CompressionKind,
    pub data: Option<String>,
    pub names: HashSet<String>,
    pub change_number: Option<i64>,
    pub update_interval_ms: Option<u64>,
    pub algorithm_seed: Option<i32>,
    pub hashing_algorithm: HashingAlgorithm,
}

/// Envelope classification of a raw push message.
#[derive(Debug, Clone)]
pub enum NotificationKind {
    Membership(Scope),
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct IncomingNotification {
    pub kind: NotificationKind,
    pub json: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipWire {
    #[serde(default)]
    update_strategy: Option<u8>,
    #[serde(default)]
    compression: Option<u8>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    segment_name: Option<String>,
    #[serde(default)]
    segment_names: Option<Vec<String>>,
    #[serde(default)]
    change_number: Option<i64>,
    #[serde(default)]
    update_interval_ms: Option<u64>,
    #[serde(default)]
    algorithm_seed: Option<i32>,
    #[serde(default)]
    hashing_algorithm: Option<u8>,
}

/// Classifies a raw message body by its `type` field, keeping the body
/// around for the typed parse.
pub fn parse_incoming(json: &str) -> Result<IncomingNotification, DecodeError> {
    let envelope: Envelope = serde_json::from_str(json)?;
    let kind = match envelope.kind.as_str() {
        TYPE_SEGMENT_UPDATE => NotificationKind::Membership(Scope::Segment),
        TYPE_LARGE_SEGMENT_UPDATE => NotificationKind::Membership(Scope::LargeSegment),
        other => NotificationKind::Unknown(other.to_string()),
    };
    Ok(IncomingNotification {
        kind,
        json: json.to_string(),
    })
}

/// Parses the typed membership notification out of a raw message body.
///
/// A missing strategy decodes as an unbounded fetch; unknown codes are
/// errors so the caller can degrade to the safe fallback.
pub fn parse_membership(json: &str, scope: Scope) -> Result<MembershipNotification, DecodeError> {
    let wire: MembershipWire = serde_json::from_str(json)?;

    let strategy = match wire.update_strategy {
        None => UpdateStrategy::UnboundedFetch,
        Some(code) => UpdateStrategy::from_code(code)?,
    };
    let compression = match wire.compression {
        None => CompressionKind::None,
        Some(code) => CompressionKind::from_code(code)?,
    };
    let hashing_algorithm = match wire.hashing_algorithm {
        None => HashingAlgorithm::None,
        Some(code) => HashingAlgorithm::from_code(code)?,
    };

    let mut names: HashSet<String> = wire.segment_names.unwrap_or_default().into_iter().collect();
    if let Some(name) = wire.segment_name {
        names.insert(name);
    }

    Ok(MembershipNotification {
        scope,
        strategy,
        compression,
        data: wire.data,
        names,
        change_number: wire.change_number,
        update_interval_ms: wire.update_interval_ms,
        algorithm_seed: wire.algorithm_seed,
        hashing_algorithm,
    })
}

/// Compact add/remove hash sets carried by a key-list payload.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct KeyList {
    #[serde(rename = "a", default)]
    pub added: HashSet<u64>,
    #[serde(rename = "r", default)]
    pub removed: HashSet<u64>,
}

pub fn parse_key_list(json: &str) -> Result<KeyList, DecodeError> {
    Ok(serde_json::from_str(json)?)
}
