use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::compression;
use super::notification::{self, CompressionKind, KeyList, MembershipNotification, UpdateStrategy};
use super::DecodeError;

/// Reconciliation action derived from a membership notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Pull latest state; the fetch may short-circuit once local state
    /// reaches `change_number`.
    TriggerFetch { change_number: Option<i64> },
    /// The target key is unaffected.
    NoOp,
    /// The notification itself asserts the removal; no fetch needed.
    ApplyRemoval { names: HashSet<String> },
}

/// Membership direction a key-list payload implies for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyListAction {
    Add,
    Remove,
    None,
}

/// Base64-decodes and inflates a notification payload into raw bytes.
pub fn decode_bytes(data: &str, kind: CompressionKind) -> Result<Vec<u8>, DecodeError> {
    let raw = STANDARD.decode(data).map_err(|_| DecodeError::Base64)?;
    compression::decompress(kind, &raw)
}

/// Base64-decodes and inflates a notification payload into a string.
pub fn decode_string(data: &str, kind: CompressionKind) -> Result<String, DecodeError> {
    String::from_utf8(decode_bytes(data, kind)?).map_err(|_| DecodeError::Utf8)
}

/// Bit index assigned to `key_hash` within a bitmap of `bitmap_len` bytes.
/// `None` when the bitmap is empty.
pub fn key_index(key_hash: u64, bitmap_len: usize) -> Option<usize> {
    if bitmap_len == 0 {
        return None;
    }
    Some((key_hash % (bitmap_len as u64 * 8)) as usize)
}

pub fn is_set(bitmap: &[u8], index: usize) -> bool {
    let byte = index / 8;
    byte < bitmap.len() && bitmap[byte] & (1 << (index % 8)) != 0
}

pub fn key_list_action(list: &KeyList, key_hash: u64) -> KeyListAction {
    if list.removed.contains(&key_hash) {
        KeyListAction::Remove
    } else if list.added.contains(&key_hash) {
        KeyListAction::Add
    } else {
        KeyListAction::None
    }
}

/// Decides the reconciliation action for `notification` as seen by the key
/// whose protocol hash is `key_hash`.
///
/// Decode failures on bounded and key-list payloads degrade to an
/// unbounded fetch: losing the cheap relevance test costs one extra fetch,
/// never correctness.
pub fn classify(notification: &MembershipNotification, key_hash: u64) -> Action {
    let change_number = notification.change_number;
    match notification.strategy {
        UpdateStrategy::UnboundedFetch => Action::TriggerFetch { change_number },
        UpdateStrategy::BoundedFetch => match bounded_fetch(notification, key_hash) {
            Ok(action) => action,
            Err(_) => Action::TriggerFetch { change_number },
        },
        UpdateStrategy::KeyList => match key_list_fetch(notification, key_hash) {
            Ok(action) => action,
            Err(_) => Action::TriggerFetch { change_number },
        },
        UpdateStrategy::Removal => {
            if notification.names.is_empty() {
                Action::NoOp
            } else {
                Action::ApplyRemoval {
                    names: notification.names.clone(),
                }
            }
        }
    }
}

fn bounded_fetch(
    notification: &MembershipNotification,
    key_hash: u64,
) -> Result<Action, DecodeError> {
    let data = notification.data.as_deref().ok_or(DecodeError::EmptyBitmap)?;
    let bitmap = decode_bytes(data, notification.compression)?;
    let index = key_index(key_hash, bitmap.len()).ok_or(DecodeError::EmptyBitmap)?;
    if is_set(&bitmap, index) {
        Ok(Action::TriggerFetch {
            change_number: notification.change_number,
        })
    } else {
        Ok(Action::NoOp)
    }
}

fn key_list_fetch(
    notification: &MembershipNotification,
    key_hash: u64,
) -> Result<Action, DecodeError> {
    let data = notification.data.as_deref().ok_or(DecodeError::Base64)?;
    let list = notification::parse_key_list(&decode_string(data, notification.compression)?)?;
    match key_list_action(&list, key_hash) {
        KeyListAction::None => Ok(Action::NoOp),
        KeyListAction::Add | KeyListAction::Remove => Ok(Action::TriggerFetch {
            change_number: notification.change_number,
        }),
    }
}
