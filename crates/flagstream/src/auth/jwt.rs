use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use super::error::AuthError;

const SUBSCRIBE_ACTION: &str = "subscribe";

/// Decoded streaming token: expiry plus the channels this client is
/// allowed to subscribe to, in the order the issuer listed them.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub raw: String,
    pub expiration_epoch_secs: i64,
    pub channels: Vec<String>,
}

impl AuthToken {
    /// Returns `Ok(())` if the token has not yet expired at `now_epoch_secs`.
    pub fn ensure_not_expired(&self, now_epoch_secs: i64) -> Result<(), AuthError> {
        if now_epoch_secs >= self.expiration_epoch_secs {
            Err(AuthError::InvalidToken("token has expired"))
        } else {
            Ok(())
        }
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    #[serde(rename = "exp")]
    expiration: i64,
    // The capability map is JSON-encoded as a string inside the payload.
    capability: Option<String>,
}

/// Capability entries in payload encounter order. A plain JSON map type
/// would lose the order, which decides channel precedence downstream.
struct CapabilityMap(Vec<(String, Vec<String>)>);

impl<'de> Deserialize<'de> for CapabilityMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapabilityVisitor;

        impl<'de> Visitor<'de> for CapabilityVisitor {
            type Value = CapabilityMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of channel names to action lists")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, Vec<String>>()? {
                    entries.push(entry);
                }
                Ok(CapabilityMap(entries))
            }
        }

        deserializer.deserialize_map(CapabilityVisitor)
    }
}

/// Decodes a raw `header.payload.signature` token into an [`AuthToken`].
///
/// Only the payload segment is consumed; the signature is validated
/// server-side before the token ever reaches this client. Pure, no I/O.
pub fn parse(raw: &str) -> Result<AuthToken, AuthError> {
    let payload_segment = raw
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(AuthError::InvalidToken("token has no payload segment"))?;

    let decoded = decode_segment(payload_segment)?;
    let payload: TokenPayload = serde_json::from_slice(&decoded)
        .map_err(|_| AuthError::InvalidToken("payload is not valid JSON"))?;

    let capability = payload
        .capability
        .ok_or(AuthError::InvalidToken("payload has no capability field"))?;
    let capability: CapabilityMap = serde_json::from_str(&capability)
        .map_err(|_| AuthError::InvalidToken("capability field is not a channel map"))?;

    let channels = capability
        .0
        .into_iter()
        .filter(|(_, actions)| actions.iter().any(|action| action == SUBSCRIBE_ACTION))
        .map(|(channel, _)| channel)
        .collect();

    Ok(AuthToken {
        raw: raw.to_string(),
        expiration_epoch_secs: payload.expiration,
        channels,
    })
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
    // Issuers disagree on padding; strip any before decoding.
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|_| AuthError::InvalidToken("payload is not valid base64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn token_with_payload(payload_json: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn parses_channels_in_capability_order() {
        let capability = r#"{"A_mySegments":["subscribe"],"A_splits":["subscribe"],"control":["subscribe"]}"#;
        let payload = format!(
            r#"{{"exp":1583947812,"iat":1583944212,"capability":{}}}"#,
            serde_json::to_string(capability).unwrap()
        );
        let raw = token_with_payload(&payload);

        let token = parse(&raw).unwrap();

        assert_eq!(token.expiration_epoch_secs, 1583947812);
        assert_eq!(token.raw, raw);
        assert_eq!(token.channels, vec!["A_mySegments", "A_splits", "control"]);
    }

    #[test]
    fn control_channel_keeps_its_natural_position() {
        let capability =
            r#"{"control":["subscribe"],"B_mySegments":["subscribe"],"B_splits":["subscribe"]}"#;
        let payload = format!(
            r#"{{"exp":2208988800,"capability":{}}}"#,
            serde_json::to_string(capability).unwrap()
        );

        let token = parse(&token_with_payload(&payload)).unwrap();

        assert_eq!(token.channels, vec!["control", "B_mySegments", "B_splits"]);
    }

    #[test]
    fn skips_channels_without_subscribe_action() {
        let capability =
            r#"{"A_mySegments":["subscribe"],"internal":["publish"],"control":["subscribe"]}"#;
        let payload = format!(
            r#"{{"exp":2208988800,"capability":{}}}"#,
            serde_json::to_string(capability).unwrap()
        );

        let token = parse(&token_with_payload(&payload)).unwrap();

        assert_eq!(token.channels, vec!["A_mySegments", "control"]);
    }

    #[test]
    fn tolerates_padded_payload_segment() {
        let capability = r#"{"A_mySegments":["subscribe"]}"#;
        let payload = format!(
            r#"{{"exp":2208988800,"capability":{}}}"#,
            serde_json::to_string(capability).unwrap()
        );
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
        let mut encoded = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        encoded.push_str("==");
        let raw = format!("{header}.{encoded}.sig");

        let token = parse(&raw).unwrap();

        assert_eq!(token.channels, vec!["A_mySegments"]);
    }

    #[test]
    fn header_only_token_fails() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        assert!(parse(&format!("{header}.")).is_err());
        assert!(parse(&header).is_err());
    }

    #[test]
    fn empty_and_garbage_tokens_fail() {
        assert!(parse("").is_err());
        assert!(parse("novalidtoken").is_err());
        assert!(parse("a.b.c").is_err());
    }

    #[test]
    fn missing_capability_field_fails() {
        let raw = token_with_payload(r#"{"exp":2208988800}"#);
        assert!(matches!(
            parse(&raw),
            Err(AuthError::InvalidToken("payload has no capability field"))
        ));
    }

    #[test]
    fn payload_without_header_still_parses() {
        let capability = r#"{"A_mySegments":["subscribe"]}"#;
        let payload = format!(
            r#"{{"exp":2208988800,"capability":{}}}"#,
            serde_json::to_string(capability).unwrap()
        );
        let encoded = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        let raw = format!(".{encoded}.sig");

        let token = parse(&raw).unwrap();

        assert_eq!(token.channels, vec!["A_mySegments"]);
    }

    #[test]
    fn expiry_check() {
        let capability = r#"{"A_mySegments":["subscribe"]}"#;
        let payload = format!(
            r#"{{"exp":1000,"capability":{}}}"#,
            serde_json::to_string(capability).unwrap()
        );
        let token = parse(&token_with_payload(&payload)).unwrap();

        assert!(token.ensure_not_expired(999).is_ok());
        assert!(token.ensure_not_expired(1000).is_err());
    }
}
