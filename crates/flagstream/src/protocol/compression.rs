use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};

use super::notification::CompressionKind;
use super::DecodeError;

/// Inflates a notification payload according to its declared compression.
pub fn decompress(kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|err| DecodeError::Inflate(err.to_string()))?;
            Ok(out)
        }
        CompressionKind::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|err| DecodeError::Inflate(err.to_string()))?;
            Ok(out)
        }
    }
}
