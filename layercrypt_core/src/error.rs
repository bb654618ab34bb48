use thiserror::Error;

use crate::params::Tier;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid cipher parameters p={p} q={q} r={r}: {reason}")]
    InvalidParams {
        p: u32,
        q: u32,
        r: u32,
        reason: &'static str,
    },

    #[error("empty bit range [{start}, {stop})")]
    EmptyRange { start: u32, stop: u32 },

    #[error("bit range [{start}, {stop}) does not fit a {width}-bit element")]
    InvalidRange { start: u32, stop: u32, width: u32 },

    #[error("bit codec does not support {dtype} arrays of shape {shape:?}")]
    UnsupportedArray {
        dtype: &'static str,
        shape: Vec<usize>,
    },

    #[error("array shape {shape:?} does not hold {len} elements")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    #[error("block selection must name exactly one tier")]
    InvalidSelection,

    #[error("malformed authentication metadata: {0}")]
    MalformedMetadata(&'static str),

    #[error("asset too small to derive keys: need {required} elements, found {available}")]
    InsufficientPlaintext { required: usize, available: usize },

    #[error("invalid key")]
    InvalidKey,

    #[error("authentication metadata outside freshness window")]
    Expired,

    #[error("{tier:?} tier buffer length mismatch: expected {expected} words, found {found}")]
    LengthMismatch {
        tier: Tier,
        expected: usize,
        found: usize,
    },

    #[error("key holds no subkeys")]
    EmptyKey,

    #[error("missing subkey for {0:?} tier")]
    MissingSubkey(Tier),

    #[error("key chain incomplete after decryption")]
    IncompleteKey,

    #[error("supplied key does not match the key derived from the asset")]
    KeyMismatch,

    #[error("no cipher-eligible data found in asset")]
    NoCipherData,
}

pub type Result<T> = std::result::Result<T, CipherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_plaintext() {
        let err = CipherError::InsufficientPlaintext {
            required: 129,
            available: 8,
        };
        assert_eq!(
            err.to_string(),
            "asset too small to derive keys: need 129 elements, found 8"
        );
    }

    #[test]
    fn display_invalid_key() {
        assert_eq!(CipherError::InvalidKey.to_string(), "invalid key");
    }

    #[test]
    fn display_length_mismatch_names_tier() {
        let err = CipherError::LengthMismatch {
            tier: Tier::Q,
            expected: 4,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "Q tier buffer length mismatch: expected 4 words, found 3"
        );
    }
}
