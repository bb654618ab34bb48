//! Serialization format versions for keys and authentication metadata.

use serde::de::Error as DeError;

pub const KEY_VERSION: u16 = 1;
pub const AAD_TABLE_VERSION: u16 = 1;
pub const AAD_DATA_VERSION: u16 = 1;

/// Rejects any version other than `expected`, telling apart data written by
/// a newer release from corrupt or legacy data.
pub fn expect_version<E: DeError>(found: u16, expected: u16, label: &'static str) -> Result<(), E> {
    match found {
        v if v == expected => Ok(()),
        v if v > expected => Err(E::custom(format!(
            "{label} version {v} is newer than supported version {expected}"
        ))),
        v => Err(E::custom(format!(
            "{label} version mismatch: expected {expected}, found {v}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_versions_are_named() {
        assert!(expect_version::<serde_json::Error>(1, 1, "Key").is_ok());
        let newer = expect_version::<serde_json::Error>(2, 1, "Key").unwrap_err();
        assert!(newer.to_string().contains("newer"));
        let older = expect_version::<serde_json::Error>(0, 1, "AadData").unwrap_err();
        assert!(older.to_string().contains("AadData version mismatch"));
    }
}
