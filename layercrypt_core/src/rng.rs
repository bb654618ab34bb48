//! Randomness sources.
//!
//! Master seeds, padding fill and AEAD nonces draw from whatever
//! `CryptoRng + RngCore` the caller threads in. Production paths use the OS
//! generator; tests and the demo derive a reproducible `ChaCha20Rng` from a
//! label so runs can be replayed.

use blake3::Hasher;
use rand::rngs::OsRng;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use crate::keys::{SUBKEY_BYTES, SubKey};

const MASTER_LABEL: &[u8] = b"layercrypt::k3";

/// OS-backed generator used for master seeds, padding and nonces.
pub type SecureRng = OsRng;

/// Deterministic generator derived from a seed, a stream index and a label.
pub fn derive_session_rng(seed: &[u8], stream: u64, label: &[u8]) -> ChaCha20Rng {
    let mut hasher = Hasher::new();
    hasher.update(seed);
    hasher.update(&stream.to_le_bytes());
    hasher.update(label);
    ChaCha20Rng::from_seed(*hasher.finalize().as_bytes())
}

/// Fills `out` from `derive_session_rng`, e.g. to turn a passphrase into a
/// master subkey.
pub fn fill_session_bytes(seed: &[u8], stream: u64, label: &[u8], out: &mut [u8]) {
    let mut rng = derive_session_rng(seed, stream, label);
    rng.fill_bytes(out);
}

pub fn secure_rng() -> SecureRng {
    OsRng
}

/// Master subkey `k3` stretched from a passphrase, so a chain can be
/// rebuilt from something memorable.
pub fn master_from_passphrase(passphrase: &[u8]) -> SubKey {
    let mut k3 = [0u8; SUBKEY_BYTES];
    fill_session_bytes(passphrase, 0, MASTER_LABEL, &mut k3);
    k3
}
