//! Progressive-disclosure encryption for 3D asset arrays.
//!
//! Every float32 mesh element (and optionally every image byte) is split
//! into three contiguous bit tiers `p`, `q` and `r`. Each tier is packed
//! across the whole asset and sealed under its own subkey, and the
//! ciphertext is written back into the same bit positions so the asset stays
//! loadable. Subkeys form a chain `k3 -> k2 -> k1` derived from the plaintext
//! itself: holding `k3` recovers everything, `k2` recovers `q` and `p`, `k1`
//! only `p`, and no key leaves the asset fully distorted.

pub mod aead;
pub mod array;
pub mod asset;
pub mod bits;
pub mod container;
pub mod engine;
pub mod error;
pub mod keys;
pub mod params;
pub mod preset;
pub mod rng;
pub mod system;
pub mod versioning;

pub use crate::aead::{AeadAlgorithm, AeadMetadata, META_WORDS};
pub use crate::array::{MeshArray, NdArray, Plaintext};
pub use crate::asset::{Asset, AssetError};
pub use crate::bits::{BitElement, TierArray, buffer_len, extract, insert};
pub use crate::container::{AssetContainer, MemoryContainer, OffContainer};
pub use crate::engine::{AadTable, CipherTarget, decrypt_block, encrypt_blocks};
pub use crate::error::{CipherError, Result};
pub use crate::keys::{
    Key, SubKey, compress, generate_keys, get_subkey, min_sample_len, verify_or_regenerate,
};
pub use crate::params::{AssetClass, BitRange, BlockSelection, CipherParams, Tier};
pub use crate::preset::{CipherConfig, DistortionLevel, KeyPolicy, cipher_preset};
pub use crate::rng::{
    SecureRng, derive_session_rng, fill_session_bytes, master_from_passphrase, secure_rng,
};
pub use crate::system::{
    AadData, AdaptiveSystem, CryptoSystem, DecryptionContext, DecryptionResponse,
    EncryptionResponse, Progress, SystemKind, VisualLevel,
};
pub use crate::versioning::*;
