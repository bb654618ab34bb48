//! Block encryption engine.
//!
//! Each tier is packed across every target array into one word stream and
//! sealed under its own subkey. Ciphertext words are scattered back into the
//! arrays at the same bit positions, so the ciphertext keeps the plaintext
//! shapes. The final word of every per-array sub-buffer also carries bits
//! that belong to no element (padding), so it is recorded verbatim in the
//! authentication table and substituted back before opening.
//!
//! Table layout: one `[p, q, r]` padding row per array, followed by
//! `META_WORDS` rows whose column `t` holds the AEAD metadata of tier `t`.

use log::debug;
use rand_core::{CryptoRng, RngCore};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::aead::{self, AeadAlgorithm, AeadMetadata, META_WORDS};
use crate::array::NdArray;
use crate::bits::{TierArray, bytes_to_words, words_to_bytes};
use crate::error::{CipherError, Result};
use crate::keys::Key;
use crate::params::{AssetClass, BlockSelection, CipherParams, Tier};
use crate::versioning::{AAD_TABLE_VERSION, expect_version};

/// One array together with the tier layout applied to it.
#[derive(Clone, Debug, PartialEq)]
pub struct CipherTarget {
    pub array: TierArray,
    pub params: CipherParams,
}

impl CipherTarget {
    pub fn mesh(array: NdArray<f32>, params: CipherParams) -> Result<Self> {
        Self::new(TierArray::Float(array), params)
    }

    pub fn image(array: NdArray<u8>, params: CipherParams) -> Result<Self> {
        Self::new(TierArray::Byte(array), params)
    }

    fn new(array: TierArray, params: CipherParams) -> Result<Self> {
        let expected = match array {
            TierArray::Float(_) => AssetClass::Mesh,
            TierArray::Byte(_) => AssetClass::Image,
        };
        if params.class() != expected {
            return Err(CipherError::MalformedMetadata(
                "cipher parameters do not match array type",
            ));
        }
        Ok(Self { array, params })
    }
}

/// Padding words and per-tier AEAD metadata for one encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AadTable {
    rows: Vec<[u32; 3]>,
}

impl AadTable {
    pub fn new(padding: Vec<[u32; 3]>, metadata: [AeadMetadata; 3]) -> Self {
        let mut rows = padding;
        let words = metadata.map(|meta| meta.to_words());
        rows.extend((0..META_WORDS).map(|row| [words[0][row], words[1][row], words[2][row]]));
        Self { rows }
    }

    fn from_rows(rows: Vec<[u32; 3]>) -> Result<Self> {
        if rows.len() < META_WORDS {
            return Err(CipherError::MalformedMetadata(
                "authentication table is shorter than its metadata rows",
            ));
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[[u32; 3]] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [[u32; 3]] {
        &mut self.rows
    }

    /// Number of arrays the table carries padding for.
    pub fn array_count(&self) -> usize {
        self.rows.len() - META_WORDS
    }

    pub fn padding(&self, index: usize, tier: Tier) -> Option<u32> {
        self.rows[..self.array_count()]
            .get(index)
            .map(|row| row[tier.index()])
    }

    pub fn metadata(&self, tier: Tier) -> Result<AeadMetadata> {
        let column: Vec<u32> = self.rows[self.array_count()..]
            .iter()
            .map(|row| row[tier.index()])
            .collect();
        AeadMetadata::from_words(&column)
    }
}

impl Serialize for AadTable {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Helper<'a> {
            version: u16,
            rows: &'a [[u32; 3]],
        }
        Helper {
            version: AAD_TABLE_VERSION,
            rows: &self.rows,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AadTable {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            rows: Vec<[u32; 3]>,
        }
        let helper = Helper::deserialize(deserializer)?;
        expect_version::<D::Error>(helper.version, AAD_TABLE_VERSION, "AadTable")?;
        AadTable::from_rows(helper.rows).map_err(D::Error::custom)
    }
}

/// Encrypts all three tiers of `targets` under `key`.
///
/// Returns ciphertext copies of the arrays in input order and the
/// authentication table. `targets` itself is left untouched.
pub fn encrypt_blocks<R: RngCore + CryptoRng>(
    targets: &[CipherTarget],
    key: &Key,
    algorithm: AeadAlgorithm,
    rng: &mut R,
) -> Result<(Vec<TierArray>, AadTable)> {
    let mut subkeys = Vec::with_capacity(3);
    for tier in Tier::ALL {
        subkeys.push(key.subkey(tier).ok_or(CipherError::MissingSubkey(tier))?);
    }

    let mut streams: [Vec<u32>; 3] = Default::default();
    let mut lens = Vec::with_capacity(targets.len());
    for target in targets {
        let mut per_tier = [0usize; 3];
        for tier in Tier::ALL {
            let words = target
                .array
                .extract(target.params.range(tier), rng.next_u32())?;
            per_tier[tier.index()] = words.len();
            streams[tier.index()].extend(words);
        }
        lens.push(per_tier);
    }

    let mut sealed: [Vec<u32>; 3] = Default::default();
    let mut metadata = Vec::with_capacity(3);
    for tier in Tier::ALL {
        let ti = tier.index();
        let mut bytes = words_to_bytes(&streams[ti]);
        metadata.push(aead::seal(algorithm, subkeys[ti], &mut bytes, rng)?);
        sealed[ti] = bytes_to_words(&bytes)?;
        debug!("{:?} tier: sealed {} words", tier, sealed[ti].len());
    }

    let mut ciphertext = Vec::with_capacity(targets.len());
    let mut padding = Vec::with_capacity(targets.len());
    let mut offsets = [0usize; 3];
    for (target, per_tier) in targets.iter().zip(&lens) {
        let mut array = target.array.clone();
        let mut row = [0u32; 3];
        for tier in Tier::ALL {
            let ti = tier.index();
            let words = &sealed[ti][offsets[ti]..offsets[ti] + per_tier[ti]];
            array.insert(words, target.params.range(tier))?;
            row[ti] = words.last().copied().unwrap_or(0);
            offsets[ti] += per_tier[ti];
        }
        ciphertext.push(array);
        padding.push(row);
    }

    for tier in Tier::ALL {
        let ti = tier.index();
        if offsets[ti] != sealed[ti].len() {
            return Err(CipherError::LengthMismatch {
                tier,
                expected: sealed[ti].len(),
                found: offsets[ti],
            });
        }
    }

    let metadata: [AeadMetadata; 3] = match metadata.try_into() {
        Ok(metadata) => metadata,
        Err(_) => return Err(CipherError::MalformedMetadata("missing tier metadata")),
    };
    Ok((ciphertext, AadTable::new(padding, metadata)))
}

/// Decrypts the single tier named by `selection` in place.
pub fn decrypt_block(
    targets: &mut [CipherTarget],
    key: &Key,
    table: &AadTable,
    selection: BlockSelection,
    algorithm: AeadAlgorithm,
    ttl: Option<u64>,
) -> Result<()> {
    let tier = selection.single_block()?;
    let ti = tier.index();
    if table.array_count() != targets.len() {
        return Err(CipherError::MalformedMetadata(
            "authentication table does not match array count",
        ));
    }
    let subkey = key.subkey(tier).ok_or(CipherError::MissingSubkey(tier))?;
    let metadata = table.metadata(tier)?;

    let mut stream = Vec::new();
    let mut lens = Vec::with_capacity(targets.len());
    for (idx, target) in targets.iter().enumerate() {
        let mut words = target.array.extract(target.params.range(tier), 0)?;
        if let Some(last) = words.last_mut() {
            *last = table.rows()[idx][ti];
        }
        lens.push(words.len());
        stream.extend(words);
    }
    let expected = stream.len();

    let mut bytes = words_to_bytes(&stream);
    aead::open(algorithm, subkey, &mut bytes, &metadata, ttl)?;
    let plain = bytes_to_words(&bytes)?;
    if plain.len() != expected {
        return Err(CipherError::LengthMismatch {
            tier,
            expected,
            found: plain.len(),
        });
    }

    let mut offset = 0;
    for (target, len) in targets.iter_mut().zip(lens) {
        target
            .array
            .insert(&plain[offset..offset + len], target.params.range(tier))?;
        offset += len;
    }
    debug!("{:?} tier: opened {} words", tier, offset);
    Ok(())
}
