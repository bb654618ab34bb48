//! Cipher parameter model: three contiguous bit tiers per element.
//!
//! Offsets count from the most significant bit of an element, so bit 0 of a
//! float32 is its sign bit. Mesh tiers start after the sign and exponent
//! (bit 9) and must stay inside the 23-bit mantissa; image tiers partition the
//! whole byte with `r` holding the least significant bits.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CipherError, Result};

/// First mantissa bit of an IEEE-754 float32 counted from the sign bit.
pub const MESH_BASE_OFFSET: u32 = 9;
/// Width of the float32 mantissa available to the three tiers.
pub const MESH_MAX_BITS: u32 = 23;
pub const IMAGE_ELEMENT_BITS: u32 = 8;

/// One of the three bit tiers. `P` is the most significant and needs the
/// deepest key, `R` the least significant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    P,
    Q,
    R,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::P, Tier::Q, Tier::R];

    /// Column of this tier in the authentication table.
    pub const fn index(self) -> usize {
        match self {
            Tier::P => 0,
            Tier::Q => 1,
            Tier::R => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Mesh,
    Image,
}

impl AssetClass {
    pub const fn element_bits(self) -> u32 {
        match self {
            AssetClass::Mesh => 32,
            AssetClass::Image => IMAGE_ELEMENT_BITS,
        }
    }
}

/// Half-open range `[start, stop)` of bit offsets within one element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitRange {
    start: u32,
    stop: u32,
}

impl BitRange {
    pub fn new(start: u32, stop: u32) -> Result<Self> {
        if stop <= start {
            return Err(CipherError::EmptyRange { start, stop });
        }
        Ok(Self { start, stop })
    }

    pub const fn start(&self) -> u32 {
        self.start
    }

    pub const fn stop(&self) -> u32 {
        self.stop
    }

    pub const fn width(&self) -> u32 {
        self.stop - self.start
    }
}

/// Validated tier layout for one asset class. Offsets are computed once at
/// construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherParams {
    class: AssetClass,
    p: u32,
    q: u32,
    r: u32,
    ranges: [BitRange; 3],
}

impl CipherParams {
    pub fn new(class: AssetClass, p: u32, q: u32, r: u32) -> Result<Self> {
        let invalid = |reason| CipherError::InvalidParams { p, q, r, reason };
        if p < 1 || q < 1 || r < 1 {
            return Err(invalid("all three tiers must be at least one bit wide"));
        }
        let total = p.saturating_add(q).saturating_add(r);
        match class {
            AssetClass::Mesh if total > MESH_MAX_BITS => {
                Err(invalid("mesh tiers must fit the 23-bit mantissa"))
            }
            AssetClass::Image if total != IMAGE_ELEMENT_BITS => {
                Err(invalid("image tiers must partition all 8 bits"))
            }
            _ => Ok(Self::layout(class, p, q, r)),
        }
    }

    /// Offsets for widths that already satisfy the class constraints.
    pub(crate) const fn layout(class: AssetClass, p: u32, q: u32, r: u32) -> Self {
        let ranges = match class {
            AssetClass::Mesh => {
                let p_stop = MESH_BASE_OFFSET + p;
                let q_stop = p_stop + q;
                [
                    BitRange {
                        start: MESH_BASE_OFFSET,
                        stop: p_stop,
                    },
                    BitRange {
                        start: p_stop,
                        stop: q_stop,
                    },
                    BitRange {
                        start: q_stop,
                        stop: q_stop + r,
                    },
                ]
            }
            AssetClass::Image => {
                let r_start = IMAGE_ELEMENT_BITS - r;
                let q_start = r_start - q;
                [
                    BitRange {
                        start: q_start - p,
                        stop: q_start,
                    },
                    BitRange {
                        start: q_start,
                        stop: r_start,
                    },
                    BitRange {
                        start: r_start,
                        stop: IMAGE_ELEMENT_BITS,
                    },
                ]
            }
        };
        Self {
            class,
            p,
            q,
            r,
            ranges,
        }
    }

    pub fn mesh(p: u32, q: u32, r: u32) -> Result<Self> {
        Self::new(AssetClass::Mesh, p, q, r)
    }

    pub fn image(p: u32, q: u32, r: u32) -> Result<Self> {
        Self::new(AssetClass::Image, p, q, r)
    }

    pub const fn class(&self) -> AssetClass {
        self.class
    }

    pub const fn widths(&self) -> (u32, u32, u32) {
        (self.p, self.q, self.r)
    }

    pub const fn range(&self, tier: Tier) -> BitRange {
        self.ranges[tier.index()]
    }

    pub const fn width(&self, tier: Tier) -> u32 {
        match tier {
            Tier::P => self.p,
            Tier::Q => self.q,
            Tier::R => self.r,
        }
    }

    pub const fn start(&self, tier: Tier) -> u32 {
        self.range(tier).start()
    }

    pub const fn stop(&self, tier: Tier) -> u32 {
        self.range(tier).stop()
    }

    /// Narrowest width among the selected tiers.
    pub fn min_selected_width(&self, selection: BlockSelection) -> Option<u32> {
        selection.tiers().map(|tier| self.width(tier)).min()
    }
}

impl Serialize for CipherParams {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Helper {
            class: AssetClass,
            p: u32,
            q: u32,
            r: u32,
        }
        Helper {
            class: self.class,
            p: self.p,
            q: self.q,
            r: self.r,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CipherParams {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            class: AssetClass,
            p: u32,
            q: u32,
            r: u32,
        }
        let helper = Helper::deserialize(deserializer)?;
        CipherParams::new(helper.class, helper.p, helper.q, helper.r).map_err(D::Error::custom)
    }
}

/// Which tiers an operation acts on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockSelection {
    pub p: bool,
    pub q: bool,
    pub r: bool,
}

impl BlockSelection {
    pub const fn all() -> Self {
        Self {
            p: true,
            q: true,
            r: true,
        }
    }

    pub const fn only(tier: Tier) -> Self {
        Self {
            p: matches!(tier, Tier::P),
            q: matches!(tier, Tier::Q),
            r: matches!(tier, Tier::R),
        }
    }

    pub const fn contains(&self, tier: Tier) -> bool {
        match tier {
            Tier::P => self.p,
            Tier::Q => self.q,
            Tier::R => self.r,
        }
    }

    pub fn tiers(self) -> impl Iterator<Item = Tier> {
        Tier::ALL.into_iter().filter(move |tier| self.contains(*tier))
    }

    /// The selected tier when exactly one flag is set.
    pub fn single_block(&self) -> Result<Tier> {
        let mut tiers = self.tiers();
        match (tiers.next(), tiers.next()) {
            (Some(tier), None) => Ok(tier),
            _ => Err(CipherError::InvalidSelection),
        }
    }
}
