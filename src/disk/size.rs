//! Byte sizes of block devices and size requests

use crate::utils::error::{Result, StrataplanError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

pub const KIB: u64 = 1024;
pub const MIB: u64 = KIB * 1024;
pub const GIB: u64 = MIB * 1024;
pub const TIB: u64 = GIB * 1024;

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([kmgt]?)(?:i?b)?\s*$").expect("size pattern is valid")
});

/// A size in bytes
///
/// `DiskSize::UNLIMITED` stands for an open-ended maximum. Arithmetic
/// saturates, so adding to an unlimited size keeps it unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "SizeRepr", into = "String")]
pub struct DiskSize(u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Bytes(u64),
    Text(String),
}

impl DiskSize {
    pub const ZERO: DiskSize = DiskSize(0);
    pub const UNLIMITED: DiskSize = DiskSize(u64::MAX);

    pub const fn b(bytes: u64) -> Self {
        DiskSize(bytes)
    }

    pub const fn kib(n: u64) -> Self {
        DiskSize(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        DiskSize(n * MIB)
    }

    pub const fn gib(n: u64) -> Self {
        DiskSize(n * GIB)
    }

    /// Number of bytes
    pub const fn to_i(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_unlimited(self) -> bool {
        self.0 == u64::MAX
    }

    /// Round down to a multiple of `grain`
    pub fn floor_align(self, grain: DiskSize) -> DiskSize {
        if self.is_unlimited() || grain.is_zero() {
            return self;
        }
        DiskSize((self.0 / grain.0) * grain.0)
    }

    /// Round up to a multiple of `grain`
    pub fn ceil_align(self, grain: DiskSize) -> DiskSize {
        if self.is_unlimited() || grain.is_zero() {
            return self;
        }
        DiskSize(self.0.div_ceil(grain.0).saturating_mul(grain.0))
    }

    pub fn saturating_mul(self, factor: u64) -> DiskSize {
        DiskSize(self.0.saturating_mul(factor))
    }

    /// Exact textual form, using the largest binary unit that divides the size
    pub fn to_exact_string(self) -> String {
        if self.is_unlimited() {
            return "unlimited".to_string();
        }
        for (unit, name) in [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")] {
            if self.0 >= unit && self.0 % unit == 0 {
                return format!("{} {}", self.0 / unit, name);
            }
        }
        format!("{} B", self.0)
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if self.is_unlimited() {
            write!(f, "unlimited")
        } else if bytes >= TIB {
            write!(f, "{:.2} TiB", bytes as f64 / TIB as f64)
        } else if bytes >= GIB {
            write!(f, "{:.2} GiB", bytes as f64 / GIB as f64)
        } else if bytes >= MIB {
            write!(f, "{:.2} MiB", bytes as f64 / MIB as f64)
        } else if bytes >= KIB {
            write!(f, "{:.2} KiB", bytes as f64 / KIB as f64)
        } else {
            write!(f, "{} B", bytes)
        }
    }
}

impl FromStr for DiskSize {
    type Err = StrataplanError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(DiskSize::UNLIMITED);
        }

        let caps = SIZE_RE
            .captures(trimmed)
            .ok_or_else(|| StrataplanError::InvalidSize(s.to_string()))?;

        let number: f64 = caps[1]
            .parse()
            .map_err(|_| StrataplanError::InvalidSize(s.to_string()))?;
        let multiplier = match caps[2].to_ascii_lowercase().as_str() {
            "k" => KIB,
            "m" => MIB,
            "g" => GIB,
            "t" => TIB,
            _ => 1,
        };

        let bytes = number * multiplier as f64;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(StrataplanError::InvalidSize(s.to_string()));
        }
        Ok(DiskSize(bytes.round() as u64))
    }
}

impl TryFrom<SizeRepr> for DiskSize {
    type Error = StrataplanError;

    fn try_from(repr: SizeRepr) -> Result<Self> {
        match repr {
            SizeRepr::Bytes(bytes) => Ok(DiskSize(bytes)),
            SizeRepr::Text(text) => text.parse(),
        }
    }
}

impl From<DiskSize> for String {
    fn from(size: DiskSize) -> String {
        size.to_exact_string()
    }
}

impl Add for DiskSize {
    type Output = DiskSize;

    fn add(self, other: DiskSize) -> DiskSize {
        DiskSize(self.0.saturating_add(other.0))
    }
}

impl Sub for DiskSize {
    type Output = DiskSize;

    fn sub(self, other: DiskSize) -> DiskSize {
        if self.is_unlimited() {
            return self;
        }
        DiskSize(self.0.saturating_sub(other.0))
    }
}

impl Sum for DiskSize {
    fn sum<I: Iterator<Item = DiskSize>>(iter: I) -> DiskSize {
        iter.fold(DiskSize::ZERO, |acc, s| acc + s)
    }
}
