//! Shared byte-count scalars and alignment helpers.

use serde::{Deserialize, Serialize};

pub const KIBI: u64 = 1024;
pub const MEBI: u64 = 1024 * 1024;
pub const GIBI: u64 = 1024 * 1024 * 1024;
pub const TEBI: u64 = 1024 * 1024 * 1024 * 1024;

/// How a [`SizeScalar`] renders: scaled to the nearest binary unit, or pinned
/// to MiB. The mode is an argument of the formatter rather than process-wide
/// state, so two call sites can render differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeDisplayMode {
    Auto,
    Mebi,
}

/// A byte count.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SizeScalar(pub u64);

impl SizeScalar {
    pub fn format(&self, mode: SizeDisplayMode) -> String {
        match mode {
            SizeDisplayMode::Mebi => format!("{:.2} MiB", self.0 as f64 / MEBI as f64),
            SizeDisplayMode::Auto => {
                let (divisor, unit) = match self.0 {
                    b if b >= TEBI => (TEBI, "TiB"),
                    b if b >= GIBI => (GIBI, "GiB"),
                    b if b >= MEBI => (MEBI, "MiB"),
                    b if b >= KIBI => (KIBI, "KiB"),
                    _ => (1, "B"),
                };
                if divisor == 1 {
                    format!("{} B", self.0)
                } else {
                    format!("{:.2} {}", self.0 as f64 / divisor as f64, unit)
                }
            }
        }
    }
}

impl std::ops::Add for SizeScalar {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for SizeScalar {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for SizeScalar {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl From<u64> for SizeScalar {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Bytes per second, for the throughput prediction.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BytesPerSecondScalar(pub f64);

impl BytesPerSecondScalar {
    pub fn format(&self) -> String {
        let bps = self.0;
        let (divisor, unit) = match bps {
            b if b >= TEBI as f64 => (TEBI as f64, "TiB/s"),
            b if b >= GIBI as f64 => (GIBI as f64, "GiB/s"),
            b if b >= MEBI as f64 => (MEBI as f64, "MiB/s"),
            _ => (KIBI as f64, "KiB/s"),
        };
        format!("{:.2} {}", bps / divisor, unit)
    }
}

/// Round `n` up to the next multiple of `multiple`. `multiple` must be
/// non-zero.
pub fn pad(n: u64, multiple: u64) -> u64 {
    assert!(multiple > 0, "pad multiple must be non-zero");
    n.div_ceil(multiple) * multiple
}

/// Bytes needed to advance `position` to the next `alignment` boundary.
/// Zero when already aligned.
pub fn padding_for(position: u64, alignment: u64) -> u64 {
    assert!(alignment > 0, "alignment must be non-zero");
    let rem = position % alignment;
    if rem == 0 {
        0
    } else {
        alignment - rem
    }
}
