//! Integer-quantized peak types and the spectrum records fed to the clustering engine.
use std::cmp::Ordering;

use thiserror::Error;

/// A quantized m/z coordinate
pub type MzBin = i32;

/// A quantized intensity
pub type Intensity = i32;

/// A combination of accessors every peak representation the scorer
/// compares must provide.
pub trait PeakLike {
    fn mz(&self) -> MzBin;
    fn intensity(&self) -> Intensity;
}

/// A single quantized fragment peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peak {
    pub mz: MzBin,
    pub intensity: Intensity,
}

impl Peak {
    pub fn new(mz: MzBin, intensity: Intensity) -> Self {
        Self { mz, intensity }
    }
}

impl PeakLike for Peak {
    #[inline]
    fn mz(&self) -> MzBin {
        self.mz
    }

    #[inline]
    fn intensity(&self) -> Intensity {
        self.intensity
    }
}

impl From<(MzBin, Intensity)> for Peak {
    fn from(value: (MzBin, Intensity)) -> Self {
        Self::new(value.0, value.1)
    }
}

/// A peak of a consensus spectrum.
///
/// `intensity` is the count-weighted average over the `count` contributing
/// peaks, never their sum, so it stays bounded as clusters grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsensusPeak {
    pub mz: MzBin,
    pub intensity: Intensity,
    /// The number of peaks folded into this one, always at least 1
    pub count: u32,
}

impl ConsensusPeak {
    pub fn new(mz: MzBin, intensity: Intensity, count: u32) -> Self {
        debug_assert!(count >= 1);
        Self {
            mz,
            intensity,
            count,
        }
    }

    /// Fold `other` into this peak as a weighted average, rounding once.
    ///
    /// Both peaks must share the same m/z.
    pub fn combine(&self, other: &ConsensusPeak) -> ConsensusPeak {
        debug_assert_eq!(self.mz, other.mz);
        let count = self.count + other.count;
        let weighted = self.intensity as f64 * self.count as f64
            + other.intensity as f64 * other.count as f64;
        let intensity = (weighted / count as f64).round() as Intensity;
        ConsensusPeak::new(self.mz, intensity, count)
    }
}

impl PeakLike for ConsensusPeak {
    #[inline]
    fn mz(&self) -> MzBin {
        self.mz
    }

    #[inline]
    fn intensity(&self) -> Intensity {
        self.intensity
    }
}

impl From<Peak> for ConsensusPeak {
    fn from(value: Peak) -> Self {
        Self::new(value.mz, value.intensity, 1)
    }
}

impl From<&Peak> for ConsensusPeak {
    fn from(value: &Peak) -> Self {
        Self::new(value.mz, value.intensity, 1)
    }
}

/// Order peaks by descending intensity, breaking ties on the lower m/z.
pub(crate) fn by_intensity_desc<P: PeakLike>(a: &P, b: &P) -> Ordering {
    b.intensity()
        .cmp(&a.intensity())
        .then_with(|| a.mz().cmp(&b.mz()))
}

/// Select the `n` most intense peaks of a spectrum, returned in m/z order.
pub fn highest_peaks<P: PeakLike + Clone>(peaks: &[P], n: usize) -> Vec<P> {
    if peaks.len() <= n {
        return peaks.to_vec();
    }
    let mut selected = peaks.to_vec();
    selected.sort_by(by_intensity_desc);
    selected.truncate(n);
    selected.sort_by_key(|p| p.mz());
    selected
}

/// An error that might occur when building a [`SpectrumRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpectrumError {
    #[error("Spectrum {id} has peaks out of m/z order at index {index}")]
    UnsortedPeaks { id: String, index: usize },
    #[error("Spectrum {id} has more than one peak at m/z bin {mz}")]
    DuplicatePeak { id: String, mz: MzBin },
}

/// An immutable, quantized spectrum as delivered by the binning stage.
///
/// The peak list is sorted by m/z with at most one peak per m/z bin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumRecord {
    pub id: String,
    pub precursor_mz: MzBin,
    pub precursor_charge: i32,
    pub peaks: Vec<Peak>,
}

impl SpectrumRecord {
    /// Create a new record, rejecting peak lists that are not sorted
    /// and unique by m/z.
    pub fn new(
        id: impl Into<String>,
        precursor_mz: MzBin,
        precursor_charge: i32,
        peaks: Vec<Peak>,
    ) -> Result<Self, SpectrumError> {
        let this = Self {
            id: id.into(),
            precursor_mz,
            precursor_charge,
            peaks,
        };
        this.validate()?;
        Ok(this)
    }

    /// Check the peak list ordering contract. Records that arrive through
    /// deserialization should be checked with this before use.
    pub fn validate(&self) -> Result<(), SpectrumError> {
        for (i, pair) in self.peaks.windows(2).enumerate() {
            match pair[0].mz.cmp(&pair[1].mz) {
                Ordering::Less => {}
                Ordering::Equal => {
                    return Err(SpectrumError::DuplicatePeak {
                        id: self.id.clone(),
                        mz: pair[1].mz,
                    })
                }
                Ordering::Greater => {
                    return Err(SpectrumError::UnsortedPeaks {
                        id: self.id.clone(),
                        index: i + 1,
                    })
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
        self.peaks.iter()
    }
}
