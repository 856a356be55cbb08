//! Policies estimating how many comparisons were made to find a match, used to correct
//! the acceptance test for multiple testing.
use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;

use crate::peaks::MzBin;

pub trait ComparisonsAssessor: Send + Sync {
    /// The number of comparisons to charge a match found for a cluster with precursor
    /// `precursor_mz` while `window_cluster_count` clusters were in its window.
    fn number_of_comparisons(&self, precursor_mz: MzBin, window_cluster_count: usize) -> usize;
}

impl<F> ComparisonsAssessor for F
where
    F: Fn(MzBin, usize) -> usize + Send + Sync,
{
    fn number_of_comparisons(&self, precursor_mz: MzBin, window_cluster_count: usize) -> usize {
        (self)(precursor_mz, window_cluster_count)
    }
}

/// Charge at least a fixed number of comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinNumberComparisonsAssessor {
    pub min_comparisons: usize,
}

impl MinNumberComparisonsAssessor {
    pub fn new(min_comparisons: usize) -> Self {
        Self { min_comparisons }
    }
}

impl ComparisonsAssessor for MinNumberComparisonsAssessor {
    fn number_of_comparisons(&self, _precursor_mz: MzBin, window_cluster_count: usize) -> usize {
        self.min_comparisons.max(window_cluster_count)
    }
}

/// Charge the number of input spectra whose precursor falls into the same precursor bin,
/// reflecting how crowded that region of the precursor axis was before clustering began.
#[derive(Debug, Clone, Default)]
pub struct SpectraPerBinComparisonsAssessor {
    bin_width: MzBin,
    min_comparisons: usize,
    counts: HashMap<MzBin, usize, BuildIdentityHasher<MzBin>>,
}

impl SpectraPerBinComparisonsAssessor {
    pub fn new<I: IntoIterator<Item = MzBin>>(
        precursors: I,
        bin_width: MzBin,
        min_comparisons: usize,
    ) -> Self {
        let bin_width = bin_width.max(1);
        let mut counts: HashMap<MzBin, usize, BuildIdentityHasher<MzBin>> = HashMap::default();
        for mz in precursors {
            *counts.entry(mz.div_euclid(bin_width)).or_default() += 1;
        }
        tracing::debug!(
            "Built precursor density over {} bins of width {bin_width}",
            counts.len()
        );
        Self {
            bin_width,
            min_comparisons,
            counts,
        }
    }

    pub fn bin_width(&self) -> MzBin {
        self.bin_width
    }

    pub fn spectra_in_bin(&self, precursor_mz: MzBin) -> usize {
        self.counts
            .get(&precursor_mz.div_euclid(self.bin_width))
            .copied()
            .unwrap_or_default()
    }
}

impl ComparisonsAssessor for SpectraPerBinComparisonsAssessor {
    fn number_of_comparisons(&self, precursor_mz: MzBin, window_cluster_count: usize) -> usize {
        self.min_comparisons
            .max(self.spectra_in_bin(precursor_mz))
            .max(window_cluster_count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_min_number() {
        let assessor = MinNumberComparisonsAssessor::new(100);
        assert_eq!(assessor.number_of_comparisons(5000, 3), 100);
        assert_eq!(assessor.number_of_comparisons(5000, 300), 300);
    }

    #[test]
    fn test_spectra_per_bin() {
        let precursors = [1000, 1001, 1099, 1100, 2000, -5];
        let assessor = SpectraPerBinComparisonsAssessor::new(precursors, 100, 2);
        assert_eq!(assessor.spectra_in_bin(1050), 3);
        assert_eq!(assessor.spectra_in_bin(-1), 1);
        assert_eq!(assessor.number_of_comparisons(1050, 1), 3);
        assert_eq!(assessor.number_of_comparisons(2000, 1), 2);
        assert_eq!(assessor.number_of_comparisons(2000, 9), 9);
        assert_eq!(assessor.number_of_comparisons(9000, 0), 2);
    }

    #[test]
    fn test_closure() {
        let assessor = |_: MzBin, n: usize| n * 2;
        assert_eq!(assessor.number_of_comparisons(0, 4), 8);
    }
}
