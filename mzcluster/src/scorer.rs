//! Spectrum similarity scoring
use itertools::{EitherOrBoth, Itertools};
use statrs::distribution::{ChiSquared, Continuous, Discrete, Hypergeometric};

use crate::kendall::{kendall_tau, kendall_tau_p_value};
use crate::peaks::{highest_peaks, PeakLike};

pub type ScoreType = f64;

/// The largest score a [`SimilarityScorer`] may produce
pub const MAX_SCORE: ScoreType = 200.0;

/// A stateless comparison of two m/z-sorted peak lists. Higher scores mean the two
/// spectra are less likely to match by chance.
pub trait SimilarityScorer: Clone + Send + Sync {
    fn correlate<P: PeakLike + Clone>(&self, a: &[P], b: &[P]) -> ScoreType;

    fn name(&self) -> &str;
}

/// Which peaks of each spectrum take part in a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComparisonFilter {
    All,
    HighestPeaks(usize),
}

impl Default for ComparisonFilter {
    fn default() -> Self {
        Self::HighestPeaks(40)
    }
}

impl ComparisonFilter {
    pub fn apply<P: PeakLike + Clone>(&self, peaks: &[P]) -> Vec<P> {
        match self {
            Self::All => peaks.to_vec(),
            Self::HighestPeaks(n) => highest_peaks(peaks, *n),
        }
    }
}

/// Combines a hypergeometric test of the number of shared peaks with a Kendall rank
/// correlation test of their intensities using Fisher's method.
///
/// The score is the negative log density of the combined statistic under a
/// chi-squared distribution with four degrees of freedom.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CombinedFisherIntensityTest {
    pub comparison_filter: ComparisonFilter,
}

impl CombinedFisherIntensityTest {
    pub fn new(comparison_filter: ComparisonFilter) -> Self {
        Self { comparison_filter }
    }

    /// The probability of drawing exactly `n_shared` matching peaks by chance.
    pub fn overlap_p_value<P: PeakLike>(a: &[P], b: &[P], n_shared: usize) -> f64 {
        let (Some(a_first), Some(a_last), Some(b_first), Some(b_last)) =
            (a.first(), a.last(), b.first(), b.last())
        else {
            return 1.0;
        };
        let min_mz = a_first.mz().min(b_first.mz()) as i64;
        let max_mz = a_last.mz().max(b_last.mz()) as i64;
        let population = (2 * (max_mz - min_mz)) as u64;
        let draws = a.len().min(b.len()) as u64;
        let successes = a.len().max(b.len()) as u64;
        if population < successes {
            return 1.0;
        }
        let p = match Hypergeometric::new(population, successes, draws) {
            Ok(dist) => dist.pmf(n_shared as u64),
            Err(_) => return 1.0,
        };
        if p == 0.0 || !p.is_finite() {
            1.0
        } else {
            p
        }
    }

    /// Fisher's method over two p-values, scored as `-ln` of the chi-squared(4) density.
    pub fn combine_p_values(p_overlap: f64, p_rank: f64) -> ScoreType {
        let statistic = -2.0 * (p_overlap.ln() + p_rank.ln());
        if statistic == 0.0 {
            return 0.0;
        }
        if !statistic.is_finite() {
            return MAX_SCORE;
        }
        let density = match ChiSquared::new(4.0) {
            Ok(dist) => dist.pdf(statistic),
            Err(_) => return MAX_SCORE,
        };
        if density <= 0.0 || !density.is_finite() {
            return MAX_SCORE;
        }
        (-density.ln()).clamp(0.0, MAX_SCORE)
    }
}

impl SimilarityScorer for CombinedFisherIntensityTest {
    fn correlate<P: PeakLike + Clone>(&self, a: &[P], b: &[P]) -> ScoreType {
        let a = self.comparison_filter.apply(a);
        let b = self.comparison_filter.apply(b);

        let (x, y): (Vec<f64>, Vec<f64>) = a
            .iter()
            .merge_join_by(b.iter(), |p, q| p.mz().cmp(&q.mz()))
            .filter_map(|item| match item {
                EitherOrBoth::Both(p, q) => Some((p.intensity() as f64, q.intensity() as f64)),
                _ => None,
            })
            .unzip();

        let n_shared = x.len();
        if n_shared == 0 {
            return 0.0;
        }

        let p_overlap = Self::overlap_p_value(&a, &b, n_shared);
        let tau = kendall_tau(&x, &y);
        let p_rank = kendall_tau_p_value(tau, n_shared);
        Self::combine_p_values(p_overlap, p_rank)
    }

    fn name(&self) -> &str {
        "combined-fisher-intensity-test"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::Peak;

    fn spectrum(n: i32, offset: i32) -> Vec<Peak> {
        (0..n)
            .map(|i| Peak::new(100 + i * 37 + offset, 1000 + (i * 7919) % 503))
            .collect()
    }

    #[test]
    fn test_disjoint() {
        let scorer = CombinedFisherIntensityTest::default();
        let a = spectrum(20, 0);
        let b = spectrum(20, 5);
        assert_eq!(scorer.correlate(&a, &b), 0.0);
    }

    #[test]
    fn test_identical_scores_high() {
        let scorer = CombinedFisherIntensityTest::default();
        let a = spectrum(30, 0);
        let score = scorer.correlate(&a, &a);
        assert!(score > 20.0, "{score}");
        assert!(score <= MAX_SCORE);

        let b: Vec<Peak> = a
            .iter()
            .enumerate()
            .map(|(i, p)| if i % 2 == 0 { *p } else { Peak::new(p.mz + 3, p.intensity) })
            .collect();
        let partial = scorer.correlate(&a, &b);
        assert!(partial < score, "{partial} >= {score}");
    }

    #[test]
    fn test_single_shared_peak() {
        let scorer = CombinedFisherIntensityTest::new(ComparisonFilter::All);
        let a = vec![Peak::new(100, 10)];
        let score = scorer.correlate(&a, &a);
        assert!(score.is_finite());
        assert!(score >= 0.0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_combine_p_values() {
        assert_eq!(CombinedFisherIntensityTest::combine_p_values(1.0, 1.0), 0.0);
        assert_eq!(
            CombinedFisherIntensityTest::combine_p_values(0.0, 0.5),
            MAX_SCORE
        );
        let moderate = CombinedFisherIntensityTest::combine_p_values(1e-3, 1e-2);
        let strong = CombinedFisherIntensityTest::combine_p_values(1e-10, 1e-8);
        assert!(moderate > 0.0 && moderate < strong);
    }

    #[test]
    fn test_filter() {
        let peaks = spectrum(50, 0);
        assert_eq!(ComparisonFilter::All.apply(&peaks).len(), 50);
        assert_eq!(ComparisonFilter::default().apply(&peaks).len(), 40);
    }
}
