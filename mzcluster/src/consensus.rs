//! Incremental consensus spectrum aggregation.
//!
//! A [`ConsensusAggregator`] keeps a running, count-weighted peak list for all spectra
//! folded into a cluster. The peak list presented to the scorer is derived from it lazily:
//! peak intensities are adapted by how many members observed them, then a windowed noise
//! filter keeps only the most intense peaks of each m/z window.
use std::borrow::Cow;

use itertools::{EitherOrBoth, Itertools};

use crate::peaks::{by_intensity_desc, ConsensusPeak, MzBin, PeakLike, SpectrumRecord};

/// Parameters controlling consensus spectrum finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsensusParams {
    /// The width of each noise filter window in quantized m/z units
    pub window_size: MzBin,
    /// The number of peaks to retain in each noise filter window
    pub peaks_per_window: usize,
    /// Consensus spectra with fewer peaks than this are not noise filtered
    pub min_peaks_for_filtering: usize,
}

impl ConsensusParams {
    pub fn new(window_size: MzBin, peaks_per_window: usize, min_peaks_for_filtering: usize) -> Self {
        Self {
            window_size,
            peaks_per_window,
            min_peaks_for_filtering,
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            window_size: 100,
            peaks_per_window: 5,
            min_peaks_for_filtering: 50,
        }
    }
}

/// Whether the finalized consensus reflects every peak folded in so far
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConsensusState {
    Fresh(Vec<ConsensusPeak>),
    #[default]
    Stale,
}

/// Merge two sorted, m/z-unique peak runs into one, combining peaks that share an m/z.
fn merge_sorted_runs<P>(existing: &[ConsensusPeak], incoming: &[P]) -> Vec<ConsensusPeak>
where
    P: Copy + Into<ConsensusPeak>,
{
    if incoming.is_empty() {
        return existing.to_vec();
    }
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    merged.extend(
        existing
            .iter()
            .copied()
            .merge_join_by(incoming.iter().copied().map(Into::into), |a, b| {
                a.mz.cmp(&b.mz)
            })
            .map(|item| match item {
                EitherOrBoth::Both(a, b) => a.combine(&b),
                EitherOrBoth::Left(a) => a,
                EitherOrBoth::Right(b) => b,
            }),
    );
    merged
}

/// Scale each peak's intensity by the fraction of cluster members that contributed to it.
///
/// Peaks observed in every member are boosted by up to 2.55x, while peaks seen once in a
/// large cluster are damped towards 0.95x.
pub fn adapt_peak_intensities(peaks: &[ConsensusPeak], n_spectra: usize) -> Vec<ConsensusPeak> {
    let n = n_spectra.max(1) as f64;
    peaks
        .iter()
        .map(|p| {
            let fraction = p.count as f64 / n;
            let factor = 0.95 + 0.05 * (1.0 + fraction).powi(5);
            let intensity = (p.intensity as f64 * factor).round() as i32;
            ConsensusPeak::new(p.mz, intensity, p.count)
        })
        .collect()
}

/// Keep the `params.peaks_per_window` most intense peaks in each m/z window of width
/// `params.window_size`.
pub fn filter_noise(mut peaks: Vec<ConsensusPeak>, params: &ConsensusParams) -> Vec<ConsensusPeak> {
    if peaks.len() < params.min_peaks_for_filtering {
        return peaks;
    }
    let width = params.window_size.max(1);
    let mut kept = Vec::with_capacity(peaks.len());
    let mut start = 0;
    while start < peaks.len() {
        let window = peaks[start].mz.div_euclid(width);
        let end = peaks[start..]
            .iter()
            .position(|p| p.mz.div_euclid(width) != window)
            .map(|i| start + i)
            .unwrap_or(peaks.len());
        let run = &mut peaks[start..end];
        if run.len() > params.peaks_per_window {
            run.sort_by(by_intensity_desc);
            kept.extend_from_slice(&run[..params.peaks_per_window]);
        } else {
            kept.extend_from_slice(run);
        }
        start = end;
    }
    kept.sort_by_key(|p| p.mz);
    kept
}

/// The running consensus of all spectra assigned to a single cluster.
///
/// Not thread-safe by construction: it is owned by exactly one cluster and only mutated
/// by whichever thread owns that cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusAggregator {
    peaks: Vec<ConsensusPeak>,
    n_spectra: usize,
    precursor_mz_sum: i64,
    charge_sum: i64,
    params: ConsensusParams,
    state: ConsensusState,
}

impl Default for ConsensusAggregator {
    fn default() -> Self {
        Self::new(ConsensusParams::default())
    }
}

impl ConsensusAggregator {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            peaks: Vec::new(),
            n_spectra: 0,
            precursor_mz_sum: 0,
            charge_sum: 0,
            params,
            state: ConsensusState::Stale,
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn set_params(&mut self, params: ConsensusParams) {
        if self.params != params {
            self.params = params;
            self.state = ConsensusState::Stale;
        }
    }

    /// Fold the peaks of each spectrum into the running consensus
    pub fn add_spectra<'a, I: IntoIterator<Item = &'a SpectrumRecord>>(&mut self, spectra: I) {
        let mut added = 0usize;
        for spectrum in spectra {
            self.peaks = merge_sorted_runs(&self.peaks, &spectrum.peaks);
            self.n_spectra += 1;
            self.precursor_mz_sum += spectrum.precursor_mz as i64;
            self.charge_sum += spectrum.precursor_charge as i64;
            added += 1;
        }
        if added > 0 {
            self.state = ConsensusState::Stale;
        }
    }

    /// Fold another aggregator's running consensus into this one
    pub fn add_consensus_spectrum(&mut self, other: &ConsensusAggregator) {
        if other.n_spectra == 0 && other.peaks.is_empty() {
            return;
        }
        self.peaks = merge_sorted_runs(&self.peaks, &other.peaks);
        self.n_spectra += other.n_spectra;
        self.precursor_mz_sum += other.precursor_mz_sum;
        self.charge_sum += other.charge_sum;
        self.state = ConsensusState::Stale;
    }

    /// The running aggregate, before intensity adaptation and noise filtering
    pub fn peaks(&self) -> &[ConsensusPeak] {
        &self.peaks
    }

    pub fn n_spectra(&self) -> usize {
        self.n_spectra
    }

    /// The mean precursor m/z of all contributing spectra, rounded to the nearest bin
    pub fn precursor_mz(&self) -> MzBin {
        if self.n_spectra == 0 {
            return 0;
        }
        (self.precursor_mz_sum as f64 / self.n_spectra as f64).round() as MzBin
    }

    /// The mean precursor charge of all contributing spectra, rounded
    pub fn precursor_charge(&self) -> i32 {
        if self.n_spectra == 0 {
            return 0;
        }
        (self.charge_sum as f64 / self.n_spectra as f64).round() as i32
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.state, ConsensusState::Stale)
    }

    fn finalize(&self) -> Vec<ConsensusPeak> {
        let adapted = adapt_peak_intensities(&self.peaks, self.n_spectra);
        filter_noise(adapted, &self.params)
    }

    /// The finalized consensus spectrum, recomputed only if new peaks arrived since the
    /// last read.
    pub fn consensus_spectrum(&mut self) -> &[ConsensusPeak] {
        if self.is_stale() {
            let peaks = self.finalize();
            tracing::trace!(
                "Finalized consensus of {} spectra: {} -> {} peaks",
                self.n_spectra,
                self.peaks.len(),
                peaks.len()
            );
            self.state = ConsensusState::Fresh(peaks);
        }
        match &self.state {
            ConsensusState::Fresh(peaks) => peaks,
            ConsensusState::Stale => unreachable!("consensus state was just refreshed"),
        }
    }

    /// The finalized consensus spectrum without caching it.
    pub fn view(&self) -> Cow<'_, [ConsensusPeak]> {
        match &self.state {
            ConsensusState::Fresh(peaks) => Cow::Borrowed(peaks.as_slice()),
            ConsensusState::Stale => Cow::Owned(self.finalize()),
        }
    }

    /// The m/z values of the `n` most intense finalized peaks
    pub fn highest_peak_mzs(&self, n: usize) -> Vec<MzBin> {
        let view = self.view();
        let mut peaks: Vec<&ConsensusPeak> = view.iter().collect();
        peaks.sort_by(|a, b| by_intensity_desc(*a, *b));
        peaks.into_iter().take(n).map(|p| p.mz()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::Peak;

    fn record(id: &str, pairs: &[(i32, i32)]) -> SpectrumRecord {
        SpectrumRecord::new(
            id,
            500_000,
            2,
            pairs.iter().copied().map(Peak::from).collect(),
        )
        .unwrap()
    }

    fn no_filter() -> ConsensusParams {
        ConsensusParams::new(100, 5, usize::MAX)
    }

    #[test]
    fn test_merge_interleaved() {
        let mut agg = ConsensusAggregator::new(no_filter());
        agg.add_spectra([&record("a", &[(10, 100), (30, 50), (50, 20)])]);
        agg.add_spectra([&record("b", &[(5, 10), (30, 150), (60, 30)])]);
        let mzs: Vec<_> = agg.peaks().iter().map(|p| p.mz).collect();
        assert_eq!(mzs, vec![5, 10, 30, 50, 60]);
        let shared = agg.peaks()[2];
        assert_eq!(shared.count, 2);
        assert_eq!(shared.intensity, 100);
        assert_eq!(agg.n_spectra(), 2);
    }

    #[test]
    fn test_order_independence() {
        let spectra = [
            record("a", &[(10, 100), (30, 50), (50, 20)]),
            record("b", &[(5, 10), (30, 150), (60, 30)]),
            record("c", &[(10, 40), (30, 100), (61, 30)]),
            record("d", &[(10, 60), (50, 40)]),
        ];

        let mut forward = ConsensusAggregator::new(no_filter());
        forward.add_spectra(spectra.iter());

        let mut backward = ConsensusAggregator::new(no_filter());
        backward.add_spectra(spectra.iter().rev());

        let mut left = ConsensusAggregator::new(no_filter());
        left.add_spectra(spectra[..2].iter());
        let mut right = ConsensusAggregator::new(no_filter());
        right.add_spectra(spectra[2..].iter());
        left.add_consensus_spectrum(&right);

        for agg in [&backward, &left] {
            assert_eq!(agg.peaks().len(), forward.peaks().len());
            for (a, b) in agg.peaks().iter().zip(forward.peaks()) {
                assert_eq!(a.mz, b.mz);
                assert_eq!(a.count, b.count);
                assert!((a.intensity - b.intensity).abs() <= 1, "{a:?} vs {b:?}");
            }
            assert_eq!(agg.n_spectra(), 4);
        }
    }

    #[test]
    fn test_counts_never_decrease() {
        let mut agg = ConsensusAggregator::new(no_filter());
        agg.add_spectra([&record("a", &[(10, 100), (30, 50)])]);
        let before: Vec<_> = agg.peaks().to_vec();
        agg.add_spectra([&record("b", &[(30, 10), (40, 10)])]);
        for p in before {
            let after = agg.peaks().iter().find(|q| q.mz == p.mz).unwrap();
            assert!(after.count >= p.count);
        }
    }

    #[test]
    fn test_empty_is_identity() {
        let mut agg = ConsensusAggregator::new(no_filter());
        agg.add_spectra([&record("a", &[(10, 100), (30, 50)])]);
        let before = agg.peaks().to_vec();
        agg.add_consensus_spectrum(&ConsensusAggregator::new(no_filter()));
        assert_eq!(agg.peaks(), before.as_slice());
        assert_eq!(agg.n_spectra(), 1);
        assert!(!before.is_empty());
    }

    #[test]
    fn test_adaptation() {
        let peaks = vec![ConsensusPeak::new(10, 100, 4), ConsensusPeak::new(20, 100, 1)];
        let adapted = adapt_peak_intensities(&peaks, 4);
        // p = 1 => 0.95 + 0.05 * 32
        assert_eq!(adapted[0].intensity, 255);
        // p = 0.25 => 0.95 + 0.05 * 1.25^5 = 1.10259
        assert_eq!(adapted[1].intensity, 110);
    }

    #[test]
    fn test_noise_filter() {
        let params = ConsensusParams::new(100, 2, 4);
        let peaks = vec![
            ConsensusPeak::new(10, 5, 1),
            ConsensusPeak::new(20, 50, 1),
            ConsensusPeak::new(30, 40, 1),
            ConsensusPeak::new(150, 1, 1),
            ConsensusPeak::new(160, 2, 1),
            ConsensusPeak::new(250, 7, 1),
        ];
        let kept = filter_noise(peaks.clone(), &params);
        let mzs: Vec<_> = kept.iter().map(|p| p.mz).collect();
        assert_eq!(mzs, vec![20, 30, 150, 160, 250]);

        // Below the floor, nothing is removed
        let params = ConsensusParams::new(100, 2, 10);
        assert_eq!(filter_noise(peaks.clone(), &params), peaks);
    }

    #[test]
    fn test_lazy_state() {
        let mut agg = ConsensusAggregator::new(no_filter());
        assert!(agg.is_stale());
        agg.add_spectra([&record("a", &[(10, 100), (30, 50)])]);
        let n = agg.consensus_spectrum().len();
        assert_eq!(n, 2);
        assert!(!agg.is_stale());
        assert!(matches!(agg.view(), Cow::Borrowed(_)));
        agg.add_spectra([&record("b", &[(40, 10)])]);
        assert!(agg.is_stale());
        assert!(matches!(agg.view(), Cow::Owned(_)));
        assert_eq!(agg.consensus_spectrum().len(), 3);
    }

    #[test]
    fn test_precursor_statistics() {
        let mut agg = ConsensusAggregator::default();
        let mut a = record("a", &[(10, 1)]);
        a.precursor_mz = 1000;
        let mut b = record("b", &[(10, 1)]);
        b.precursor_mz = 1003;
        agg.add_spectra([&a, &b]);
        assert_eq!(agg.precursor_mz(), 1002);
        assert_eq!(agg.precursor_charge(), 2);
    }
}
