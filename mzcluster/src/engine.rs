//! The greedy, multi-round clustering engine.
//!
//! Each round makes a single left-to-right pass over clusters sorted by precursor m/z. Every
//! incoming cluster is compared against the surviving clusters within the precursor
//! tolerance and merged into the first one whose similarity is significant at that round's
//! threshold. Thresholds descend from round to round, so later rounds accept weaker matches
//! but only between clusters that have already been compared once.
use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::cdf::CdfTable;
use crate::cluster::{GreedySpectralCluster, DEFAULT_COMPARISON_CAPACITY};
use crate::comparisons::ComparisonsAssessor;
use crate::consensus::ConsensusParams;
use crate::peaks::{ConsensusPeak, MzBin, SpectrumRecord};
use crate::predicates::{is_known_comparison, ClusterPredicate};
use crate::scorer::SimilarityScorer;

/// An error that might occur when configuring a [`GreedyClusteringEngine`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineConstructionError {
    #[error("The precursor tolerance must be positive, got {0}")]
    InvalidPrecursorTolerance(MzBin),
    #[error("The final threshold {end} must not exceed the starting threshold {start}")]
    ThresholdOrder { start: f64, end: f64 },
    #[error("Thresholds must lie within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),
    #[error("At least two clustering rounds are required, got {0}")]
    TooFewRounds(usize),
    #[error("The consensus noise filter window size must be positive, got {0}")]
    InvalidWindowSize(MzBin),
    #[error("The consensus noise filter must keep at least one peak per window")]
    InvalidPeaksPerWindow,
    #[error("The comparison cache capacity must be positive")]
    InvalidComparisonCapacity,
    #[error("No {0} was provided")]
    MissingComponent(&'static str),
}

/// An error that aborts a clustering round
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusteringError {
    #[error(
        "Clusters are not sorted by precursor m/z in round {round}: cluster {index} has precursor {current} after {previous}"
    )]
    InputOrderingViolation {
        round: usize,
        index: usize,
        previous: MzBin,
        current: MzBin,
    },
}

/// Tunable parameters of a [`GreedyClusteringEngine`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineParams {
    /// The largest precursor m/z difference between two compared clusters
    pub precursor_tolerance: MzBin,
    /// The confidence required to merge in the first round
    pub threshold_start: f64,
    /// The confidence required to merge in the last round
    pub threshold_end: f64,
    pub rounds: usize,
    /// How far a cluster's precursor may fall below its predecessor's before the input
    /// is considered unsorted
    pub ordering_slack: MzBin,
    pub consensus: ConsensusParams,
    pub comparison_capacity: usize,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            precursor_tolerance: 1000,
            threshold_start: 0.999,
            threshold_end: 0.99,
            rounds: 5,
            ordering_slack: 2,
            consensus: ConsensusParams::default(),
            comparison_capacity: DEFAULT_COMPARISON_CAPACITY,
        }
    }
}

impl EngineParams {
    pub fn validate(&self) -> Result<(), EngineConstructionError> {
        if self.precursor_tolerance <= 0 {
            return Err(EngineConstructionError::InvalidPrecursorTolerance(
                self.precursor_tolerance,
            ));
        }
        for t in [self.threshold_start, self.threshold_end] {
            if !(0.0..=1.0).contains(&t) {
                return Err(EngineConstructionError::ThresholdOutOfRange(t));
            }
        }
        if self.threshold_end > self.threshold_start {
            return Err(EngineConstructionError::ThresholdOrder {
                start: self.threshold_start,
                end: self.threshold_end,
            });
        }
        if self.rounds < 2 {
            return Err(EngineConstructionError::TooFewRounds(self.rounds));
        }
        if self.consensus.window_size <= 0 {
            return Err(EngineConstructionError::InvalidWindowSize(
                self.consensus.window_size,
            ));
        }
        if self.consensus.peaks_per_window == 0 {
            return Err(EngineConstructionError::InvalidPeaksPerWindow);
        }
        if self.comparison_capacity == 0 {
            return Err(EngineConstructionError::InvalidComparisonCapacity);
        }
        Ok(())
    }

    /// The acceptance threshold of each round, evenly spaced from start to end
    pub fn thresholds(&self) -> Vec<f64> {
        let steps = self.rounds.saturating_sub(1).max(1) as f64;
        let delta = (self.threshold_start - self.threshold_end) / steps;
        (0..self.rounds)
            .map(|i| self.threshold_start - i as f64 * delta)
            .collect()
    }
}

/// What happened during a single round
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundStatistics {
    pub round: usize,
    pub threshold: f64,
    pub input_clusters: usize,
    pub output_clusters: usize,
    pub comparisons: usize,
    pub merges: usize,
}

impl Display for RoundStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "round {} @ {:.4}: {} -> {} clusters, {} comparisons, {} merges",
            self.round,
            self.threshold,
            self.input_clusters,
            self.output_clusters,
            self.comparisons,
            self.merges
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusteringStatistics {
    pub rounds: Vec<RoundStatistics>,
}

impl ClusteringStatistics {
    pub fn comparisons(&self) -> usize {
        self.rounds.iter().map(|r| r.comparisons).sum()
    }

    pub fn merges(&self) -> usize {
        self.rounds.iter().map(|r| r.merges).sum()
    }
}

/// Greedily merges clusters of spectra over several rounds of descending acceptance
/// thresholds.
///
/// The engine holds no per-run state and may be shared by reference between threads,
/// each clustering its own disjoint set of clusters.
pub struct GreedyClusteringEngine<S: SimilarityScorer, A: ComparisonsAssessor> {
    params: EngineParams,
    scorer: S,
    assessor: A,
    cdf: Arc<CdfTable>,
    first_round_predicate: ClusterPredicate,
}

impl<S: SimilarityScorer, A: ComparisonsAssessor> GreedyClusteringEngine<S, A> {
    pub fn new(
        params: EngineParams,
        scorer: S,
        assessor: A,
        cdf: Arc<CdfTable>,
        first_round_predicate: ClusterPredicate,
    ) -> Result<Self, EngineConstructionError> {
        params.validate()?;
        Ok(Self {
            params,
            scorer,
            assessor,
            cdf,
            first_round_predicate,
        })
    }

    pub fn builder() -> GreedyClusteringEngineBuilder<S, A> {
        GreedyClusteringEngineBuilder::new()
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn cdf(&self) -> &CdfTable {
        &self.cdf
    }

    /// Wrap each spectrum in a singleton cluster configured for this engine
    pub fn clusters_from_spectra<'a, I: IntoIterator<Item = &'a SpectrumRecord>>(
        &self,
        spectra: I,
    ) -> Vec<GreedySpectralCluster> {
        spectra
            .into_iter()
            .map(|s| {
                GreedySpectralCluster::from_spectrum_with(
                    s,
                    self.params.consensus,
                    self.params.comparison_capacity,
                )
            })
            .collect()
    }

    pub fn cluster(
        &self,
        clusters: Vec<GreedySpectralCluster>,
    ) -> Result<Vec<GreedySpectralCluster>, ClusteringError> {
        self.cluster_with_statistics(clusters).map(|(c, _)| c)
    }

    /// Run every round over `clusters`, which must be sorted by precursor m/z.
    pub fn cluster_with_statistics(
        &self,
        mut clusters: Vec<GreedySpectralCluster>,
    ) -> Result<(Vec<GreedySpectralCluster>, ClusteringStatistics), ClusteringError> {
        for c in clusters.iter_mut() {
            c.set_consensus_params(self.params.consensus);
            c.set_comparison_capacity(self.params.comparison_capacity);
        }

        let mut statistics = ClusteringStatistics::default();
        let known_comparison = is_known_comparison();
        for (round, threshold) in self.params.thresholds().into_iter().enumerate() {
            let predicate = if round == 0 {
                &self.first_round_predicate
            } else {
                &known_comparison
            };
            let (next, stats) = self.merge_pass(round, threshold, clusters, predicate)?;
            clusters = next;
            statistics.rounds.push(stats);
        }
        Ok((clusters, statistics))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(round = round))]
    fn merge_pass(
        &self,
        round: usize,
        threshold: f64,
        clusters: Vec<GreedySpectralCluster>,
        predicate: &ClusterPredicate,
    ) -> Result<(Vec<GreedySpectralCluster>, RoundStatistics), ClusteringError> {
        let tolerance = self.params.precursor_tolerance;
        let mut stats = RoundStatistics {
            round,
            threshold,
            input_clusters: clusters.len(),
            ..Default::default()
        };

        let mut survivors: Vec<GreedySpectralCluster> = Vec::with_capacity(clusters.len());
        let mut window_start = 0;
        let mut previous: Option<MzBin> = None;

        for (index, mut incoming) in clusters.into_iter().enumerate() {
            let current = incoming.precursor_mz();
            if let Some(previous) = previous {
                if current < previous - self.params.ordering_slack {
                    return Err(ClusteringError::InputOrderingViolation {
                        round,
                        index,
                        previous,
                        current,
                    });
                }
            }
            previous = Some(current);

            while window_start < survivors.len()
                && survivors[window_start].precursor_mz() < current - tolerance
            {
                window_start += 1;
            }

            incoming.consensus_spectrum();
            let window_count = survivors.len() - window_start;
            let mut accepted = None;
            for (j, survivor) in survivors.iter_mut().enumerate().skip(window_start) {
                if (survivor.precursor_mz() - current).abs() > tolerance {
                    continue;
                }
                survivor.consensus_spectrum();
                if !predicate(&*survivor, &incoming) {
                    continue;
                }

                let score = {
                    let a = survivor.consensus().view();
                    let b = incoming.consensus().view();
                    self.scorer.correlate::<ConsensusPeak>(&a, &b)
                };
                stats.comparisons += 1;
                let n_comparisons = self.assessor.number_of_comparisons(current, window_count);
                let is_match = self.cdf.is_save_match(score, n_comparisons, threshold);

                survivor.record_comparison(incoming.id(), score);
                incoming.record_comparison(survivor.id(), score);

                if is_match {
                    accepted = Some(j);
                    break;
                }
            }

            match accepted {
                Some(j) => {
                    trace!(
                        "Merging {} into {} at threshold {threshold}",
                        incoming.id(),
                        survivors[j].id()
                    );
                    survivors[j].merge_cluster(incoming);
                    stats.merges += 1;
                }
                None => survivors.push(incoming),
            }
        }

        survivors.sort_by_key(|c| c.precursor_mz());
        stats.output_clusters = survivors.len();
        debug!("{stats}");
        Ok((survivors, stats))
    }
}

/// Assembles a [`GreedyClusteringEngine`] piece by piece
pub struct GreedyClusteringEngineBuilder<S: SimilarityScorer, A: ComparisonsAssessor> {
    params: EngineParams,
    scorer: Option<S>,
    assessor: Option<A>,
    cdf: Option<Arc<CdfTable>>,
    first_round_predicate: Option<ClusterPredicate>,
}

impl<S: SimilarityScorer, A: ComparisonsAssessor> Default for GreedyClusteringEngineBuilder<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SimilarityScorer, A: ComparisonsAssessor> GreedyClusteringEngineBuilder<S, A> {
    pub fn new() -> Self {
        Self {
            params: EngineParams::default(),
            scorer: None,
            assessor: None,
            cdf: None,
            first_round_predicate: None,
        }
    }

    pub fn params(mut self, value: EngineParams) -> Self {
        self.params = value;
        self
    }

    pub fn precursor_tolerance(mut self, value: MzBin) -> Self {
        self.params.precursor_tolerance = value;
        self
    }

    pub fn thresholds(mut self, start: f64, end: f64) -> Self {
        self.params.threshold_start = start;
        self.params.threshold_end = end;
        self
    }

    pub fn rounds(mut self, value: usize) -> Self {
        self.params.rounds = value;
        self
    }

    pub fn ordering_slack(mut self, value: MzBin) -> Self {
        self.params.ordering_slack = value;
        self
    }

    pub fn consensus_params(mut self, value: ConsensusParams) -> Self {
        self.params.consensus = value;
        self
    }

    pub fn comparison_capacity(mut self, value: usize) -> Self {
        self.params.comparison_capacity = value;
        self
    }

    pub fn scorer(mut self, value: S) -> Self {
        self.scorer = Some(value);
        self
    }

    pub fn assessor(mut self, value: A) -> Self {
        self.assessor = Some(value);
        self
    }

    pub fn cdf_table(mut self, value: impl Into<Arc<CdfTable>>) -> Self {
        self.cdf = Some(value.into());
        self
    }

    pub fn first_round_predicate(mut self, value: ClusterPredicate) -> Self {
        self.first_round_predicate = Some(value);
        self
    }

    pub fn build(self) -> Result<GreedyClusteringEngine<S, A>, EngineConstructionError> {
        GreedyClusteringEngine::new(
            self.params,
            self.scorer
                .ok_or(EngineConstructionError::MissingComponent("similarity scorer"))?,
            self.assessor
                .ok_or(EngineConstructionError::MissingComponent("comparisons assessor"))?,
            self.cdf
                .ok_or(EngineConstructionError::MissingComponent("CDF table"))?,
            self.first_round_predicate
                .ok_or(EngineConstructionError::MissingComponent("first round predicate"))?,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cdf::CdfBuilder;
    use crate::comparisons::MinNumberComparisonsAssessor;
    use crate::peaks::Peak;
    use crate::predicates::{always, same_charge};
    use crate::scorer::CombinedFisherIntensityTest;

    type Engine = GreedyClusteringEngine<CombinedFisherIntensityTest, MinNumberComparisonsAssessor>;

    fn cdf() -> CdfTable {
        let mut builder = CdfBuilder::new(0.1).unwrap();
        builder.extend((0..1000).map(|i| (i % 50) as f64 * 0.1));
        builder.build().unwrap()
    }

    fn builder() -> GreedyClusteringEngineBuilder<CombinedFisherIntensityTest, MinNumberComparisonsAssessor>
    {
        Engine::builder()
            .scorer(CombinedFisherIntensityTest::default())
            .assessor(MinNumberComparisonsAssessor::new(10))
            .cdf_table(cdf())
            .first_round_predicate(always())
    }

    fn record(id: &str, precursor_mz: MzBin, seed: i32) -> SpectrumRecord {
        let peaks = (0..30)
            .map(|i| Peak::new(100 + i * 41 + seed, 500 + ((i + seed) * 7919) % 997))
            .collect();
        SpectrumRecord::new(id, precursor_mz, 2, peaks).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(builder().build().is_ok());
        assert_eq!(
            builder().precursor_tolerance(0).build().err(),
            Some(EngineConstructionError::InvalidPrecursorTolerance(0))
        );
        assert!(matches!(
            builder().thresholds(0.9, 0.99).build().err(),
            Some(EngineConstructionError::ThresholdOrder { .. })
        ));
        assert!(matches!(
            builder().thresholds(1.5, 0.99).build().err(),
            Some(EngineConstructionError::ThresholdOutOfRange(_))
        ));
        assert_eq!(
            builder().rounds(1).build().err(),
            Some(EngineConstructionError::TooFewRounds(1))
        );
        assert_eq!(
            builder()
                .consensus_params(ConsensusParams::new(0, 5, 50))
                .build()
                .err(),
            Some(EngineConstructionError::InvalidWindowSize(0))
        );
        assert_eq!(
            builder().comparison_capacity(0).build().err(),
            Some(EngineConstructionError::InvalidComparisonCapacity)
        );
        assert!(matches!(
            Engine::builder()
                .scorer(CombinedFisherIntensityTest::default())
                .build()
                .err(),
            Some(EngineConstructionError::MissingComponent(_))
        ));
    }

    #[test]
    fn test_thresholds() {
        let params = EngineParams {
            threshold_start: 1.0,
            threshold_end: 0.9,
            rounds: 3,
            ..Default::default()
        };
        let thresholds = params.thresholds();
        assert_eq!(thresholds.len(), 3);
        assert_eq!(thresholds[0], 1.0);
        assert!((thresholds[1] - 0.95).abs() < 1e-12);
        assert!((thresholds[2] - 0.9).abs() < 1e-12);
    }

    #[test_log::test]
    fn test_identical_spectra_merge() {
        let engine = builder().build().unwrap();
        let spectra: Vec<_> = (0..5)
            .map(|i| record(&format!("s{i}"), 5000 + i, 0))
            .collect();
        let clusters = engine.clusters_from_spectra(&spectra);
        let (clusters, stats) = engine.cluster_with_statistics(clusters).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 5);
        assert_eq!(stats.rounds.len(), 5);
        assert_eq!(stats.rounds[0].merges, 4);
        assert_eq!(stats.merges(), 4);
    }

    #[test]
    fn test_tolerance_and_predicate() {
        let engine = builder()
            .precursor_tolerance(10)
            .first_round_predicate(same_charge())
            .build()
            .unwrap();
        let mut spectra = vec![
            record("a", 5000, 0),
            record("b", 5005, 0),
            record("c", 6000, 0),
            record("d", 6001, 0),
        ];
        spectra[3].precursor_charge = 3;
        let clusters = engine.cluster(engine.clusters_from_spectra(&spectra)).unwrap();
        assert_eq!(clusters.len(), 3);
        let sizes: Vec<_> = clusters.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_dissimilar_spectra_stay_apart() {
        let engine = builder().build().unwrap();
        let spectra = vec![record("a", 5000, 0), record("b", 5001, 7), record("c", 5002, 19)];
        let (clusters, stats) = engine
            .cluster_with_statistics(engine.clusters_from_spectra(&spectra))
            .unwrap();
        assert_eq!(clusters.len(), 3);
        assert_eq!(stats.rounds[0].comparisons, 3);
        assert_eq!(stats.merges(), 0);
    }

    #[test]
    fn test_scored_pairs_are_remembered() {
        let engine = builder().build().unwrap();
        let spectra = vec![record("a", 5000, 0), record("b", 5001, 7), record("c", 5002, 19)];
        let (clusters, stats) = engine
            .cluster_with_statistics(engine.clusters_from_spectra(&spectra))
            .unwrap();
        assert_eq!(clusters.len(), 3);
        for c in clusters.iter() {
            let mut others: Vec<_> = c.best_matches().iter().map(|m| m.other_id.as_str()).collect();
            others.sort();
            let expected: Vec<_> = ["a", "b", "c"].into_iter().filter(|id| *id != c.id()).collect();
            assert_eq!(others, expected, "{c}");
        }
        for round in stats.rounds.iter().skip(1) {
            assert_eq!(round.comparisons, stats.rounds[0].comparisons, "{round}");
        }
    }

    #[test]
    fn test_later_rounds_only_revisit_scored_pairs() {
        let engine = builder()
            .first_round_predicate(same_charge())
            .build()
            .unwrap();
        let mut spectra = vec![record("a", 5000, 0), record("b", 5001, 7), record("c", 5002, 19)];
        spectra[2].precursor_charge = 3;
        let (clusters, stats) = engine
            .cluster_with_statistics(engine.clusters_from_spectra(&spectra))
            .unwrap();
        assert_eq!(clusters.len(), 3);
        for round in stats.rounds.iter() {
            assert_eq!(round.comparisons, 1, "{round}");
        }
        let c = clusters.iter().find(|c| c.id() == "c").unwrap();
        assert!(c.best_matches().is_empty());
        let a = clusters.iter().find(|c| c.id() == "a").unwrap();
        assert!(a.is_known_comparison("b"));
        assert!(!a.is_known_comparison("c"));
    }

    #[test]
    fn test_ordering_violation() {
        let engine = builder().build().unwrap();
        let spectra = vec![record("a", 5000, 0), record("b", 4990, 0)];
        let err = engine
            .cluster(engine.clusters_from_spectra(&spectra))
            .unwrap_err();
        assert_eq!(
            err,
            ClusteringError::InputOrderingViolation {
                round: 0,
                index: 1,
                previous: 5000,
                current: 4990
            }
        );

        let within_slack = vec![record("a", 5000, 0), record("b", 4999, 0)];
        assert!(engine.cluster(engine.clusters_from_spectra(&within_slack)).is_ok());
    }
}
