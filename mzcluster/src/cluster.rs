//! A greedily grown cluster of spectra and its best-match cache
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Display;

use crate::consensus::{ConsensusAggregator, ConsensusParams};
use crate::peaks::{ConsensusPeak, MzBin, SpectrumRecord};

/// The default number of best comparisons a cluster remembers
pub const DEFAULT_COMPARISON_CAPACITY: usize = 30;

/// The similarity observed between a cluster and another cluster it was compared to
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComparisonMatch {
    pub other_id: String,
    pub similarity: f64,
}

impl ComparisonMatch {
    pub fn new(other_id: impl Into<String>, similarity: f64) -> Self {
        Self {
            other_id: other_id.into(),
            similarity,
        }
    }
}

impl PartialOrd for ComparisonMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.similarity.total_cmp(&other.similarity))
    }
}

/// A cluster of spectra believed to be repeated measurements of the same analyte.
///
/// The cluster exclusively owns its [`ConsensusAggregator`]. Clusters move between threads
/// only by ownership.
#[derive(Debug, Clone)]
pub struct GreedySpectralCluster {
    id: String,
    member_ids: HashSet<String>,
    consensus: ConsensusAggregator,
    best_matches: Vec<ComparisonMatch>,
    comparison_capacity: usize,
    known_comparison_ids: OnceCell<HashSet<String>>,
}

impl GreedySpectralCluster {
    pub fn new(id: impl Into<String>, params: ConsensusParams, comparison_capacity: usize) -> Self {
        Self {
            id: id.into(),
            member_ids: HashSet::new(),
            consensus: ConsensusAggregator::new(params),
            best_matches: Vec::new(),
            comparison_capacity: comparison_capacity.max(1),
            known_comparison_ids: OnceCell::new(),
        }
    }

    /// Wrap a single spectrum in a new cluster carrying its id
    pub fn from_spectrum(spectrum: &SpectrumRecord) -> Self {
        Self::from_spectrum_with(
            spectrum,
            ConsensusParams::default(),
            DEFAULT_COMPARISON_CAPACITY,
        )
    }

    pub fn from_spectrum_with(
        spectrum: &SpectrumRecord,
        params: ConsensusParams,
        comparison_capacity: usize,
    ) -> Self {
        let mut this = Self::new(spectrum.id.clone(), params, comparison_capacity);
        this.add_spectra([spectrum]);
        this
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn member_ids(&self) -> &HashSet<String> {
        &self.member_ids
    }

    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn precursor_mz(&self) -> MzBin {
        self.consensus.precursor_mz()
    }

    pub fn precursor_charge(&self) -> i32 {
        self.consensus.precursor_charge()
    }

    pub fn consensus(&self) -> &ConsensusAggregator {
        &self.consensus
    }

    /// The finalized consensus spectrum, refreshing the cached copy if needed
    pub fn consensus_spectrum(&mut self) -> &[ConsensusPeak] {
        self.consensus.consensus_spectrum()
    }

    pub fn set_consensus_params(&mut self, params: ConsensusParams) {
        self.consensus.set_params(params);
    }

    pub fn set_comparison_capacity(&mut self, capacity: usize) {
        self.comparison_capacity = capacity.max(1);
        if self.best_matches.len() > self.comparison_capacity {
            let excess = self.best_matches.len() - self.comparison_capacity;
            self.best_matches.drain(..excess);
            self.known_comparison_ids.take();
        }
    }

    pub fn comparison_capacity(&self) -> usize {
        self.comparison_capacity
    }

    /// Add spectra to the cluster. Spectra whose id is already a member are skipped.
    pub fn add_spectra<'a, I: IntoIterator<Item = &'a SpectrumRecord>>(&mut self, spectra: I) {
        let fresh: Vec<&SpectrumRecord> = spectra
            .into_iter()
            .filter(|s| self.member_ids.insert(s.id.clone()))
            .collect();
        self.consensus.add_spectra(fresh);
    }

    /// Absorb `other` into this cluster. If `other` had strictly more members, this
    /// cluster takes over its id.
    pub fn merge_cluster(&mut self, other: GreedySpectralCluster) {
        let previous_id = self.id.clone();
        if other.len() > self.len() {
            tracing::trace!("Cluster {} takes over the id of {}", self.id, other.id);
            self.id = other.id.clone();
        }
        self.member_ids.extend(other.member_ids);
        self.consensus.add_consensus_spectrum(&other.consensus);

        for m in other.best_matches {
            self.insert_match(m);
        }
        self.best_matches
            .retain(|m| m.other_id != previous_id && m.other_id != other.id);
        self.known_comparison_ids.take();
    }

    fn insert_match(&mut self, comparison: ComparisonMatch) {
        if let Some(existing) = self
            .best_matches
            .iter_mut()
            .find(|m| m.other_id == comparison.other_id)
        {
            if comparison.similarity > existing.similarity {
                existing.similarity = comparison.similarity;
            }
        } else if self.best_matches.len() < self.comparison_capacity {
            self.best_matches.push(comparison);
        } else if self
            .best_matches
            .first()
            .is_some_and(|lowest| comparison.similarity > lowest.similarity)
        {
            self.best_matches[0] = comparison;
        } else {
            return;
        }
        self.best_matches
            .sort_by(|a, b| a.similarity.total_cmp(&b.similarity));
    }

    /// Remember that this cluster was compared to `other_id` with the given similarity,
    /// evicting the least similar comparison when the cache is full.
    pub fn record_comparison(&mut self, other_id: &str, similarity: f64) {
        if other_id == self.id {
            return;
        }
        self.insert_match(ComparisonMatch::new(other_id, similarity));
        self.known_comparison_ids.take();
    }

    pub fn best_matches(&self) -> &[ComparisonMatch] {
        &self.best_matches
    }

    pub fn known_comparison_ids(&self) -> &HashSet<String> {
        self.known_comparison_ids.get_or_init(|| {
            self.best_matches
                .iter()
                .map(|m| m.other_id.clone())
                .collect()
        })
    }

    pub fn is_known_comparison(&self, other_id: &str) -> bool {
        self.known_comparison_ids().contains(other_id)
    }
}

impl Display for GreedySpectralCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GreedySpectralCluster({}, precursor={}, charge={}, members={})",
            self.id,
            self.precursor_mz(),
            self.precursor_charge(),
            self.len()
        )
    }
}
