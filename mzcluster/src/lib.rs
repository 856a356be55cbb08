//! Greedy clustering of quantized tandem mass spectra into consensus spectra.
//!
//! Spectra enter as [`SpectrumRecord`]s sorted by precursor m/z. A
//! [`GreedyClusteringEngine`] merges them over several rounds, accepting a merge only when
//! the [`SimilarityScorer`] score is significant under an empirical [`CdfTable`] of
//! random-match scores.
pub mod cdf;
pub mod cluster;
pub mod comparisons;
pub mod consensus;
pub mod engine;
pub mod kendall;
pub mod peaks;
pub mod predicates;
pub mod scorer;

pub use cdf::{CdfBuilder, CdfError, CdfTable};
pub use cluster::{ComparisonMatch, GreedySpectralCluster};
pub use comparisons::{
    ComparisonsAssessor, MinNumberComparisonsAssessor, SpectraPerBinComparisonsAssessor,
};
pub use consensus::{ConsensusAggregator, ConsensusParams};
pub use engine::{
    ClusteringError, ClusteringStatistics, EngineConstructionError, EngineParams,
    GreedyClusteringEngine, GreedyClusteringEngineBuilder,
};
pub use peaks::{ConsensusPeak, MzBin, Peak, PeakLike, SpectrumError, SpectrumRecord};
pub use scorer::{CombinedFisherIntensityTest, ComparisonFilter, ScoreType, SimilarityScorer};
