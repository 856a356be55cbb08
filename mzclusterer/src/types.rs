use itertools::Itertools;
use serde::{Deserialize, Serialize};

use mzcluster::comparisons::{
    ComparisonsAssessor, MinNumberComparisonsAssessor, SpectraPerBinComparisonsAssessor,
};
use mzcluster::{
    CombinedFisherIntensityTest, ConsensusPeak, GreedyClusteringEngine, GreedySpectralCluster,
    MzBin,
};

pub(crate) const BUFFER_SIZE: usize = 10_000;

/// The comparison count policy selected by the configuration
#[derive(Debug, Clone)]
pub enum DriverAssessor {
    MinNumber(MinNumberComparisonsAssessor),
    SpectraPerBin(SpectraPerBinComparisonsAssessor),
}

impl ComparisonsAssessor for DriverAssessor {
    fn number_of_comparisons(&self, precursor_mz: MzBin, window_cluster_count: usize) -> usize {
        match self {
            DriverAssessor::MinNumber(a) => {
                a.number_of_comparisons(precursor_mz, window_cluster_count)
            }
            DriverAssessor::SpectraPerBin(a) => {
                a.number_of_comparisons(precursor_mz, window_cluster_count)
            }
        }
    }
}

pub type Engine = GreedyClusteringEngine<CombinedFisherIntensityTest, DriverAssessor>;

/// A finished cluster as written to the output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: String,
    pub precursor_mz: MzBin,
    pub precursor_charge: i32,
    pub members: Vec<String>,
    pub consensus: Vec<ConsensusPeak>,
}

impl From<&mut GreedySpectralCluster> for ClusterRecord {
    fn from(value: &mut GreedySpectralCluster) -> Self {
        Self {
            id: value.id().to_string(),
            precursor_mz: value.precursor_mz(),
            precursor_charge: value.precursor_charge(),
            members: value.member_ids().iter().cloned().sorted().collect(),
            consensus: value.consensus_spectrum().to_vec(),
        }
    }
}
