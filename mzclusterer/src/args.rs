use std::sync::Arc;

use mzcluster::comparisons::{MinNumberComparisonsAssessor, SpectraPerBinComparisonsAssessor};
use mzcluster::predicates::{all_of, same_charge, shares_highest_peaks, ClusterPredicate};
use mzcluster::{
    CdfTable, CombinedFisherIntensityTest, ComparisonFilter, EngineConstructionError,
    EngineParams, MzBin,
};

use crate::types::{DriverAssessor, Engine};

pub(crate) fn probability(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if !(0.0..=1.0).contains(&value) {
        Err(format!("`{s}` is not between 0 and 1"))
    } else {
        Ok(value)
    }
}

pub(crate) fn positive_mz(s: &str) -> Result<MzBin, String> {
    let value = s.parse::<MzBin>().map_err(|e| e.to_string())?;
    if value <= 0 {
        Err(format!("`{s}` must be greater than zero"))
    } else {
        Ok(value)
    }
}

/// Everything needed to assemble a clustering engine, short of the CDF table and the
/// precursor density of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringBuilderParams {
    pub engine: EngineParams,
    /// The number of most intense peaks compared by the scorer, 0 to compare all
    pub comparison_peaks: usize,
    /// The number of most intense peaks two clusters must share to be compared in the
    /// first round, 0 to skip this check
    pub first_round_shared_peaks: usize,
    pub min_comparisons: usize,
    pub density_bin_width: Option<MzBin>,
}

impl ClusteringBuilderParams {
    pub fn scorer(&self) -> CombinedFisherIntensityTest {
        let filter = if self.comparison_peaks == 0 {
            ComparisonFilter::All
        } else {
            ComparisonFilter::HighestPeaks(self.comparison_peaks)
        };
        CombinedFisherIntensityTest::new(filter)
    }

    pub fn first_round_predicate(&self) -> ClusterPredicate {
        if self.first_round_shared_peaks == 0 {
            same_charge()
        } else {
            all_of([
                same_charge(),
                shares_highest_peaks(self.first_round_shared_peaks),
            ])
        }
    }

    pub fn assessor<I: IntoIterator<Item = MzBin>>(&self, precursors: I) -> DriverAssessor {
        match self.density_bin_width {
            Some(width) if width > 0 => DriverAssessor::SpectraPerBin(
                SpectraPerBinComparisonsAssessor::new(precursors, width, self.min_comparisons),
            ),
            _ => DriverAssessor::MinNumber(MinNumberComparisonsAssessor::new(
                self.min_comparisons,
            )),
        }
    }

    pub fn build_engine<I: IntoIterator<Item = MzBin>>(
        &self,
        cdf: Arc<CdfTable>,
        precursors: I,
    ) -> Result<Engine, EngineConstructionError> {
        Engine::builder()
            .params(self.engine)
            .scorer(self.scorer())
            .assessor(self.assessor(precursors))
            .cdf_table(cdf)
            .first_round_predicate(self.first_round_predicate())
            .build()
    }
}

pub fn make_default_clustering_params() -> ClusteringBuilderParams {
    ClusteringBuilderParams {
        engine: EngineParams::default(),
        comparison_peaks: 40,
        first_round_shared_peaks: 5,
        min_comparisons: 10_000,
        density_bin_width: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_parsers() {
        assert_eq!(probability("0.99"), Ok(0.99));
        assert!(probability("1.2").is_err());
        assert!(probability("x").is_err());
        assert_eq!(positive_mz("1000"), Ok(1000));
        assert!(positive_mz("0").is_err());
        assert!(positive_mz("-5").is_err());
    }

    #[test]
    fn test_assessor_selection() {
        let mut params = make_default_clustering_params();
        assert!(matches!(
            params.assessor([1, 2, 3]),
            DriverAssessor::MinNumber(_)
        ));
        params.density_bin_width = Some(1000);
        assert!(matches!(
            params.assessor([1, 2, 3]),
            DriverAssessor::SpectraPerBin(_)
        ));
        assert_eq!(params.scorer().comparison_filter, ComparisonFilter::HighestPeaks(40));
        params.comparison_peaks = 0;
        assert_eq!(params.scorer().comparison_filter, ComparisonFilter::All);
    }
}
