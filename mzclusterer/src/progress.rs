use std::ops::{Add, AddAssign};

use mzcluster::ClusteringStatistics;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub spectra: usize,
    pub clusters: usize,
    pub comparisons: usize,
    pub merges: usize,
    pub shards: usize,
}

impl ProgressRecord {
    /// Summarize one shard's clustering run
    pub fn from_shard(spectra: usize, clusters: usize, stats: &ClusteringStatistics) -> Self {
        Self {
            spectra,
            clusters,
            comparisons: stats.comparisons(),
            merges: stats.merges(),
            shards: 1,
        }
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.spectra += rhs.spectra;
        self.clusters += rhs.clusters;
        self.comparisons += rhs.comparisons;
        self.merges += rhs.merges;
        self.shards += rhs.shards;
    }
}
