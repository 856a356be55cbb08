//! Gates deciding whether a pair of clusters is worth scoring at all
use std::collections::HashSet;
use std::sync::Arc;

use crate::cluster::GreedySpectralCluster;

/// A predicate over a pair of clusters, shared freely between threads
pub type ClusterPredicate =
    Arc<dyn Fn(&GreedySpectralCluster, &GreedySpectralCluster) -> bool + Send + Sync>;

/// Always compare
pub fn always() -> ClusterPredicate {
    Arc::new(|_, _| true)
}

/// Only compare clusters with the same precursor charge
pub fn same_charge() -> ClusterPredicate {
    Arc::new(|a, b| a.precursor_charge() == b.precursor_charge())
}

/// Only compare clusters whose `n` most intense consensus peaks share at least one m/z
pub fn shares_highest_peaks(n: usize) -> ClusterPredicate {
    Arc::new(move |a, b| {
        let a_top: HashSet<_> = a.consensus().highest_peak_mzs(n).into_iter().collect();
        b.consensus()
            .highest_peak_mzs(n)
            .into_iter()
            .any(|mz| a_top.contains(&mz))
    })
}

/// Only compare clusters that were compared before, according to either cluster's
/// best-match cache
pub fn is_known_comparison() -> ClusterPredicate {
    Arc::new(|a, b| a.is_known_comparison(b.id()) || b.is_known_comparison(a.id()))
}

pub fn all_of<I: IntoIterator<Item = ClusterPredicate>>(predicates: I) -> ClusterPredicate {
    let predicates: Vec<_> = predicates.into_iter().collect();
    Arc::new(move |a, b| predicates.iter().all(|p| p(a, b)))
}

pub fn any_of<I: IntoIterator<Item = ClusterPredicate>>(predicates: I) -> ClusterPredicate {
    let predicates: Vec<_> = predicates.into_iter().collect();
    Arc::new(move |a, b| predicates.iter().any(|p| p(a, b)))
}

pub fn negate(predicate: ClusterPredicate) -> ClusterPredicate {
    Arc::new(move |a, b| !predicate(a, b))
}
