use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam_channel::Sender;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use mzcluster::{GreedySpectralCluster, MzBin, SpectrumRecord};

use crate::driver::MZClustererError;
use crate::progress::ProgressRecord;
use crate::types::{ClusterRecord, Engine};

/// The shard a precursor falls into when the precursor axis is cut into bins of `width`,
/// shifted down by `offset`.
pub(crate) fn shard_key(precursor_mz: MzBin, width: MzBin, offset: MzBin) -> i64 {
    if width <= 0 {
        return 0;
    }
    (precursor_mz as i64 + offset as i64).div_euclid(width as i64)
}

/// Split already sorted items into contiguous shards, preserving their order.
pub(crate) fn partition<T, F: Fn(&T) -> i64>(items: Vec<T>, key: F) -> Vec<Vec<T>> {
    let mut shards: BTreeMap<i64, Vec<T>> = BTreeMap::new();
    for item in items {
        shards.entry(key(&item)).or_default().push(item);
    }
    shards.into_values().collect()
}

#[instrument(level = "debug", skip_all, fields(shard = shard_idx))]
fn cluster_shard(
    engine: &Engine,
    shard_idx: usize,
    clusters: Vec<GreedySpectralCluster>,
    spectra: usize,
) -> Result<(Vec<GreedySpectralCluster>, ProgressRecord), MZClustererError> {
    let n_input = clusters.len();
    let (clusters, stats) = engine.cluster_with_statistics(clusters)?;
    debug!(
        "Shard {shard_idx}: {n_input} -> {} clusters after {} comparisons",
        clusters.len(),
        stats.comparisons()
    );
    let prog = ProgressRecord::from_shard(spectra, clusters.len(), &stats);
    Ok((clusters, prog))
}

fn send_shard(
    sender: &Sender<(usize, Vec<ClusterRecord>)>,
    shard_idx: usize,
    mut clusters: Vec<GreedySpectralCluster>,
) -> Result<(), MZClustererError> {
    let records: Vec<ClusterRecord> = clusters.iter_mut().map(ClusterRecord::from).collect();
    sender
        .send((shard_idx, records))
        .map_err(|_| MZClustererError::OutputClosed(shard_idx))
}

/// Cluster `spectra`, which must be sorted by precursor m/z, sending finished clusters to
/// `sender` one shard at a time.
///
/// When `shard_width` is positive, the precursor axis is cut into shards that are clustered
/// in parallel, then cut again with boundaries shifted by half a shard so clusters split by
/// the first cut get a second chance to merge.
pub fn cluster_spectra(
    engine: &Engine,
    spectra: Vec<SpectrumRecord>,
    shard_width: MzBin,
    sender: Sender<(usize, Vec<ClusterRecord>)>,
) -> Result<ProgressRecord, MZClustererError> {
    let started = Instant::now();
    let n_spectra = spectra.len();

    if shard_width <= 0 {
        info!("Clustering {n_spectra} spectra in a single shard");
        let clusters = engine.clusters_from_spectra(&spectra);
        drop(spectra);
        let (clusters, prog) = cluster_shard(engine, 0, clusters, n_spectra)?;
        send_shard(&sender, 0, clusters)?;
        info!("Clustering finished in {:0.3?}", started.elapsed());
        return Ok(prog);
    }

    let shards = partition(spectra, |s| shard_key(s.precursor_mz, shard_width, 0));
    info!(
        "Clustering {n_spectra} spectra in {} shards of width {shard_width}",
        shards.len()
    );

    let first_pass: Vec<(Vec<GreedySpectralCluster>, ProgressRecord)> = shards
        .into_par_iter()
        .enumerate()
        .map(|(shard_idx, shard)| {
            let clusters = engine.clusters_from_spectra(&shard);
            cluster_shard(engine, shard_idx, clusters, shard.len())
        })
        .collect::<Result<_, _>>()?;

    let mut prog = ProgressRecord::default();
    let mut clusters = Vec::new();
    for (shard_clusters, shard_prog) in first_pass {
        prog += ProgressRecord {
            clusters: 0,
            ..shard_prog
        };
        clusters.extend(shard_clusters);
    }
    info!(
        "First pass produced {} clusters in {:0.3?}",
        clusters.len(),
        started.elapsed()
    );

    let mut shards = partition(clusters, |c| {
        shard_key(c.precursor_mz(), shard_width, shard_width / 2)
    });
    for shard in shards.iter_mut() {
        shard.sort_by_key(|c| c.precursor_mz());
    }

    let second_pass = shards
        .into_par_iter()
        .enumerate()
        .map(|(shard_idx, shard)| -> Result<ProgressRecord, MZClustererError> {
            let (clusters, prog) = cluster_shard(engine, shard_idx, shard, 0)?;
            send_shard(&sender, shard_idx, clusters)?;
            Ok(ProgressRecord { shards: 0, ..prog })
        })
        .try_reduce(ProgressRecord::default, |a, b| Ok(a + b))?;

    prog += second_pass;
    info!("Clustering finished in {:0.3?}", started.elapsed());
    Ok(prog)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shard_key() {
        assert_eq!(shard_key(19_999, 20_000, 0), 0);
        assert_eq!(shard_key(20_000, 20_000, 0), 1);
        assert_eq!(shard_key(9_999, 20_000, 10_000), 0);
        assert_eq!(shard_key(10_000, 20_000, 10_000), 1);
        assert_eq!(shard_key(-1, 20_000, 0), -1);
        assert_eq!(shard_key(123_456, 0, 0), 0);
    }

    #[test]
    fn test_partition_preserves_order() {
        let items = vec![1, 5, 12, 15, 19, 31];
        let shards = partition(items, |v| (*v as i64).div_euclid(10));
        assert_eq!(shards, vec![vec![1, 5], vec![12, 15, 19], vec![31]]);
    }
}
