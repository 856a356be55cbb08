use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzcluster::comparisons::SpectraPerBinComparisonsAssessor;
use mzcluster::predicates::{all_of, same_charge, shares_highest_peaks};
use mzcluster::{
    CdfBuilder, CdfTable, CombinedFisherIntensityTest, GreedyClusteringEngine,
    GreedySpectralCluster, MinNumberComparisonsAssessor, Peak, SpectrumRecord,
};

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer().compact().with_writer(std::io::stderr).with_filter(
                EnvFilter::builder()
                    .with_default_directive(tracing::Level::INFO.into())
                    .from_env_lossy(),
            ),
        )
        .try_init();
}

fn random_match_cdf() -> Arc<CdfTable> {
    let mut builder = CdfBuilder::new(0.1).unwrap();
    builder.extend((0..5000).map(|i| ((i * 37) % 60) as f64 * 0.1));
    Arc::new(builder.build().unwrap())
}

/// Replicate `r` of analyte `family`: the same peaks with intensities scaled by `r + 1`
fn replicate(family: i32, r: i32, base_precursor: i32) -> SpectrumRecord {
    let peaks = (0..30)
        .map(|i| {
            Peak::new(
                100 + i * 41 + family * 10,
                (500 + (i * 7919) % 997) * (r + 1),
            )
        })
        .collect();
    SpectrumRecord::new(
        format!("f{family}.r{r}"),
        base_precursor + family * 3 + r,
        2,
        peaks,
    )
    .unwrap()
}

fn families(n_families: i32, n_replicates: i32, base_precursor: i32) -> Vec<SpectrumRecord> {
    let mut spectra: Vec<_> = (0..n_families)
        .flat_map(|f| (0..n_replicates).map(move |r| replicate(f, r, base_precursor)))
        .collect();
    spectra.sort_by_key(|s| s.precursor_mz);
    spectra
}

fn member_sets(clusters: &[GreedySpectralCluster]) -> BTreeSet<BTreeSet<String>> {
    clusters
        .iter()
        .map(|c| c.member_ids().iter().cloned().collect())
        .collect()
}

type Engine = GreedyClusteringEngine<CombinedFisherIntensityTest, MinNumberComparisonsAssessor>;

fn engine() -> Engine {
    Engine::builder()
        .scorer(CombinedFisherIntensityTest::default())
        .assessor(MinNumberComparisonsAssessor::new(100))
        .cdf_table(random_match_cdf())
        .first_round_predicate(all_of([same_charge(), shares_highest_peaks(5)]))
        .build()
        .unwrap()
}

#[test]
fn test_identical_spectra_converge() {
    init_logging();
    let engine = engine();
    let spectra: Vec<_> = (0..20)
        .map(|r| {
            let mut s = replicate(0, 0, 5000);
            s.id = format!("copy{r}");
            s.precursor_mz += r;
            s
        })
        .collect();
    let clusters = engine
        .cluster(engine.clusters_from_spectra(&spectra))
        .unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 20);
}

#[test]
fn test_families_separate_and_preserve_members() {
    init_logging();
    let engine = engine();
    let spectra = families(4, 6, 5000);
    let input_ids: HashSet<String> = spectra.iter().map(|s| s.id.clone()).collect();

    let (clusters, stats) = engine
        .cluster_with_statistics(engine.clusters_from_spectra(&spectra))
        .unwrap();

    assert!(clusters.len() <= spectra.len());
    assert_eq!(clusters.len(), 4);

    let mut seen = HashSet::new();
    for c in clusters.iter() {
        assert_eq!(c.len(), 6);
        let families: HashSet<_> = c
            .member_ids()
            .iter()
            .map(|id| id.split('.').next().unwrap().to_string())
            .collect();
        assert_eq!(families.len(), 1, "{c} mixes families");
        for id in c.member_ids() {
            assert!(seen.insert(id.clone()), "{id} appears twice");
        }
    }
    assert_eq!(seen, input_ids);
    assert_eq!(stats.merges(), 20);

    let precursors: Vec<_> = clusters.iter().map(|c| c.precursor_mz()).collect();
    let mut sorted = precursors.clone();
    sorted.sort();
    assert_eq!(precursors, sorted);
}

#[test]
fn test_density_assessor() {
    let spectra = families(2, 5, 5000);
    let assessor = SpectraPerBinComparisonsAssessor::new(
        spectra.iter().map(|s| s.precursor_mz),
        1000,
        10,
    );
    let engine = GreedyClusteringEngine::builder()
        .scorer(CombinedFisherIntensityTest::default())
        .assessor(assessor)
        .cdf_table(random_match_cdf())
        .first_round_predicate(same_charge())
        .build()
        .unwrap();
    let clusters = engine
        .cluster(engine.clusters_from_spectra(&spectra))
        .unwrap();
    assert_eq!(clusters.len(), 2);
}

#[test]
fn test_parallel_shards_match_sequential() {
    init_logging();
    let engine = engine();
    let shards = vec![
        families(3, 4, 5000),
        families(3, 4, 50_000),
        families(2, 7, 90_000),
    ];

    let parallel: Vec<GreedySpectralCluster> = shards
        .par_iter()
        .map(|shard| engine.cluster(engine.clusters_from_spectra(shard)))
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
        .into_iter()
        .flatten()
        .collect();

    let all: Vec<SpectrumRecord> = shards.into_iter().flatten().collect();
    let sequential = engine.cluster(engine.clusters_from_spectra(&all)).unwrap();

    assert_eq!(parallel.len(), 8);
    assert_eq!(member_sets(&parallel), member_sets(&sequential));
}
