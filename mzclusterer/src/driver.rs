use std::fs;
use std::io::{self, prelude::*};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use crossbeam_channel::bounded;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzcluster::{
    CdfError, CdfTable, ClusteringError, ConsensusParams, EngineConstructionError, EngineParams,
    MzBin, SpectrumError, SpectrumRecord,
};

use crate::args::{positive_mz, probability, ClusteringBuilderParams};
use crate::mz_range::MzRange;
use crate::proc::cluster_spectra;
use crate::types::BUFFER_SIZE;
use crate::write::{collate_results, write_output, OutputSink};

#[derive(Debug, Error)]
pub enum MZClustererError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Could not open input file {path}: {source}")]
    InputOpenError {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse spectrum on line {line}: {source}")]
    JSONError {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid spectrum: {0}")]
    SpectrumError(#[from] SpectrumError),
    #[error("Failed to load CDF table: {0}")]
    CdfError(#[from] CdfError),
    #[error("Invalid clustering parameters: {0}")]
    EngineConstructionError(#[from] EngineConstructionError),
    #[error("Clustering failed: {0}")]
    ClusteringError(#[from] ClusteringError),
    #[error("Failed to read configuration: {0}")]
    ConfigError(#[from] figment::Error),
    #[error("Failed to build thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error("A random match CDF table is required, pass one with --cdf-file")]
    MissingCdf,
    #[error("The output stream closed before shard {0} could be written")]
    OutputClosed(usize),
}

/// Greedy clustering of tandem mass spectra by spectral similarity.
///
/// Read spectra as JSON Lines, cluster them within precursor m/z windows, and write one
/// consensus cluster per line.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct MZClusterer {
    /// The path to read the input spectra from, or if '-' is passed, read from STDIN.
    ///
    /// Paths ending in `.gz` are decompressed.
    #[arg()]
    pub input_file: String,

    /// The path to write the clusters to, or if '-' is passed, write to STDOUT.
    ///
    /// Paths ending in `.gz` are compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzclusterer.toml` in the working directory.
    /// Environment variables prefixed with `MZCLUSTERER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The random match score distribution, as written by `mz-cdf`
    #[arg(short = 'c', long = "cdf-file")]
    pub cdf_file: Option<PathBuf>,

    /// The size of the buffer for queueing writing of results to the output stream
    #[arg(short = 'w', long = "write-buffer-size", default_value_t = BUFFER_SIZE)]
    pub write_buffer_size: usize,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short = 't',
        long = "threads",
        default_value_t = -1,
    )]
    pub threads: i32,

    /// The precursor m/z range to process, denoted (start?)-(stop?)
    #[arg(
        short = 'r',
        long = "precursor-range",
        value_parser = MzRange::from_str,
        value_name = "START-END",
        allow_hyphen_values = true,
        long_help = r#"The precursor m/z range to process, denoted (start?)-(stop?)

Values are in the same quantized units as the input precursors.
If a start is not specified, processing begins from the lowest precursor.
If a stop is not specified, processing stops at the highest precursor.
"#
    )]
    pub precursor_range: Option<MzRange>,

    /// The largest precursor m/z difference between two compared clusters
    #[arg(
        short = 'p',
        long = "precursor-tolerance",
        default_value_t = 1000,
        value_parser = positive_mz
    )]
    pub precursor_tolerance: MzBin,

    /// The confidence required to merge in the first round
    #[arg(long = "threshold-start", default_value_t = 0.999, value_parser = probability)]
    pub threshold_start: f64,

    /// The confidence required to merge in the last round
    #[arg(long = "threshold-end", default_value_t = 0.99, value_parser = probability)]
    pub threshold_end: f64,

    /// The number of clustering rounds
    #[arg(short = 'n', long = "rounds", default_value_t = 5)]
    pub rounds: usize,

    /// How far a cluster's precursor may fall below its predecessor's before the input
    /// is rejected as unsorted
    #[arg(long = "ordering-slack", default_value_t = 2)]
    pub ordering_slack: MzBin,

    /// The width of the m/z windows used to filter noise from consensus spectra
    #[arg(long = "window-size", default_value_t = 100)]
    pub window_size: MzBin,

    /// The number of peaks kept in each noise filtering window
    #[arg(long = "peaks-per-window", default_value_t = 5)]
    pub peaks_per_window: usize,

    /// Consensus spectra with fewer peaks than this are not noise filtered
    #[arg(long = "min-peaks-to-filter", default_value_t = 50)]
    pub min_peaks_to_filter: usize,

    /// The number of most intense peaks compared between clusters, 0 to compare all
    #[arg(short = 'k', long = "comparison-peaks", default_value_t = 40)]
    pub comparison_peaks: usize,

    /// The number of most intense peaks two clusters must share to be compared in the
    /// first round, 0 to only require matching charge
    #[arg(long = "first-round-shared-peaks", default_value_t = 5)]
    pub first_round_shared_peaks: usize,

    /// The smallest number of comparisons assumed when correcting for multiple testing
    #[arg(short = 'm', long = "min-comparisons", default_value_t = 10_000)]
    pub min_comparisons: usize,

    /// Count comparisons from the precursor density in bins of this width instead of the
    /// clusters in the current window
    #[arg(long = "density-bin-width")]
    pub density_bin_width: Option<MzBin>,

    /// The width of the precursor m/z shards clustered in parallel, 0 for a single shard
    #[arg(long = "shard-width", default_value_t = 20_000)]
    pub shard_width: MzBin,

    /// The number of best scoring comparisons remembered by each cluster
    #[arg(long = "comparison-cache", default_value_t = 30)]
    pub comparison_cache: usize,
}

impl Default for MZClusterer {
    fn default() -> Self {
        Self {
            input_file: Default::default(),
            output_file: PathBuf::from("-"),
            log_file: None,
            config_file: None,
            cdf_file: None,
            write_buffer_size: BUFFER_SIZE,
            threads: -1,
            precursor_range: None,
            precursor_tolerance: 1000,
            threshold_start: 0.999,
            threshold_end: 0.99,
            rounds: 5,
            ordering_slack: 2,
            window_size: 100,
            peaks_per_window: 5,
            min_peaks_to_filter: 50,
            comparison_peaks: 40,
            first_round_shared_peaks: 5,
            min_comparisons: 10_000,
            density_bin_width: None,
            shard_width: 20_000,
            comparison_cache: 30,
        }
    }
}

impl MZClusterer {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZClustererError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    pub fn clustering_params(&self) -> ClusteringBuilderParams {
        ClusteringBuilderParams {
            engine: EngineParams {
                precursor_tolerance: self.precursor_tolerance,
                threshold_start: self.threshold_start,
                threshold_end: self.threshold_end,
                rounds: self.rounds,
                ordering_slack: self.ordering_slack,
                consensus: ConsensusParams::new(
                    self.window_size,
                    self.peaks_per_window,
                    self.min_peaks_to_filter,
                ),
                comparison_capacity: self.comparison_cache,
            },
            comparison_peaks: self.comparison_peaks,
            first_round_shared_peaks: self.first_round_shared_peaks,
            min_comparisons: self.min_comparisons,
            density_bin_width: self.density_bin_width,
        }
    }

    fn open_input(&self) -> Result<Box<dyn BufRead>, MZClustererError> {
        if self.input_file == "-" {
            return Ok(Box::new(io::BufReader::new(io::stdin())));
        }
        let handle =
            fs::File::open(&self.input_file).map_err(|e| MZClustererError::InputOpenError {
                path: self.input_file.clone(),
                source: e,
            })?;
        if self.input_file.ends_with(".gz") {
            Ok(Box::new(io::BufReader::new(MultiGzDecoder::new(handle))))
        } else {
            Ok(Box::new(io::BufReader::new(handle)))
        }
    }

    /// Read every spectrum in the precursor range, sorted by precursor m/z
    pub fn read_spectra(&self) -> Result<Vec<SpectrumRecord>, MZClustererError> {
        let reader = self.open_input()?;
        let range = self.precursor_range.unwrap_or_default();
        let mut spectra = Vec::new();
        let mut skipped = 0usize;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let spectrum: SpectrumRecord =
                serde_json::from_str(&line).map_err(|e| MZClustererError::JSONError {
                    line: i + 1,
                    source: e,
                })?;
            spectrum.validate()?;
            if range.contains(spectrum.precursor_mz) {
                spectra.push(spectrum);
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            debug!("Skipped {skipped} spectra outside of {range}");
        }
        spectra.sort_by_key(|s| s.precursor_mz);
        Ok(spectra)
    }

    pub fn main(&self) -> Result<(), MZClustererError> {
        info!(
            "mzclusterer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        info!("Output: {}", self.output_file.display());
        self.create_threadpool()?.install(|| self.run())
    }

    fn run(&self) -> Result<(), MZClustererError> {
        let start = Instant::now();
        let cdf_path = self.cdf_file.as_ref().ok_or(MZClustererError::MissingCdf)?;
        let cdf = Arc::new(CdfTable::from_path(cdf_path)?);

        let spectra = self.read_spectra()?;
        info!("Read {} spectra in {:0.3?}", spectra.len(), start.elapsed());

        let engine = self
            .clustering_params()
            .build_engine(cdf, spectra.iter().map(|s| s.precursor_mz))?;

        let sink = OutputSink::open(&self.output_file)?;
        let buffer_size = self.write_buffer_size.max(1);
        let (send_clustered, recv_clustered) = bounded(buffer_size);
        let (send_collated, recv_collated) = bounded(buffer_size);

        let collate_task = thread::spawn(move || collate_results(recv_clustered, send_collated));
        let write_task = thread::spawn(move || -> io::Result<usize> {
            let mut sink = sink;
            let n_written = write_output(&mut sink, recv_collated)?;
            sink.finish()?;
            Ok(n_written)
        });

        let result = cluster_spectra(&engine, spectra, self.shard_width, send_clustered);
        let processing_elapsed = start.elapsed();

        match collate_task.join() {
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to join collator task: {e:?}")
            }
        }

        match write_task.join() {
            Ok(o) => {
                let n_written = o?;
                debug!("Wrote {n_written} clusters");
            }
            Err(e) => {
                warn!("Failed to join writer task: {e:?}");
            }
        }

        let prog = result?;
        info!("Spectra: {}", prog.spectra);
        info!("Clusters: {}", prog.clusters);
        info!(
            "Comparisons: {} | Merges: {}",
            prog.comparisons, prog.merges
        );
        info!("Shards: {}", prog.shards);

        let elapsed = start.elapsed();
        if (elapsed.as_secs_f64() - processing_elapsed.as_secs_f64()) > 2.0 {
            info!("Total Elapsed Time: {:0.3?}", elapsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_agree() {
        let parsed = MZClusterer::parse_from(["mzclusterer", "input.jsonl"]);
        let default = MZClusterer {
            input_file: "input.jsonl".to_string(),
            ..Default::default()
        };
        assert_eq!(
            toml::to_string(&parsed).unwrap(),
            toml::to_string(&default).unwrap()
        );
        assert_eq!(
            parsed.clustering_params(),
            crate::args::make_default_clustering_params()
        );
    }

    #[test]
    fn test_parse_arguments() {
        let parsed = MZClusterer::parse_from([
            "mzclusterer",
            "input.jsonl",
            "-r",
            "-52000",
            "-k",
            "0",
            "--threshold-end",
            "0.95",
        ]);
        assert_eq!(parsed.precursor_range, Some(MzRange::new(0, 52000)));
        assert_eq!(parsed.comparison_peaks, 0);
        assert_eq!(parsed.threshold_end, 0.95);
    }
}
