//! Empirical cumulative distribution of random-match similarity scores.
//!
//! A [`CdfTable`] is learned from scores of spectrum pairs known not to match and answers
//! how likely a score at least as high would be produced by chance, corrected for the
//! number of comparisons that were made to find it.
use std::fmt::Write as _;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::ptr;

use thiserror::Error;

use crate::scorer::{ScoreType, MAX_SCORE};

/// The most bins a table may span up to [`MAX_SCORE`]
const MAX_BINS: f64 = 10_000_000.0;

const HEADER: [&str; 5] = [
    "max_score",
    "lower_diff_matches",
    "cum_lower_diff_matches",
    "rel_cum_lower_matches",
    "total_matches",
];

#[derive(Debug, Error)]
pub enum CdfError {
    #[error("An IO error occurred while reading or writing a CDF table: {0}")]
    Io(#[from] io::Error),
    #[error("CDF table resource {0} does not exist")]
    MissingResource(PathBuf),
    #[error("CDF table is missing its header line")]
    MissingHeader,
    #[error("Malformed CDF table row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },
    #[error("Invalid CDF score increment {0}")]
    InvalidIncrement(String),
    #[error("CDF table has no rows")]
    Empty,
    #[error("Cannot merge CDF tables with score increments {0} and {1}")]
    IncompatibleIncrement(f64, f64),
    #[error("Cannot merge a CDF table with itself")]
    SelfMerge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CdfTable {
    score_increment: f64,
    cumulative_counts: Vec<u64>,
    total_comparisons: u64,
}

/// An increment must be positive, finite, and coarse enough to cover [`MAX_SCORE`] in at
/// most [`MAX_BINS`] bins.
fn check_increment(score_increment: f64) -> Result<(), CdfError> {
    if !score_increment.is_finite()
        || score_increment <= 0.0
        || MAX_SCORE / score_increment > MAX_BINS
    {
        return Err(CdfError::InvalidIncrement(score_increment.to_string()));
    }
    Ok(())
}

fn round_edge(value: f64) -> f64 {
    (value * 1e10).round() / 1e10
}

impl CdfTable {
    /// Build a table from its parts. `cumulative_counts` must be non-decreasing.
    pub fn new(
        score_increment: f64,
        cumulative_counts: Vec<u64>,
        total_comparisons: u64,
    ) -> Result<Self, CdfError> {
        if cumulative_counts.is_empty() || total_comparisons == 0 {
            return Err(CdfError::Empty);
        }
        check_increment(score_increment)?;
        if let Some(i) = cumulative_counts.windows(2).position(|w| w[1] < w[0]) {
            return Err(CdfError::MalformedRow {
                line: i + 3,
                reason: "cumulative counts decrease".to_string(),
            });
        }
        Ok(Self {
            score_increment,
            cumulative_counts,
            total_comparisons,
        })
    }

    pub fn score_increment(&self) -> f64 {
        self.score_increment
    }

    pub fn cumulative_counts(&self) -> &[u64] {
        &self.cumulative_counts
    }

    pub fn total_comparisons(&self) -> u64 {
        self.total_comparisons
    }

    pub fn len(&self) -> usize {
        self.cumulative_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative_counts.is_empty()
    }

    /// The probability that a random match scores no higher than `score`
    pub fn cdf(&self, score: ScoreType) -> f64 {
        if score < 0.0 {
            return 0.0;
        }
        let bin = (score / self.score_increment).floor();
        if !bin.is_finite() || bin >= self.cumulative_counts.len() as f64 {
            return 1.0;
        }
        self.cumulative_counts[bin as usize] as f64 / self.total_comparisons as f64
    }

    /// Whether `score` is significant after `n_comparisons` tries at the
    /// `required_confidence` level.
    pub fn is_save_match(
        &self,
        score: ScoreType,
        n_comparisons: usize,
        required_confidence: f64,
    ) -> bool {
        let n = n_comparisons.min(i32::MAX as usize) as i32;
        self.cdf(score).powi(n) > required_confidence
    }

    /// Combine the observations of two tables learned with the same increment.
    ///
    /// Self-merging is detected by instance only. Two tables loaded separately from the
    /// same resource are distinct values here, so callers working with paths must compare
    /// those themselves.
    pub fn merge(&self, other: &CdfTable) -> Result<CdfTable, CdfError> {
        if ptr::eq(self, other) {
            return Err(CdfError::SelfMerge);
        }
        if (self.score_increment - other.score_increment).abs() > 1e-9 {
            return Err(CdfError::IncompatibleIncrement(
                self.score_increment,
                other.score_increment,
            ));
        }
        let n = self.len().max(other.len());
        let get = |counts: &[u64], i: usize| -> u64 {
            counts
                .get(i)
                .or_else(|| counts.last())
                .copied()
                .unwrap_or_default()
        };
        let cumulative_counts = (0..n)
            .map(|i| get(&self.cumulative_counts, i) + get(&other.cumulative_counts, i))
            .collect();
        Ok(CdfTable {
            score_increment: self.score_increment,
            cumulative_counts,
            total_comparisons: self.total_comparisons + other.total_comparisons,
        })
    }

    /// Parse a table in the tab-separated format produced by [`CdfTable::write_to`].
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, CdfError> {
        let mut lines = reader.lines();
        match lines.next() {
            Some(header) => {
                let header = header?;
                if !header.trim_end().starts_with(HEADER[0]) {
                    return Err(CdfError::MissingHeader);
                }
            }
            None => return Err(CdfError::MissingHeader),
        }

        let mut score_increment = None;
        let mut cumulative_counts = Vec::new();
        let mut total_comparisons = 0;
        for (i, line) in lines.enumerate() {
            let line_no = i + 2;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.trim_end().split('\t').collect();
            if fields.len() != HEADER.len() {
                return Err(CdfError::MalformedRow {
                    line: line_no,
                    reason: format!("expected {} columns, found {}", HEADER.len(), fields.len()),
                });
            }
            let malformed = |column: usize, e: &dyn std::fmt::Display| CdfError::MalformedRow {
                line: line_no,
                reason: format!("{} {:?}: {e}", HEADER[column], fields[column]),
            };
            if score_increment.is_none() {
                let max_score: f64 = fields[0].parse().map_err(|e| malformed(0, &e))?;
                score_increment = Some(max_score);
            }
            let cumulative: u64 = fields[2].parse().map_err(|e| malformed(2, &e))?;
            total_comparisons = fields[4].parse().map_err(|e| malformed(4, &e))?;
            if cumulative > total_comparisons {
                return Err(CdfError::MalformedRow {
                    line: line_no,
                    reason: format!(
                        "cumulative count {cumulative} exceeds total matches {total_comparisons}"
                    ),
                });
            }
            cumulative_counts.push(cumulative);
        }

        match score_increment {
            Some(score_increment) => Self::new(score_increment, cumulative_counts, total_comparisons),
            None => Err(CdfError::Empty),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CdfError> {
        let path = path.as_ref();
        let handle = match fs::File::open(path) {
            Ok(handle) => handle,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CdfError::MissingResource(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let table = Self::from_reader(io::BufReader::new(handle))?;
        tracing::debug!(
            "Loaded CDF table from {} with {} bins over {} comparisons",
            path.display(),
            table.len(),
            table.total_comparisons
        );
        Ok(table)
    }

    pub fn to_tsv_string(&self) -> String {
        let mut buffer = HEADER.join("\t");
        buffer.push('\n');
        let mut previous = 0;
        let total = self.total_comparisons;
        for (i, count) in self.cumulative_counts.iter().copied().enumerate() {
            let max_score = round_edge((i + 1) as f64 * self.score_increment);
            let _ = writeln!(
                buffer,
                "{max_score}\t{}\t{count}\t{}\t{total}",
                count - previous,
                count as f64 / total as f64
            );
            previous = count;
        }
        buffer
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(self.to_tsv_string().as_bytes())?;
        writer.flush()
    }
}

/// Learn a [`CdfTable`] from the scores of random spectrum pairs
#[derive(Debug, Clone)]
pub struct CdfBuilder {
    score_increment: f64,
    bin_counts: Vec<u64>,
    total: u64,
}

impl CdfBuilder {
    pub fn new(score_increment: f64) -> Result<Self, CdfError> {
        check_increment(score_increment)?;
        Ok(Self {
            score_increment,
            bin_counts: Vec::new(),
            total: 0,
        })
    }

    /// Count one score. Scores above [`MAX_SCORE`] land in its bin.
    pub fn add_score(&mut self, score: ScoreType) {
        let bin = if score <= 0.0 || !score.is_finite() {
            0
        } else {
            (score.min(MAX_SCORE) / self.score_increment).floor() as usize
        };
        if bin >= self.bin_counts.len() {
            self.bin_counts.resize(bin + 1, 0);
        }
        self.bin_counts[bin] += 1;
        self.total += 1;
    }

    pub fn extend<I: IntoIterator<Item = ScoreType>>(&mut self, scores: I) {
        for score in scores {
            self.add_score(score);
        }
    }

    pub fn build(self) -> Result<CdfTable, CdfError> {
        let mut running = 0;
        let cumulative_counts = self
            .bin_counts
            .iter()
            .map(|c| {
                running += c;
                running
            })
            .collect();
        CdfTable::new(self.score_increment, cumulative_counts, self.total)
    }
}
