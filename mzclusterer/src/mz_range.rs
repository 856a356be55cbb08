use std::{error::Error, fmt::Display, num::ParseIntError, ops::Range, str::FromStr};

use serde::{Deserialize, Serialize};

use mzcluster::MzBin;

/// An inclusive range of quantized precursor m/z values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MzRange {
    pub start: MzBin,
    pub end: MzBin,
}

impl MzRange {
    pub fn new(start: MzBin, end: MzBin) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, mz: MzBin) -> bool {
        self.start <= mz && mz <= self.end
    }
}

impl Default for MzRange {
    fn default() -> Self {
        Self {
            start: 0,
            end: MzBin::MAX,
        }
    }
}

impl Display for MzRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub enum MzRangeParseError {
    MalformedStart(ParseIntError),
    MalformedEnd(ParseIntError),
}

impl Display for MzRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MzRangeParseError::MalformedStart(e) => {
                write!(f, "Failed to parse precursor range start {e}")
            }
            MzRangeParseError::MalformedEnd(e) => {
                write!(f, "Failed to parse precursor range end {e}")
            }
        }
    }
}

impl Error for MzRangeParseError {}

impl FromStr for MzRange {
    type Err = MzRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start_s, end_s) = if let Some(pair) = s.split_once(':') {
            pair
        } else if let Some(pair) = s.split_once('-') {
            pair
        } else {
            (s, "")
        };
        let start = if start_s.trim().is_empty() {
            0
        } else {
            start_s
                .trim()
                .parse()
                .map_err(MzRangeParseError::MalformedStart)?
        };
        let end = if end_s.trim().is_empty() {
            MzBin::MAX
        } else {
            end_s
                .trim()
                .parse()
                .map_err(MzRangeParseError::MalformedEnd)?
        };
        Ok(MzRange { start, end })
    }
}

impl From<Range<MzBin>> for MzRange {
    fn from(value: Range<MzBin>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl From<(MzBin, MzBin)> for MzRange {
    fn from(value: (MzBin, MzBin)) -> Self {
        Self::new(value.0, value.1)
    }
}
