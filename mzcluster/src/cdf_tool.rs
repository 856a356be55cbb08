use std::env;
use std::fs;
use std::io::{self, BufRead};
use std::process::ExitCode;

use mzcluster::{CdfBuilder, CdfError, CdfTable};

const USAGE: &str = "usage: mz-cdf build <increment> <scores-file> | merge <a.tsv> <b.tsv>";

fn build(increment: &str, path: &str) -> Result<CdfTable, CdfError> {
    let increment: f64 = increment
        .parse()
        .map_err(|e| CdfError::InvalidIncrement(format!("{increment:?}: {e}")))?;
    let mut builder = CdfBuilder::new(increment)?;
    let reader = io::BufReader::new(fs::File::open(path)?);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let score: f64 = line.parse().map_err(|e| CdfError::MalformedRow {
            line: i + 1,
            reason: format!("{line:?}: {e}"),
        })?;
        builder.add_score(score);
    }
    builder.build()
}

fn merge(a: &str, b: &str) -> Result<CdfTable, CdfError> {
    let table_a = CdfTable::from_path(a)?;
    let table_b = CdfTable::from_path(b)?;
    if fs::canonicalize(a)? == fs::canonicalize(b)? {
        return Err(CdfError::SelfMerge);
    }
    table_a.merge(&table_b)
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["build", increment, path] => build(increment, path),
        ["merge", a, b] => merge(a, b),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    match result.and_then(|table| table.write_to(io::stdout().lock()).map_err(CdfError::from)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
