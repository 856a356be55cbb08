use std::collections::BTreeMap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use crossbeam_channel::{Receiver, Sender};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error};

use crate::types::ClusterRecord;

/// Where finished clusters are written
pub(crate) enum OutputSink {
    Stdout(io::Stdout),
    Plain(io::BufWriter<fs::File>),
    Gzip(GzEncoder<io::BufWriter<fs::File>>),
}

impl OutputSink {
    /// Open `path` for writing, `-` meaning STDOUT. Paths ending in `.gz` are compressed.
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        if path == Path::new("-") {
            return Ok(Self::Stdout(io::stdout()));
        }
        let handle = io::BufWriter::new(fs::File::create(path)?);
        if path.extension().is_some_and(|ext| ext == "gz") {
            Ok(Self::Gzip(GzEncoder::new(handle, Compression::best())))
        } else {
            Ok(Self::Plain(handle))
        }
    }

    pub(crate) fn finish(self) -> io::Result<()> {
        match self {
            Self::Stdout(mut handle) => handle.flush(),
            Self::Plain(mut handle) => handle.flush(),
            Self::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(handle) => handle.write(buf),
            Self::Plain(handle) => handle.write(buf),
            Self::Gzip(handle) => handle.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(handle) => handle.flush(),
            Self::Plain(handle) => handle.flush(),
            Self::Gzip(handle) => handle.flush(),
        }
    }
}

/// Forward batches in index order, holding back any that arrive early.
pub(crate) fn collate_results<T: Send>(receiver: Receiver<(usize, T)>, sender: Sender<(usize, T)>) {
    let mut waiting: BTreeMap<usize, T> = BTreeMap::new();
    let mut next_key = 0usize;
    for (batch_idx, batch) in receiver.iter() {
        waiting.insert(batch_idx, batch);
        while let Some(batch) = waiting.remove(&next_key) {
            if let Err(e) = sender.send((next_key, batch)) {
                error!("Failed to send {next_key} for writing: {e}");
                return;
            }
            next_key += 1;
        }
    }
    if !waiting.is_empty() {
        debug!("Draining output queue, {} items", waiting.len());
    }
    for (batch_idx, batch) in waiting {
        if let Err(e) = sender.send((batch_idx, batch)) {
            error!("Failed to send {batch_idx} for writing: {e}");
            return;
        }
    }
}

/// Write each cluster as one JSON object per line, returning the number of clusters written
pub(crate) fn write_output<W: Write>(
    writer: &mut W,
    receiver: Receiver<(usize, Vec<ClusterRecord>)>,
) -> io::Result<usize> {
    let mut n_written = 0;
    for (batch_idx, batch) in receiver.iter() {
        for record in batch.iter() {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
            n_written += 1;
        }
        debug!("Wrote batch {batch_idx} with {} clusters", batch.len());
    }
    writer.flush()?;
    Ok(n_written)
}
