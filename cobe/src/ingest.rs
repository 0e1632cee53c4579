//! File training drivers for `train` and `train-irc-log`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter::Flatten;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

use crate::engine::{Engine, Shutdown};
use crate::normalize::{NickFilter, normalize_log_line};

/// Log a progress line every this many lines.
const PROGRESS_EVERY: usize = 1000;

/// Open a file for line reading, decompressing `.gz` transparently.
pub fn open(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("can't open {}", path.display()))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Lines of one file as text, invalid UTF-8 replaced, line endings removed.
///
/// A read error ends the iteration; it is logged, not returned, so a
/// damaged file does not throw away what was already learned.
pub struct Lines {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    lineno: usize,
    done: bool,
}

impl Lines {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(path, open(path)?))
    }

    pub fn new(path: &Path, reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            path: path.to_path_buf(),
            reader,
            buf: Vec::new(),
            lineno: 0,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        tracing::info!(file = %self.path.display(), lines = self.lineno, "Finished file");
    }
}

impl Iterator for Lines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.finish();
                None
            }
            Ok(_) => {
                if self.lineno == 0 {
                    tracing::info!(file = %self.path.display(), "Training");
                }
                self.lineno += 1;
                if self.lineno % PROGRESS_EVERY == 0 {
                    tracing::info!(file = %self.path.display(), lines = self.lineno, "Progress");
                }
                let line = String::from_utf8_lossy(&self.buf);
                Some(line.trim_end_matches(['\r', '\n']).to_string())
            }
            Err(e) => {
                tracing::warn!(file = %self.path.display(), line = self.lineno + 1, error = %e, "Read failed");
                self.finish();
                None
            }
        }
    }
}

/// Every line of every file, in order. All files are opened up front so a
/// bad path fails before anything is trained.
pub fn lines_of(paths: &[PathBuf]) -> Result<Flatten<std::vec::IntoIter<Lines>>> {
    let files = paths
        .iter()
        .map(|path| Lines::open(path))
        .collect::<Result<Vec<_>>>()?;
    Ok(files.into_iter().flatten())
}

/// `train FILE...`
pub fn train_files<E: Engine>(engine: &mut E, paths: &[PathBuf], shutdown: &Shutdown) -> Result<usize> {
    let lines = lines_of(paths)?;
    let count = engine.train_many(lines, shutdown).context("training failed")?;
    Ok(count)
}

/// `train-irc-log FILE...`: only `HH:MM <nick> message` lines that pass the
/// nick filter are learned.
pub fn train_irc_log<E: Engine>(
    engine: &mut E,
    paths: &[PathBuf],
    filter: &NickFilter,
    shutdown: &Shutdown,
) -> Result<usize> {
    let messages = lines_of(paths)?.filter_map(|line| normalize_log_line(&line, filter));
    let count = engine.train_many(messages, shutdown).context("training failed")?;
    Ok(count)
}
