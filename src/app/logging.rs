//! Logging setup
//!
//! `tracing` to stderr for the operator, plus an optional per-job append-only
//! log file under `<state_dir>/logs/<job>.log`. The file is rotated to
//! `<job>.log.1 .. <job>.log.N` once it grows past a fixed size.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::constants::env;

/// Size-rotated append-only log file, shareable across threads
#[derive(Debug, Clone)]
pub struct RotatingFile {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    max_files: usize,
}

impl RotatingFile {
    /// Open `path` for appending, creating parent directories
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path,
                file,
                written,
                max_bytes,
                max_files,
            })),
        })
    }

    /// Path of the live log file
    pub fn path(&self) -> PathBuf {
        match self.inner.lock() {
            Ok(inner) => inner.path.clone(),
            Err(poisoned) => poisoned.into_inner().path.clone(),
        }
    }
}

impl Inner {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_files == 0 {
            // No generations kept: start over in place
            self.file = File::create(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        for generation in (1..self.max_files).rev() {
            let from = generation_path(&self.path, generation);
            if from.exists() {
                std::fs::rename(&from, generation_path(&self.path, generation + 1))?;
            }
        }
        std::fs::rename(&self.path, generation_path(&self.path, 1))?;

        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?;

        if inner.written > 0 && inner.written + buf.len() as u64 > inner.max_bytes {
            inner.rotate()?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?;
        inner.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn generation_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", generation));
    PathBuf::from(name)
}

/// Install the global subscriber
///
/// `MEDIA_CACHE_LOG` (same syntax as `RUST_LOG`) overrides `level`. Levels
/// are printed on stderr only when `show_levels` is set; the file layer
/// always includes timestamps and levels.
pub fn init_logging(level: &str, show_levels: bool, file: Option<RotatingFile>) {
    let filter = EnvFilter::try_from_env(env::LOG).unwrap_or_else(|_| {
        EnvFilter::new(format!("media_cache={}", level))
    });

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(show_levels)
        .without_time();

    let file_layer = file.map(|log| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(move || log.clone())
    });

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_keeps_fixed_generations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/sweep.log");
        let mut log = RotatingFile::open(&path, 10, 2).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            log.write_all(line.as_bytes()).unwrap();
        }
        log.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(
            std::fs::read_to_string(generation_path(&path, 1)).unwrap(),
            "cccccccc\n"
        );
        assert_eq!(
            std::fs::read_to_string(generation_path(&path, 2)).unwrap(),
            "bbbbbbbb\n"
        );
        assert!(!generation_path(&path, 3).exists());
    }

    #[test]
    fn test_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitor.log");

        RotatingFile::open(&path, 1024, 3)
            .unwrap()
            .write_all(b"first\n")
            .unwrap();
        let mut log = RotatingFile::open(&path, 1024, 3).unwrap();
        log.write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        assert_eq!(log.path(), path);
    }
}
