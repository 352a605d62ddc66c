//! Logging setup shared by the Hodei binaries.
//!
//! Each process writes human-readable logs to stderr and to a size-capped
//! file under `~/.hodei/logs/<app>.log`. When the active file crosses its
//! cap it is renamed to a timestamped archive and the oldest archives are
//! pruned, so a long-lived orchestrator cannot grow the directory without
//! bound. Filter resolution order: `HODEI_LOG`, then `RUST_LOG`, then a
//! default keeping the hodei crates at info.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const FALLBACK_FILTER: &str =
    "hodei_orchestrator=info,hodei_worker=info,hodei_cli=info,hodei_protocol=warn";

/// Size at which the active log file is archived.
const ACTIVE_FILE_CAP: u64 = 10 * 1024 * 1024;

/// Timestamped archives kept per binary; older ones die at rotation time.
const ARCHIVES_KEPT: usize = 4;

/// Logging configuration shared by Hodei binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file-level filter on the console too
    pub verbose: bool,
}

/// Initialize tracing with an archiving file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let sink = LogSink::open(dir, config.app_name)
        .with_context(|| format!("Failed to open log sink for {}", config.app_name))?;

    let console_filter = if config.verbose {
        resolve_filter()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(sink)
                .with_ansi(false)
                .with_filter(resolve_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// `HODEI_LOG` wins, `RUST_LOG` is honored for ecosystem muscle memory, and
/// the fallback keeps our own crates chatty without drowning in dependencies.
fn resolve_filter() -> EnvFilter {
    EnvFilter::try_from_env("HODEI_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// The Hodei home directory: ~/.hodei (HODEI_HOME overrides).
pub fn hodei_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("HODEI_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hodei")
}

/// The logs directory: ~/.hodei/logs
pub fn logs_dir() -> PathBuf {
    hodei_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// File stem for a binary's logs: lowercased, runs of non-token characters
/// collapsed to single dashes.
fn file_stem(app_name: &str) -> String {
    let mut stem = String::with_capacity(app_name.len());
    for ch in app_name.chars() {
        if ch.is_ascii_alphanumeric() {
            stem.push(ch.to_ascii_lowercase());
        } else if !stem.is_empty() && !stem.ends_with('-') {
            stem.push('-');
        }
    }
    let stem = stem.trim_end_matches('-');
    if stem.is_empty() {
        "hodei".to_string()
    } else {
        stem.to_string()
    }
}

/// Active log file plus archive bookkeeping for one binary.
struct SinkState {
    dir: PathBuf,
    stem: String,
    file: File,
    written: u64,
}

impl SinkState {
    fn open(dir: PathBuf, stem: String) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{stem}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            stem,
            file,
            written,
        })
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    /// Move the active file aside under a timestamped name, start a fresh
    /// one, and prune archives beyond the retention count.
    fn archive(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let archived = self.dir.join(format!("{}-{}.log", self.stem, stamp));
        fs::rename(self.active_path(), &archived)?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = 0;
        self.prune_archives()
    }

    /// Timestamped names sort chronologically, so pruning is: sort, then
    /// drop from the front until within budget.
    fn prune_archives(&self) -> io::Result<()> {
        let mut archives = list_archives(&self.dir, &self.stem)?;
        archives.sort();
        while archives.len() > ARCHIVES_KEPT {
            let victim = archives.remove(0);
            fs::remove_file(&victim)?;
        }
        Ok(())
    }
}

fn list_archives(dir: &Path, stem: &str) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("{stem}-");
    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".log") {
            archives.push(entry.path());
        }
    }
    Ok(archives)
}

impl Write for SinkState {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > ACTIVE_FILE_CAP {
            self.archive()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Cloneable handle handed to tracing; every clone writes through the same
/// locked state, so rotation decisions stay consistent across layers.
#[derive(Clone)]
pub struct LogSink {
    state: Arc<Mutex<SinkState>>,
}

impl LogSink {
    fn open(dir: PathBuf, app_name: &str) -> Result<Self> {
        let state = SinkState::open(dir, file_stem(app_name))?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink lock poisoned"))?;
        state.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink lock poisoned"))?;
        state.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("hodei-orchestrator"), "hodei-orchestrator");
        assert_eq!(file_stem("My App!!"), "my-app");
        assert_eq!(file_stem("///"), "hodei");
    }

    #[test]
    fn test_writes_land_in_active_file() {
        let dir = TempDir::new().unwrap();
        let mut sink =
            SinkState::open(dir.path().to_path_buf(), "test".to_string()).unwrap();
        sink.write_all(b"hello\n").unwrap();
        sink.flush().unwrap();

        let contents = fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn test_archive_starts_fresh_file() {
        let dir = TempDir::new().unwrap();
        let mut sink = SinkState::open(dir.path().to_path_buf(), "rot".to_string()).unwrap();
        sink.write_all(b"first\n").unwrap();
        sink.archive().unwrap();
        sink.write_all(b"second\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("rot.log")).unwrap(),
            "second\n"
        );
        let archives = list_archives(dir.path(), "rot").unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(fs::read_to_string(&archives[0]).unwrap(), "first\n");
    }

    #[test]
    fn test_prune_drops_oldest_archives() {
        let dir = TempDir::new().unwrap();
        let sink = SinkState::open(dir.path().to_path_buf(), "app".to_string()).unwrap();

        // Seed more archives than the retention count; names sort by stamp.
        for stamp in 0..(ARCHIVES_KEPT + 3) {
            let path = dir.path().join(format!("app-2024010100000{stamp}.log"));
            fs::write(&path, b"old").unwrap();
        }
        sink.prune_archives().unwrap();

        let mut left = list_archives(dir.path(), "app").unwrap();
        left.sort();
        assert_eq!(left.len(), ARCHIVES_KEPT);
        // The survivors are the newest stamps.
        assert!(left[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("000003"));
    }

    #[test]
    fn test_archives_ignore_other_stems() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app-20240101.log"), b"mine").unwrap();
        fs::write(dir.path().join("other-20240101.log"), b"theirs").unwrap();
        fs::write(dir.path().join("app.log"), b"active").unwrap();

        let archives = list_archives(dir.path(), "app").unwrap();
        assert_eq!(archives.len(), 1);
    }
}
