//! Subscriber setup: stdout plus a size-rotated log file.

use crate::config::LogConf;
use parking_lot::Mutex;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "proxbot.log";
const DEFAULT_FILTER: &str = "proxbot=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(conf: &LogConf) -> io::Result<()> {
    let file = RotatingFileWriter::open(conf.dir.join(LOG_FILE), conf.max_bytes, conf.backups)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .try_init()
        .map_err(io::Error::other)
}

/// Replace chat bot credentials in `line` with a placeholder.
pub fn mask_secrets(line: &str) -> std::borrow::Cow<'_, str> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN
        .get_or_init(|| Regex::new(r"bot\d+:[A-Za-z0-9_-]+").expect("token pattern is valid"))
        .replace_all(line, "bot[TOKEN_HIDDEN]")
}

struct LogFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl LogFile {
    /// `proxbot.log` -> `proxbot.log.1` -> ... -> `proxbot.log.N`, oldest dropped.
    fn rotate(&mut self) -> io::Result<()> {
        if self.backups > 0 {
            let _ = fs::remove_file(backup_path(&self.path, self.backups));
            for i in (1..self.backups).rev() {
                let from = backup_path(&self.path, i);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, i + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// `MakeWriter` appending to one file, rotated once it would exceed `max_bytes`.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<LogFile>>,
}

impl RotatingFileWriter {
    pub fn open(path: PathBuf, max_bytes: u64, backups: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(LogFile {
                path,
                file,
                written,
                max_bytes,
                backups,
            })),
        })
    }
}

pub struct RotatingWriter {
    inner: Arc<Mutex<LogFile>>,
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        let masked = mask_secrets(&text);
        let bytes = masked.as_bytes();

        let mut log = self.inner.lock();
        if log.written > 0 && log.written + bytes.len() as u64 > log.max_bytes {
            log.rotate()?;
        }
        log.file.write_all(bytes)?;
        log.written += bytes.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter {
            inner: self.inner.clone(),
        }
    }
}
