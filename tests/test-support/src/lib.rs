
//! Helpers shared by the integration tests of the workspace

use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, Once},
};

use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

/// Registers a global default tracing subscriber when called for the first time. This is intended
/// for use in tests.
pub fn subscribe() {
    static INSTALL_TRACING_SUBSCRIBER: Once = Once::new();
    INSTALL_TRACING_SUBSCRIBER.call_once(|| {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}

/// Installs a thread-local subscriber capturing every event at `DEBUG` and above.
///
/// The capture lasts as long as the returned guard. Only events emitted on the current
/// thread are seen, so use it with a current-thread runtime.
pub fn capture_logs() -> (LogWriter, DefaultGuard) {
    let writer = LogWriter::default();
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (writer, guard)
}

/// This is a writer that can be used with a thread-local tracing subscriber to inspect
/// logs for a single test.
#[derive(Clone, Default)]
pub struct LogWriter(pub Arc<Mutex<Vec<u8>>>);

impl LogWriter {
    pub fn contains(&self, needle: &str) -> bool {
        self.logs().contains(needle)
    }

    pub fn logs(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// A scratch server directory holding a configuration file and zone files.
///
/// The directory and everything in it are removed on drop.
pub struct ServerDir {
    dir: TempDir,
}

impl ServerDir {
    /// Creates an empty directory
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// The directory itself
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `name` inside the directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes `contents` to `name`, creating parent directories
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    /// Writes `config` as `named.toml`, prefixed with an `[options]` table pointing the
    /// server at this directory, and returns its path.
    ///
    /// `options` is inserted verbatim into that table; `config` must not declare its
    /// own `[options]`.
    pub fn write_config(&self, options: &str, config: &str) -> PathBuf {
        let text = format!(
            "[options]\ndirectory = \"{}\"\n{options}\n\n{config}",
            self.path().display()
        );
        self.write("named.toml", &text)
    }

    /// Writes a minimal primary zone file for `origin` as `file`
    pub fn write_zone(&self, file: &str, origin: &str) -> PathBuf {
        let origin = origin.trim_end_matches('.');
        let text = format!(
            "$ORIGIN {origin}.\n$TTL 3600\n@ IN SOA ns.{origin}. hostmaster.{origin}. 1 7200 3600 1209600 3600\n@ IN NS ns.{origin}.\nns IN A 192.0.2.1\n"
        );
        self.write(file, &text)
    }

    /// True if `name` exists in the directory
    pub fn exists(&self, name: &str) -> bool {
        self.join(name).exists()
    }
}

impl Default for ServerDir {
    fn default() -> Self {
        Self::new()
    }
}
