// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{DbSource, Zone, ZoneDb, ZoneKind, ZoneOptions};

/// Errors from loading zone contents
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The zone file does not exist
    #[error("file not found: {0:?}")]
    FileNotFound(PathBuf),

    /// The zone has no file to load from
    #[error("no file configured")]
    NoFile,

    /// The contents could not be parsed
    #[error("{0}")]
    Parse(String),

    /// An error got returned from IO
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Reads zone contents into memory
///
/// Parsing zone data is outside the engine; the loader is the seam where a concrete
/// zone-file reader plugs in.
#[async_trait]
pub trait ZoneLoader: Send + Sync {
    /// Loads the contents of `zone` according to `options`
    async fn load(&self, zone: &Zone, options: &ZoneOptions) -> Result<ZoneDb, LoadError>;
}

/// Loads zone files from disk, counting their records
#[derive(Clone, Copy, Debug, Default)]
pub struct FileZoneLoader;

#[async_trait]
impl ZoneLoader for FileZoneLoader {
    async fn load(&self, zone: &Zone, options: &ZoneOptions) -> Result<ZoneDb, LoadError> {
        let Some(path) = options.path.clone() else {
            return match zone.kind() {
                ZoneKind::StaticStub | ZoneKind::Key => Ok(ZoneDb::new(DbSource::Builtin("empty".into()), 0, None)),
                kind if kind.is_secondary() => Ok(ZoneDb::new(DbSource::AwaitingTransfer, 0, None)),
                _ => Err(LoadError::NoFile),
            };
        };

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return match zone.kind() {
                    ZoneKind::Key => Ok(ZoneDb::new(DbSource::File(path), 0, None)),
                    kind if kind.is_secondary() => Ok(ZoneDb::new(DbSource::AwaitingTransfer, 0, None)),
                    _ => Err(LoadError::FileNotFound(path)),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = 0;
        let mut serial = None;
        for (line_no, line) in text.lines().enumerate() {
            let line = line.split(';').next().unwrap_or_default().trim();
            if line.is_empty() || line.starts_with('$') {
                continue;
            }
            if line.contains('"') && line.matches('"').count() % 2 != 0 {
                return Err(LoadError::Parse(format!(
                    "{}:{}: unbalanced quotes",
                    path.display(),
                    line_no + 1
                )));
            }
            if serial.is_none() {
                serial = soa_serial(line);
            }
            records += 1;
        }

        debug!("read {records} records from {}", path.display());
        Ok(ZoneDb::new(DbSource::File(path), records, serial))
    }
}

/// The serial of a single-line SOA record, if `line` is one
fn soa_serial(line: &str) -> Option<u32> {
    let mut words = line.split_whitespace();
    words.by_ref().find(|w| w.eq_ignore_ascii_case("SOA"))?;
    // mname rname serial
    words.nth(2)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::proto::rr::{DNSClass, Name};

    #[tokio::test]
    async fn test_load_counts_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.com.zone");
        std::fs::write(
            &path,
            "$TTL 3600\n@ IN SOA ns1 hostmaster 2024010101 3600 900 604800 300\n; comment\n@ IN NS ns1\nns1 IN A 192.0.2.1\n",
        )
        .unwrap();

        let zone = Zone::new(Name::from_str("example.com.").unwrap(), DNSClass::IN, ZoneKind::Primary, vec![]);
        let options = ZoneOptions {
            path: Some(path.clone()),
            ..ZoneOptions::default()
        };

        let db = FileZoneLoader.load(&zone, &options).await.unwrap();
        assert_eq!(db.records, 3);
        assert_eq!(db.serial, Some(2024010101));
        assert_eq!(db.source, DbSource::File(path));
    }

    #[tokio::test]
    async fn test_missing_primary_file_fails() {
        let zone = Zone::new(Name::from_str("example.com.").unwrap(), DNSClass::IN, ZoneKind::Primary, vec![]);
        let options = ZoneOptions {
            path: Some(PathBuf::from("/nonexistent/example.com.zone")),
            ..ZoneOptions::default()
        };

        assert!(matches!(
            FileZoneLoader.load(&zone, &options).await,
            Err(LoadError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_secondary_awaits_transfer() {
        let zone = Zone::new(Name::from_str("example.net.").unwrap(), DNSClass::IN, ZoneKind::Secondary, vec![]);
        let options = ZoneOptions {
            path: Some(PathBuf::from("/nonexistent/example.net.bk")),
            ..ZoneOptions::default()
        };

        let db = FileZoneLoader.load(&zone, &options).await.unwrap();
        assert_eq!(db.source, DbSource::AwaitingTransfer);
    }
}
