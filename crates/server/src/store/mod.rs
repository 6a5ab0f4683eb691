// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Durable storage for zones added at runtime
//!
//! Every view that allows new zones owns one store in its `new-zones-directory`. Two
//! interchangeable backends exist, the append-only text file (`<view>.nzf`) and the
//! sqlite table (`<view>.nzd`), selected with the `new-zone-store` option.

use std::fmt::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ZoneConfig;
use crate::error::{PersistenceResult, Result};
use crate::proto::rr::Name;

#[cfg(feature = "sqlite")]
mod sqlite;
mod text;

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteZoneStore;
pub use self::text::TextZoneStore;

/// Extension of the text store
pub const TEXT_EXTENSION: &str = "nzf";
/// Extension of the sqlite store
pub const SQLITE_EXTENSION: &str = "nzd";

/// Backend selected by the `new-zone-store` option
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// `<view>.nzd`, a transactional sqlite table
    #[default]
    Sqlite,
    /// `<view>.nzf`, an append-only list of `[[zones]]` tables
    Text,
}

impl StoreKind {
    /// The option spelling of this backend
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Text => "text",
        }
    }

    /// The file extension used by this backend
    pub fn extension(self) -> &'static str {
        match self {
            Self::Sqlite => SQLITE_EXTENSION,
            Self::Text => TEXT_EXTENSION,
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "nzd" => Ok(Self::Sqlite),
            "text" | "nzf" => Ok(Self::Text),
            _ => Err(format!("unknown new-zone-store '{s}'")),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-view durable mapping of zone name to zone stanza
///
/// Implementations serialize their own writes, so concurrent callers never interleave
/// records even outside the server's exclusive sections.
pub trait ZoneStore: Send + Sync + fmt::Debug {
    /// The backend of this store
    fn kind(&self) -> StoreKind;

    /// Location of the backing file
    fn path(&self) -> &Path;

    /// Number of stored zones
    fn count(&self) -> PersistenceResult<usize>;

    /// Fails with [`PersistenceErrorKind::Unwritable`](crate::error::PersistenceErrorKind::Unwritable) when records cannot be written
    fn check_writable(&self) -> PersistenceResult<()>;

    /// Calls `f` with every stored zone, stopping at the first error `f` returns
    fn for_each(&self, f: &mut dyn FnMut(ZoneConfig) -> Result<()>) -> Result<()>;

    /// All stored zones, in storage order
    fn load_all(&self) -> PersistenceResult<Vec<ZoneConfig>>;

    /// The stored stanza for `name`
    fn get(&self, name: &Name) -> PersistenceResult<Option<ZoneConfig>>;

    /// Inserts or replaces the record for the stanza's zone
    fn upsert(&self, zone: &ZoneConfig) -> PersistenceResult<()>;

    /// Removes the record for `name`, returning false if there was none
    fn delete(&self, name: &Name) -> PersistenceResult<bool>;

    /// Imports a legacy text store into this one, returning the number of zones imported
    ///
    /// This is a no-op for stores that already hold records, or when no legacy file exists.
    fn migrate_legacy_format(&self) -> PersistenceResult<usize>;
}

/// The normalized record key for a zone: lower case, without the trailing dot except for
/// the root
pub fn store_key(name: &Name) -> String {
    let mut key = name.to_lowercase().to_string();
    if key.len() > 1 && key.ends_with('.') {
        key.pop();
    }
    key
}

/// The record key of a stanza, falling back to the lower-cased text when it is not a name
pub(crate) fn stanza_key(zone: &ZoneConfig) -> String {
    match zone.origin() {
        Ok(origin) => store_key(&origin),
        Err(_) => zone.name.to_ascii_lowercase(),
    }
}

/// Sanitises a view name into a file stem, escaping anything outside `[A-Za-z0-9_.-]`
pub fn view_file_stem(view: &str) -> String {
    let mut stem = String::with_capacity(view.len());
    for b in view.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-') {
            stem.push(char::from(b));
        } else {
            write!(stem, "%{b:02X}").ok();
        }
    }

    // keep a leading dot from producing a hidden file
    if stem.starts_with('.') {
        stem.replace_range(0..1, "%2E");
    }
    stem
}

/// Path of the store of `kind` for `view` inside `directory`
pub fn store_path(kind: StoreKind, directory: &Path, view: &str) -> PathBuf {
    directory.join(format!("{}.{}", view_file_stem(view), kind.extension()))
}

/// Opens (creating if needed) the store of `kind` for `view`
pub fn open_store(
    kind: StoreKind,
    directory: &Path,
    view: &str,
) -> PersistenceResult<Arc<dyn ZoneStore>> {
    match kind {
        StoreKind::Text => Ok(Arc::new(TextZoneStore::open(
            store_path(kind, directory, view),
            view,
        )?)),
        #[cfg(feature = "sqlite")]
        StoreKind::Sqlite => Ok(Arc::new(SqliteZoneStore::open(
            store_path(kind, directory, view),
            store_path(StoreKind::Text, directory, view),
            view,
        )?)),
        #[cfg(not(feature = "sqlite"))]
        StoreKind::Sqlite => {
            Err(crate::error::PersistenceErrorKind::UnsupportedBackend(kind.to_string()).into())
        }
    }
}

/// Counts the stored zones of `view` without creating a store
///
/// A missing store counts as empty. A sqlite store that has not migrated its legacy text
/// file yet counts the records that the migration will import.
pub fn count_zones(kind: StoreKind, directory: &Path, view: &str) -> PersistenceResult<usize> {
    let path = store_path(kind, directory, view);
    let legacy = store_path(StoreKind::Text, directory, view);
    match kind {
        StoreKind::Text if path.exists() => TextZoneStore::open(path, view)?.count(),
        StoreKind::Text => Ok(0),
        #[cfg(feature = "sqlite")]
        StoreKind::Sqlite if path.exists() => {
            let store = SqliteZoneStore::open(path, legacy.clone(), view)?;
            match store.count()? {
                0 if legacy.exists() => TextZoneStore::open(legacy, view)?.count(),
                count => Ok(count),
            }
        }
        StoreKind::Sqlite if legacy.exists() => TextZoneStore::open(legacy, view)?.count(),
        StoreKind::Sqlite => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_file_stem() {
        assert_eq!(view_file_stem("internal"), "internal");
        assert_eq!(view_file_stem("_default"), "_default");
        assert_eq!(view_file_stem("a/b"), "a%2Fb");
        assert_eq!(view_file_stem("a b"), "a%20b");
        assert_eq!(view_file_stem(".."), "%2E.");
        assert_ne!(view_file_stem("a/b"), view_file_stem("a%2Fb"));
    }

    #[test]
    fn test_store_key() {
        let name = Name::from_ascii("Dyn.Example.COM.").unwrap();
        assert_eq!(store_key(&name), "dyn.example.com");
        assert_eq!(store_key(&Name::root()), ".");
    }

    #[test]
    fn test_store_kind() {
        assert_eq!("sqlite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);
        assert_eq!("TEXT".parse::<StoreKind>().unwrap(), StoreKind::Text);
        assert!("lmdb".parse::<StoreKind>().is_err());
        assert_eq!(StoreKind::default().extension(), "nzd");
    }

    #[test]
    fn test_count_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(count_zones(StoreKind::Text, dir.path(), "v1").unwrap(), 0);
        assert_eq!(count_zones(StoreKind::Sqlite, dir.path(), "v1").unwrap(), 0);
        assert!(!store_path(StoreKind::Sqlite, dir.path(), "v1").exists());
    }
}
