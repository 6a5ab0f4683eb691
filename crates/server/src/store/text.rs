// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{stanza_key, store_key, StoreKind, ZoneStore};
use crate::config::ZoneConfig;
use crate::error::{PersistenceErrorKind, PersistenceResult, Result};
use crate::proto::rr::Name;

#[derive(Deserialize)]
struct NzfFile {
    #[serde(default)]
    zones: Vec<ZoneConfig>,
}

/// Returns the lock serialising access to the store file at `path`.
///
/// Every handle on the same file shares one lock for as long as any handle is alive.
fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = OnceLock::new();

    let key = match (path.parent(), path.file_name()) {
        (Some(parent), Some(file)) => fs::canonicalize(parent)
            .map(|dir| dir.join(file))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    };

    let mut locks = LOCKS.get_or_init(Default::default).lock();
    locks.retain(|_, lock| lock.strong_count() > 0);
    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }
    let lock = Arc::new(Mutex::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

/// The `<view>.nzf` store, a TOML document of `[[zones]]` tables
///
/// New zones are appended; deleting or modifying a zone rewrites the whole file.
#[derive(Debug)]
pub struct TextZoneStore {
    path: PathBuf,
    view: String,
    lock: Arc<Mutex<()>>,
}

impl TextZoneStore {
    /// Attaches to the store at `path`, which need not exist yet
    pub fn open(path: PathBuf, view: &str) -> PersistenceResult<Self> {
        if path.exists() {
            File::open(&path).map_err(|e| PersistenceErrorKind::Unavailable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self {
            lock: file_lock(&path),
            path,
            view: view.to_string(),
        })
    }

    fn header(&self) -> String {
        format!(
            "# New-zone store for view \"{}\".\n# Written by switchyard; edits made while the server runs are lost.\n",
            self.view
        )
    }

    fn read(&self) -> PersistenceResult<Vec<ZoneConfig>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let file: NzfFile = toml::from_str(&text)?;
        Ok(file.zones)
    }

    fn append(&self, zone: &ZoneConfig) -> PersistenceResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let len = file.metadata()?.len();

        let mut text = String::new();
        if len == 0 {
            text.push_str(&self.header());
        }
        text.push('\n');
        text.push_str(&zone.to_toml_entry());

        if let Err(e) = file.write_all(text.as_bytes()).and_then(|()| file.sync_data()) {
            warn!(
                "append to {} failed, truncating back to {len} bytes: {e}",
                self.path.display()
            );
            file.set_len(len)?;
            return Err(e.into());
        }
        Ok(())
    }

    fn rewrite(&self, zones: &[ZoneConfig]) -> PersistenceResult<()> {
        let mut text = self.header();
        for zone in zones {
            text.push('\n');
            text.push_str(&zone.to_toml_entry());
        }

        let tmp = self.path.with_extension("nzf.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!("rewrote {} with {} zones", self.path.display(), zones.len());
        Ok(())
    }
}

impl ZoneStore for TextZoneStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Text
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn count(&self) -> PersistenceResult<usize> {
        let _guard = self.lock.lock();
        Ok(self.read()?.len())
    }

    fn check_writable(&self) -> PersistenceResult<()> {
        let _guard = self.lock.lock();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(|_| PersistenceErrorKind::Unwritable(self.path.clone()).into())
    }

    fn for_each(&self, f: &mut dyn FnMut(ZoneConfig) -> Result<()>) -> Result<()> {
        let zones = {
            let _guard = self.lock.lock();
            self.read()?
        };

        for zone in zones {
            f(zone)?;
        }
        Ok(())
    }

    fn load_all(&self) -> PersistenceResult<Vec<ZoneConfig>> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn get(&self, name: &Name) -> PersistenceResult<Option<ZoneConfig>> {
        let key = store_key(name);
        let _guard = self.lock.lock();
        Ok(self.read()?.into_iter().find(|z| stanza_key(z) == key))
    }

    fn upsert(&self, zone: &ZoneConfig) -> PersistenceResult<()> {
        let key = stanza_key(zone);
        let _guard = self.lock.lock();
        let mut zones = self.read()?;

        match zones.iter_mut().find(|z| stanza_key(z) == key) {
            Some(existing) => {
                *existing = zone.clone();
                self.rewrite(&zones)
            }
            None => self.append(zone),
        }
    }

    fn delete(&self, name: &Name) -> PersistenceResult<bool> {
        let key = store_key(name);
        let _guard = self.lock.lock();
        let mut zones = self.read()?;

        let before = zones.len();
        zones.retain(|z| stanza_key(z) != key);
        if zones.len() == before {
            return Ok(false);
        }

        self.rewrite(&zones)?;
        Ok(true)
    }

    fn migrate_legacy_format(&self) -> PersistenceResult<usize> {
        Ok(0)
    }
}
