// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use toml::Value;
use tracing::{info, warn};

use super::{stanza_key, store_key, StoreKind, TextZoneStore, ZoneStore};
use crate::config::{parse_class, ZoneConfig};
use crate::error::{PersistenceErrorKind, PersistenceResult, Result};
use crate::proto::rr::{DNSClass, Name};

/// The current schema version of the new-zone database
pub const CURRENT_VERSION: i64 = 1;

/// The `<view>.nzd` store, one row per zone holding its options as an inline table
#[derive(Debug)]
pub struct SqliteZoneStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    legacy: PathBuf,
    view: String,
    version: i64,
}

impl SqliteZoneStore {
    /// Opens or creates the database at `path`; `legacy` names the text store it may
    /// migrate from
    pub fn open(path: PathBuf, legacy: PathBuf, view: &str) -> PersistenceResult<Self> {
        let conn = Connection::open(&path).map_err(|e| PersistenceErrorKind::Unavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let version = Self::select_schema_version(&conn)?;

        let mut store = Self {
            conn: Mutex::new(conn),
            path,
            legacy,
            view: view.to_string(),
            version,
        };
        store.schema_up()?;
        Ok(store)
    }

    /// Returns the current schema version of the database
    pub fn schema_version(&self) -> i64 {
        self.version
    }

    /// selects the current schema version, returns -1 if there is no schema
    fn select_schema_version(conn: &Connection) -> PersistenceResult<i64> {
        let schema: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='switchyard_schema'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if schema.is_none() {
            return Ok(-1);
        }

        Ok(conn.query_row("SELECT version FROM switchyard_schema", [], |row| row.get(0))?)
    }

    fn schema_up(&mut self) -> PersistenceResult<i64> {
        while self.version < CURRENT_VERSION {
            let conn = self.conn.get_mut();
            self.version = match self.version + 1 {
                0 => Self::init_up(conn)?,
                1 => Self::zones_up(conn)?,
                version => {
                    return Err(PersistenceErrorKind::Corrupt {
                        zone: self.path.display().to_string(),
                        reason: format!("unknown schema version {version}"),
                    }
                    .into());
                }
            };

            let count = conn.execute(
                "UPDATE switchyard_schema SET version = ?1",
                [&self.version],
            )?;
            expect_rows(count, 1)?;
        }

        Ok(self.version)
    }

    /// initial schema, the switchyard_schema table tracks the version
    fn init_up(conn: &Connection) -> PersistenceResult<i64> {
        conn.execute(
            "CREATE TABLE switchyard_schema (version INTEGER NOT NULL)",
            [],
        )?;
        let count = conn.execute("INSERT INTO switchyard_schema (version) VALUES (0)", [])?;
        expect_rows(count, 1)?;
        Ok(0)
    }

    /// the zones table, keyed by the normalized zone name
    fn zones_up(conn: &Connection) -> PersistenceResult<i64> {
        conn.execute(
            "CREATE TABLE zones (
                name   TEXT PRIMARY KEY,
                config TEXT NOT NULL
            )",
            [],
        )?;
        Ok(1)
    }

    fn select_all(conn: &Connection) -> PersistenceResult<Vec<ZoneConfig>> {
        let mut stmt = conn.prepare("SELECT name, config FROM zones ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut zones = Vec::new();
        for row in rows {
            let (name, config) = row?;
            zones.push(decode(&name, &config)?);
        }
        Ok(zones)
    }

    fn insert_all(conn: &mut Connection, zones: &[ZoneConfig]) -> PersistenceResult<()> {
        let tx = conn.transaction()?;
        for zone in zones {
            tx.execute(
                "INSERT OR REPLACE INTO zones (name, config) VALUES (?1, ?2)",
                params![stanza_key(zone), encode(zone)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl ZoneStore for SqliteZoneStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn count(&self) -> PersistenceResult<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM zones", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn check_writable(&self) -> PersistenceResult<()> {
        self.conn
            .lock()
            .execute_batch("BEGIN IMMEDIATE; ROLLBACK;")
            .map_err(|_| PersistenceErrorKind::Unwritable(self.path.clone()).into())
    }

    fn for_each(&self, f: &mut dyn FnMut(ZoneConfig) -> Result<()>) -> Result<()> {
        let zones = Self::select_all(&self.conn.lock())?;
        for zone in zones {
            f(zone)?;
        }
        Ok(())
    }

    fn load_all(&self) -> PersistenceResult<Vec<ZoneConfig>> {
        Self::select_all(&self.conn.lock())
    }

    fn get(&self, name: &Name) -> PersistenceResult<Option<ZoneConfig>> {
        let key = store_key(name);
        let config: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT config FROM zones WHERE name = ?1", [&key], |row| {
                row.get(0)
            })
            .optional()?;

        config.map(|config| decode(&key, &config)).transpose()
    }

    fn upsert(&self, zone: &ZoneConfig) -> PersistenceResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let count = tx.execute(
            "INSERT OR REPLACE INTO zones (name, config) VALUES (?1, ?2)",
            params![stanza_key(zone), encode(zone)],
        )?;
        expect_rows(count, 1)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, name: &Name) -> PersistenceResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let count = tx.execute("DELETE FROM zones WHERE name = ?1", [store_key(name)])?;
        tx.commit()?;
        Ok(count > 0)
    }

    fn migrate_legacy_format(&self) -> PersistenceResult<usize> {
        if !self.legacy.exists() || self.count()? > 0 {
            return Ok(0);
        }

        let zones = TextZoneStore::open(self.legacy.clone(), &self.view)?.load_all()?;
        Self::insert_all(&mut self.conn.lock(), &zones)?;

        let mut renamed = self.legacy.clone().into_os_string();
        renamed.push("~");
        if let Err(e) = fs::rename(&self.legacy, &renamed) {
            warn!(
                "migrated {} but could not rename it: {e}",
                self.legacy.display()
            );
        }

        info!(
            "migrated {} zones from {} to {}",
            zones.len(),
            self.legacy.display(),
            self.path.display()
        );
        Ok(zones.len())
    }
}

fn expect_rows(got: usize, expect: usize) -> PersistenceResult<()> {
    if got != expect {
        return Err(PersistenceErrorKind::WrongRowCount { got, expect }.into());
    }
    Ok(())
}

/// Renders the stored form: the option map, with `class` when it is not IN
fn encode(zone: &ZoneConfig) -> String {
    let mut stored = ZoneConfig::new(zone.name.clone(), None, zone.options.clone());
    if let Some(class) = &zone.class {
        if !matches!(parse_class(class), Ok(DNSClass::IN)) {
            stored
                .options
                .insert("class", Value::String(class.to_ascii_uppercase()));
        }
    }
    stored.options_inline()
}

fn decode(name: &str, config: &str) -> PersistenceResult<ZoneConfig> {
    let mut zone = ZoneConfig::from_inline(name, None, config).map_err(|e| {
        PersistenceErrorKind::Corrupt {
            zone: name.to_string(),
            reason: e.to_string(),
        }
    })?;

    zone.class = match zone.options.remove("class") {
        Some(Value::String(class)) => Some(class),
        Some(other) => {
            return Err(PersistenceErrorKind::Corrupt {
                zone: name.to_string(),
                reason: format!("class must be a string, found {}", other.type_str()),
            }
            .into());
        }
        None => None,
    };
    Ok(zone)
}
