// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Zones and their lifecycle
//!
//! A [`Zone`] is shared between the view that serves it, the zone manager and, during
//! a reconfiguration, the outgoing view it may be carried forward from. Its binding to
//! a view is two-phase: [`Zone::set_view`] records the new view while remembering the
//! old one, and the reconfiguration either commits or reverts all bindings at once.

mod configure;
mod loader;
mod manager;
mod options;
mod table;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::ZoneConfig;
use crate::proto::rr::{DNSClass, Name};
use crate::view::ViewId;

pub(crate) use self::configure::{configure_zone, ZoneConfigurer};
pub use self::loader::{FileZoneLoader, LoadError, ZoneLoader};
pub use self::manager::ZoneManager;
pub use self::options::{MasterFormat, NotifyMode, ZoneOptions};
pub(crate) use self::options::{apply_options, options_kind, ZoneLayers};
pub use self::table::{ZoneMatch, ZoneTable};

static NEXT_ZONE_ID: AtomicU64 = AtomicU64::new(1);

/// The kind of a zone object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    /// Authoritative primary
    Primary,
    /// Secondary
    Secondary,
    /// Validated secondary
    Mirror,
    /// Stub
    Stub,
    /// Stub with static servers
    StaticStub,
    /// NXDOMAIN redirection
    Redirect,
    /// The managed-keys zone of a view
    Key,
    /// A zone backed by a dynamically loadable database
    Dlz,
}

impl ZoneKind {
    /// Lower case name, as used in configuration
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Mirror => "mirror",
            Self::Stub => "stub",
            Self::StaticStub => "static-stub",
            Self::Redirect => "redirect",
            Self::Key => "key",
            Self::Dlz => "dlz",
        }
    }

    /// True for zones whose content comes from transfers
    pub fn is_secondary(self) -> bool {
        matches!(self, Self::Secondary | Self::Mirror | Self::Stub)
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the loaded contents of a zone came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbSource {
    /// A zone file
    File(std::path::PathBuf),
    /// A built-in database, e.g. `version` or `empty`
    Builtin(String),
    /// A dynamically loadable database instance
    Dlz(String),
    /// Nothing yet; awaiting the first transfer
    AwaitingTransfer,
}

/// Loaded zone contents
#[derive(Clone, Debug)]
pub struct ZoneDb {
    /// Content source
    pub source: DbSource,
    /// Number of records read
    pub records: usize,
    /// SOA serial if known
    pub serial: Option<u32>,
    /// Load time
    pub loaded_at: OffsetDateTime,
}

impl ZoneDb {
    /// Contents from `source` loaded now
    pub fn new(source: DbSource, records: usize, serial: Option<u32>) -> Self {
        Self {
            source,
            records,
            serial,
            loaded_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Operations queued for the zone maintenance machinery
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZoneOp {
    /// SOA check against the primaries
    Refresh,
    /// Full transfer, discarding the journal
    Retransfer,
    /// Send NOTIFY to secondaries
    Notify,
    /// Write the journal into the zone file
    Sync,
    /// Re-sign with current keys
    Rekey,
    /// Re-read member zones of a catalog zone
    CatzRescan,
}

#[derive(Debug, Default)]
struct ZoneState {
    view: Option<ViewId>,
    prev_view: Option<ViewId>,
    raw: Option<Arc<Zone>>,
    rpz_num: Option<usize>,
    catz: bool,
    parent_catz: Option<Name>,
    added: bool,
    automatic: bool,
    options: Arc<ZoneOptions>,
    config: Option<ZoneConfig>,
    db: Option<ZoneDb>,
    frozen: bool,
    pending: Vec<ZoneOp>,
}

/// A zone object
pub struct Zone {
    id: u64,
    origin: Name,
    class: DNSClass,
    kind: ZoneKind,
    db_args: Vec<String>,
    is_raw: bool,
    state: Mutex<ZoneState>,
}

impl Zone {
    /// A new, unloaded zone that is not bound to any view
    pub fn new(origin: Name, class: DNSClass, kind: ZoneKind, db_args: Vec<String>) -> Arc<Self> {
        Self::build(origin, class, kind, db_args, false)
    }

    /// The unsigned companion of an inline-signing zone
    pub fn new_raw(secure: &Self) -> Arc<Self> {
        Self::build(
            secure.origin.clone(),
            secure.class,
            secure.kind,
            secure.db_args.clone(),
            true,
        )
    }

    fn build(origin: Name, class: DNSClass, kind: ZoneKind, db_args: Vec<String>, is_raw: bool) -> Arc<Self> {
        let zone = Arc::new(Self {
            id: NEXT_ZONE_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            class,
            kind,
            db_args,
            is_raw,
            state: Mutex::new(ZoneState::default()),
        });
        debug!("created zone {zone}");
        zone
    }

    /// Unique id of this zone object
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The zone origin
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// The zone class
    pub fn class(&self) -> DNSClass {
        self.class
    }

    /// The zone kind
    pub fn kind(&self) -> ZoneKind {
        self.kind
    }

    /// Database type and arguments, e.g. `["rbt"]` or `["_builtin", "version"]`
    pub fn db_args(&self) -> &[String] {
        &self.db_args
    }

    /// True for zones served from a built-in database
    pub fn is_builtin(&self) -> bool {
        self.db_args.first().map(String::as_str) == Some("_builtin")
    }

    /// True for the unsigned half of an inline-signing pair
    pub fn is_raw(&self) -> bool {
        self.is_raw
    }

    /// The committed or pending view binding
    pub fn view(&self) -> Option<ViewId> {
        self.state.lock().view.clone()
    }

    /// Binds the zone to `view`, remembering the previous binding for [`Self::view_revert`]
    pub fn set_view(&self, view: &ViewId) {
        let mut state = self.state.lock();
        if state.prev_view.is_none() {
            state.prev_view = state.view.take();
        }
        state.view = Some(view.clone());
        if let Some(raw) = &state.raw {
            raw.set_view(view);
        }
    }

    /// Makes the current binding permanent
    pub fn view_commit(&self) {
        let mut state = self.state.lock();
        state.prev_view = None;
        if let Some(raw) = &state.raw {
            raw.view_commit();
        }
    }

    /// Restores the binding that was active before [`Self::set_view`]
    pub fn view_revert(&self) {
        let mut state = self.state.lock();
        if let Some(prev) = state.prev_view.take() {
            state.view = Some(prev);
        }
        if let Some(raw) = &state.raw {
            raw.view_revert();
        }
    }

    /// The raw companion of an inline-signing zone
    pub fn raw(&self) -> Option<Arc<Self>> {
        self.state.lock().raw.clone()
    }

    pub(crate) fn set_raw(&self, raw: Option<Arc<Self>>) {
        self.state.lock().raw = raw;
    }

    /// The response-policy zone number this zone is bound to
    pub fn rpz_num(&self) -> Option<usize> {
        self.state.lock().rpz_num
    }

    pub(crate) fn set_rpz_num(&self, num: Option<usize>) {
        self.state.lock().rpz_num = num;
    }

    /// True if this zone is itself a configured catalog zone
    pub fn is_catz(&self) -> bool {
        self.state.lock().catz
    }

    pub(crate) fn set_catz(&self, catz: bool) {
        self.state.lock().catz = catz;
    }

    /// The catalog zone this zone is a member of
    pub fn parent_catz(&self) -> Option<Name> {
        self.state.lock().parent_catz.clone()
    }

    pub(crate) fn set_parent_catz(&self, catz: Option<Name>) {
        self.state.lock().parent_catz = catz;
    }

    /// True if the zone was added at runtime rather than configured statically
    pub fn is_added(&self) -> bool {
        self.state.lock().added
    }

    pub(crate) fn set_added(&self, added: bool) {
        self.state.lock().added = added;
    }

    /// True for automatically created empty zones
    pub fn is_automatic(&self) -> bool {
        self.state.lock().automatic
    }

    pub(crate) fn set_automatic(&self, automatic: bool) {
        self.state.lock().automatic = automatic;
    }

    /// The detailed options currently applied
    pub fn options(&self) -> Arc<ZoneOptions> {
        self.state.lock().options.clone()
    }

    pub(crate) fn set_options(&self, options: ZoneOptions) {
        self.state.lock().options = Arc::new(options);
    }

    /// The stanza the zone was last configured from
    pub fn config(&self) -> Option<ZoneConfig> {
        self.state.lock().config.clone()
    }

    pub(crate) fn set_config(&self, config: Option<ZoneConfig>) {
        self.state.lock().config = config;
    }

    /// True if zone contents are loaded
    pub fn is_loaded(&self) -> bool {
        self.state.lock().db.is_some()
    }

    /// The loaded contents
    pub fn db(&self) -> Option<ZoneDb> {
        self.state.lock().db.clone()
    }

    /// Drops the loaded contents; the zone is no longer served
    pub fn unload(&self) {
        if self.state.lock().db.take().is_some() {
            info!("zone {self}: unloaded");
        }
    }

    /// True if the zone accepts dynamic updates
    pub fn is_dynamic(&self) -> bool {
        let options = self.options();
        options.update_policy || options.allow_update.as_ref().is_some_and(|acl| !acl.is_none())
    }

    /// True while dynamic updates are suspended
    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        self.state.lock().frozen = frozen;
    }

    /// Queues a maintenance operation
    pub fn request(&self, op: ZoneOp) {
        debug!("zone {self}: {op:?} queued");
        self.state.lock().pending.push(op);
    }

    /// Number of queued operations of the given kind
    pub fn pending(&self, op: ZoneOp) -> usize {
        self.state.lock().pending.iter().filter(|o| **o == op).count()
    }

    pub(crate) fn take_pending(&self) -> Vec<ZoneOp> {
        std::mem::take(&mut self.state.lock().pending)
    }

    /// Loads the zone contents
    ///
    /// Built-in and DLZ databases are available immediately; everything else goes
    /// through `loader`. The raw companion of an inline-signing zone is loaded first.
    pub async fn load(&self, loader: &dyn ZoneLoader) -> Result<(), LoadError> {
        if let Some(raw) = self.raw() {
            raw.load_db(loader).await?;
        }
        self.load_db(loader).await
    }

    async fn load_db(&self, loader: &dyn ZoneLoader) -> Result<(), LoadError> {
        let db = match self.db_args.first().map(String::as_str) {
            Some("_builtin") => ZoneDb::new(DbSource::Builtin(self.db_args[1..].join(" ")), 0, None),
            Some("dlz") => ZoneDb::new(DbSource::Dlz(self.db_args[1..].join(" ")), 0, None),
            _ => {
                let options = self.options();
                match loader.load(self, &options).await {
                    Ok(db) => db,
                    Err(e) => {
                        warn!("zone {self}: loading failed: {e}");
                        return Err(e);
                    }
                }
            }
        };

        if db.source == DbSource::AwaitingTransfer {
            self.request(ZoneOp::Refresh);
        }
        debug!("zone {self}: loaded {} records", db.records);
        self.state.lock().db = Some(db);
        Ok(())
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.class)?;
        if let Some(view) = &self.state.lock().view {
            write!(f, "/{}", view.name())?;
        }
        if self.is_raw {
            f.write_str(" (unsigned)")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("class", &self.class)
            .field("kind", &self.kind)
            .field("db_args", &self.db_args)
            .finish()
    }
}
