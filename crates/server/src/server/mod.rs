// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The server context: owner of the production views and everything they share
//!
//! A [`ServerContext`] is created once by the process entry point through a
//! [`ServerBuilder`] and then driven by configuration loads and control commands. The
//! production view list and cache registry are immutable snapshots that a
//! reconfiguration replaces wholesale.

mod catz;
mod dynamic;
mod loading;
mod reload;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::drivers::DriverRegistry;
use crate::error::{ConfigResult, ErrorKind, Result};
use crate::keys::TsigKey;
use crate::proto::rr::DNSClass;
use crate::resolver::DispatchManager;
use crate::rpz::PolicyService;
use crate::store::view_file_stem;
use crate::task::TaskManager;
use crate::view::{View, ViewList};
use crate::zone::{FileZoneLoader, ZoneLoader, ZoneManager};

pub use self::catz::CatzChangeEvent;
pub use self::dynamic::ModifiedZone;
pub use self::loading::LoadMode;
pub use self::reload::count_configured_zones;

/// Configures and creates a [`ServerContext`]
pub struct ServerBuilder {
    config_path: Option<PathBuf>,
    defaults: Option<Config>,
    loader: Arc<dyn ZoneLoader>,
    policy_service: Option<Arc<dyn PolicyService>>,
    drivers: DriverRegistry,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// A builder with the file zone loader and no drivers
    pub fn new() -> Self {
        Self {
            config_path: None,
            defaults: None,
            loader: Arc::new(FileZoneLoader),
            policy_service: None,
            drivers: DriverRegistry::new(),
        }
    }

    /// The configuration file read by [`ServerContext::reload`]
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Replaces the compiled-in defaults
    pub fn defaults(mut self, defaults: Config) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// The loader for zone contents
    pub fn zone_loader(mut self, loader: Arc<dyn ZoneLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// The external response-policy service used when `dnsrps-enable` is set
    pub fn policy_service(mut self, service: Arc<dyn PolicyService>) -> Self {
        self.policy_service = Some(service);
        self
    }

    /// DLZ and dyndb drivers
    pub fn drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    /// Creates the context; no views exist until the first configuration load
    pub fn build(self) -> ConfigResult<ServerContext> {
        let defaults = match self.defaults {
            Some(defaults) => defaults,
            None => Config::defaults()?,
        };
        let (zones_loaded, _) = watch::channel(0);

        Ok(ServerContext {
            inner: Arc::new(ServerInner {
                config_path: self.config_path,
                defaults,
                config: RwLock::new(Arc::new(Config::default())),
                views: ArcSwap::from_pointee(ViewList::default()),
                caches: ArcSwap::from_pointee(CacheRegistry::new()),
                tasks: TaskManager::new(),
                zone_manager: ZoneManager::new(),
                dispatches: DispatchManager::new(),
                loader: self.loader,
                policy_service: self.policy_service,
                drivers: self.drivers,
                session_key: RwLock::new(None),
                zones_loaded,
                load_generation: AtomicU64::new(0),
                catz_events: Mutex::new(None),
            }),
        })
    }
}

pub(crate) struct ServerInner {
    config_path: Option<PathBuf>,
    defaults: Config,
    config: RwLock<Arc<Config>>,
    views: ArcSwap<ViewList>,
    caches: ArcSwap<CacheRegistry>,
    tasks: TaskManager,
    zone_manager: ZoneManager,
    dispatches: DispatchManager,
    loader: Arc<dyn ZoneLoader>,
    policy_service: Option<Arc<dyn PolicyService>>,
    drivers: DriverRegistry,
    session_key: RwLock<Option<Arc<TsigKey>>>,
    zones_loaded: watch::Sender<u64>,
    load_generation: AtomicU64,
    catz_events: Mutex<Option<catz::CatzSender>>,
}

/// The running server
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerInner>,
}

impl ServerContext {
    /// The production views, in match order
    pub fn views(&self) -> Arc<ViewList> {
        self.inner.views.load_full()
    }

    /// The production view with this name and class
    pub fn find_view(&self, name: &str, class: DNSClass) -> Option<Arc<View>> {
        self.inner.views.load().find(name, class).cloned()
    }

    /// The caches of the production views
    pub fn caches(&self) -> Arc<CacheRegistry> {
        self.inner.caches.load_full()
    }

    /// The configuration the production views were built from, including runtime
    /// `modzone` changes to static zones
    pub fn config(&self) -> Arc<Config> {
        self.inner.config.read().clone()
    }

    /// The compiled-in defaults
    pub fn defaults(&self) -> &Config {
        &self.inner.defaults
    }

    /// The exclusive-mode gate and background task tracker
    pub fn tasks(&self) -> &TaskManager {
        &self.inner.tasks
    }

    /// The zone maintenance manager
    pub fn zone_manager(&self) -> &ZoneManager {
        &self.inner.zone_manager
    }

    /// The loader for zone contents
    pub fn loader(&self) -> &Arc<dyn ZoneLoader> {
        &self.inner.loader
    }

    /// The key for local dynamic updates, if one was generated
    pub fn session_key(&self) -> Option<Arc<TsigKey>> {
        self.inner.session_key.read().clone()
    }

    /// The configuration file, if one was given
    pub fn config_path(&self) -> Option<&Path> {
        self.inner.config_path.as_deref()
    }

    /// Waits until the zone loads started by the latest configuration load finished
    pub async fn wait_for_zones_loaded(&self) {
        let target = self
            .inner
            .load_generation
            .load(std::sync::atomic::Ordering::Acquire);
        let mut rx = self.inner.zones_loaded.subscribe();
        if rx.wait_for(|done| *done >= target).await.is_err() {
            debug!("zone load notifier closed");
        }
    }

    /// Waits until all background work (loads, deletions, catalog changes) drained
    pub async fn wait_for_background(&self) {
        self.inner.tasks.wait_idle().await;
    }

    /// Persists runtime state of every view and stops background workers
    ///
    /// Dynamic TSIG keys and negative trust anchors are written next to the other view
    /// state files so the next start can restore them.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.inner.tasks.begin_exclusive().await;
        let directory = self.config().directory(&self.inner.defaults)?;
        save_view_state(&self.views(), &directory);

        self.inner.tasks.shutdown();
        info!("server shut down");
        Ok(())
    }

    /// Finds the single production view for a control command.
    ///
    /// With no view name, the view must be unique for the class.
    pub(crate) fn view_for(&self, name: Option<&str>, class: DNSClass) -> Result<Arc<View>> {
        let views = self.views();
        match name {
            Some(name) => views
                .find(name, class)
                .cloned()
                .ok_or_else(|| ErrorKind::ViewNotFound(name.to_string()).into()),
            None => {
                let mut matching = views.iter().filter(|v| v.class() == class);
                match (matching.next(), matching.next()) {
                    (Some(view), None) => Ok(view.clone()),
                    (None, _) => Err(ErrorKind::ViewNotFound(format!("(any {class} view)")).into()),
                    (Some(_), Some(_)) => Err(ErrorKind::Msg("a view name is required".to_string()).into()),
                }
            }
        }
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("views", &self.inner.views.load().len())
            .field("config_path", &self.inner.config_path)
            .finish_non_exhaustive()
    }
}

/// Writes the dynamic keys and negative trust anchors of `views` to their state files
fn save_view_state(views: &ViewList, directory: &Path) {
    for view in views.iter() {
        let stem = view_file_stem(view.name());
        if let Some(keys) = view.keyring().dynamic().filter(|k| !k.is_empty()) {
            let path = directory.join(format!("{stem}.tsigkeys"));
            if let Err(e) = keys.save(&path) {
                warn!("view {view}: saving dynamic keys to {} failed: {e}", path.display());
            }
        }
        if let Some(ntas) = view.ntas().filter(|n| !n.is_empty()) {
            let path = directory.join(format!("{stem}.nta"));
            if let Err(e) = ntas.save(&path) {
                warn!("view {view}: saving negative trust anchors to {} failed: {e}", path.display());
            }
        }
    }
}
