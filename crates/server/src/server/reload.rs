// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Full reconfiguration
//!
//! A reload builds a complete new set of views next to the production set, then swaps
//! it in under exclusive mode. Nothing observable changes until the swap: a failure
//! while building reverts every zone rebinding made so far and drops the new views.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::loading::LoadMode;
use super::ServerContext;
use crate::acl::AclContext;
use crate::cache::CacheRegistry;
use crate::config::{Config, ConfigMaps, ViewConfig, DEFAULT_VIEW};
use crate::error::{ConfigError, ErrorKind, Result};
use crate::keys::{read_bindkeys, write_session_key, TsigKey};
use crate::proto::rr::{DNSClass, Name};
use crate::store::{count_zones, StoreKind};
use crate::view::{View, ViewBuilder, ViewList, ViewSource};
use crate::zone::Zone;

/// One view to build, in build order
struct PlannedView<'a> {
    name: &'a str,
    class: DNSClass,
    source: ViewSource<'a>,
}

fn plan_views<'a>(config: &'a Config, defaults: &'a Config) -> Result<Vec<PlannedView<'a>>> {
    let mut planned = Vec::with_capacity(config.views.len() + defaults.views.len() + 1);
    for view in &config.views {
        planned.push(PlannedView {
            name: &view.name,
            class: view.class()?,
            source: ViewSource {
                config: Some(view),
                zones: &view.zones,
                builtin: false,
            },
        });
    }

    if config.views.is_empty() {
        planned.push(PlannedView {
            name: DEFAULT_VIEW,
            class: DNSClass::IN,
            source: ViewSource {
                config: None,
                zones: &config.zones,
                builtin: false,
            },
        });
    }

    for view in &defaults.views {
        let class = view.class()?;
        if planned.iter().any(|p| p.name == view.name && p.class == class) {
            debug!("built-in view {} replaced by the configuration", view.name);
            continue;
        }
        planned.push(PlannedView {
            name: &view.name,
            class,
            source: ViewSource {
                config: Some(view),
                zones: &view.zones,
                builtin: true,
            },
        });
    }

    Ok(planned)
}

/// Zones the zone manager should be sized for: every stanza of the user's views plus
/// the zones persisted in their new-zone stores
pub fn count_configured_zones(config: &Config, defaults: &Config, directory: &Path) -> Result<usize> {
    let mut total = 0;
    for planned in plan_views(config, defaults)? {
        if planned.source.builtin {
            continue;
        }
        total += planned.source.zones.len();

        let maps = ConfigMaps::from_optional([
            planned.source.config.map(|v: &ViewConfig| &v.options),
            Some(&config.options),
            Some(&defaults.options),
        ]);
        if !maps.bool_or("allow-new-zones", false)? {
            continue;
        }
        let kind = maps
            .get_str("new-zone-store")?
            .map(StoreKind::from_str)
            .transpose()
            .map_err(|e| ConfigError::invalid("new-zone-store", e))?
            .unwrap_or_default();
        let store_dir = match maps.get_str("new-zones-directory")? {
            Some(dir) => directory.join(dir),
            None => directory.to_path_buf(),
        };
        let persisted = count_zones(kind, &store_dir, planned.name)?;
        debug!("view {}: {persisted} zones in the new-zone store", planned.name);
        total += persisted;
    }
    Ok(total)
}

fn zone_ids(views: &[Arc<View>]) -> HashSet<u64> {
    views
        .iter()
        .flat_map(|v| v.all_zones())
        .flat_map(|z| std::iter::once(z.id()).chain(z.raw().map(|r| r.id())))
        .collect()
}

/// The session key a configuration pass will install once it succeeds
enum SessionKeyPlan {
    Disabled,
    Current(Arc<TsigKey>),
    Generated { key: Arc<TsigKey>, path: PathBuf },
}

impl SessionKeyPlan {
    fn key(&self) -> Option<&Arc<TsigKey>> {
        match self {
            Self::Disabled => None,
            Self::Current(key) | Self::Generated { key, .. } => Some(key),
        }
    }
}

impl ServerContext {
    /// Applies `config`, replacing the production views.
    ///
    /// With `first_time` every zone is loaded, otherwise only zones that are new or
    /// changed.
    pub async fn load_configuration(&self, config: Config, first_time: bool) -> Result<()> {
        let mode = if first_time { LoadMode::All } else { LoadMode::NewOnly };
        self.apply_configuration(config, mode).await
    }

    /// Re-reads the configuration file and reloads every zone
    pub async fn reload(&self) -> Result<()> {
        let config = self.read_config_file()?;
        self.apply_configuration(config, LoadMode::All).await
    }

    /// Re-reads the configuration file, loading only new zones
    pub async fn reconfig(&self) -> Result<()> {
        let config = self.read_config_file()?;
        self.apply_configuration(config, LoadMode::NewOnly).await
    }

    fn read_config_file(&self) -> Result<Config> {
        let path = self
            .inner
            .config_path
            .as_deref()
            .ok_or_else(|| ErrorKind::Msg("no configuration file to reload".to_string()))?;
        info!("loading configuration from {}", path.display());
        Ok(Config::read_config(path)?)
    }

    async fn apply_configuration(&self, config: Config, mode: LoadMode) -> Result<()> {
        let guard = self.inner.tasks.begin_exclusive().await;
        let result = self.swap_configuration(config);
        drop(guard);

        match result {
            Ok(views) => {
                info!("reloading configuration succeeded");
                self.load_zones(&views, mode);
                Ok(())
            }
            Err(e) => {
                error!("reloading configuration failed: {e}");
                Err(e)
            }
        }
    }

    /// Builds and swaps in the views of `config`; must run in exclusive mode
    fn swap_configuration(&self, config: Config) -> Result<Arc<ViewList>> {
        let inner = &self.inner;
        let defaults = &inner.defaults;
        let directory = config.directory(defaults)?;
        let global = ConfigMaps::new([&config.options, &defaults.options]);

        let bindkeys = match global.get_str("bindkeys-file")? {
            Some(file) => read_bindkeys(&directory.join(file))?,
            None => None,
        };
        let session_key = self.plan_session_key(&global, &directory)?;

        let zones = count_configured_zones(&config, defaults, &directory)?;
        inner.zone_manager.set_size(zones);

        let outgoing = inner.views.load_full();
        let acls = AclContext::new(&config.acls);
        let builder = ViewBuilder {
            config: &config,
            defaults,
            acls: &acls,
            outgoing: Some(outgoing.as_ref()),
            zone_manager: &inner.zone_manager,
            dispatches: &inner.dispatches,
            drivers: &inner.drivers,
            policy_service: inner.policy_service.as_deref(),
            session_key: session_key.key(),
            bindkeys: bindkeys.as_deref(),
            directory: &directory,
        };

        let mut caches = CacheRegistry::new();
        let mut built: Vec<Arc<View>> = Vec::new();
        for (i, planned) in plan_views(&config, defaults)?.into_iter().enumerate() {
            let mut view = View::new(planned.name, planned.class);
            if let Err(e) = builder.configure_view(&mut view, planned.source, &built, &mut caches, i == 0) {
                error!("configuring view {view} failed: {e}");
                self.rollback(&outgoing, &built, Some(&view));
                return Err(e);
            }
            view.freeze();
            built.push(Arc::new(view));
        }

        // past this point nothing may fail
        for zone in built.iter().flat_map(|v| v.all_zones()) {
            zone.view_commit();
        }

        let new_ids = zone_ids(&built);
        let views = Arc::new(ViewList::new(built));
        *inner.config.write() = Arc::new(config);
        inner.views.store(Arc::clone(&views));
        inner.caches.store(Arc::new(caches));
        self.install_session_key(session_key);
        super::save_view_state(&views, &directory);

        for entry in inner.caches.load().iter() {
            if entry.needs_flush() {
                info!("flushing cache {}", entry.cache().name());
                entry.cache().flush();
            }
        }

        for zone in outgoing.iter().flat_map(|v| v.all_zones()) {
            if !new_ids.contains(&zone.id()) {
                self.release_zone(&zone);
            }
        }

        Ok(views)
    }

    /// Takes `zone` and its unsigned companion out of maintenance
    pub(super) fn release_zone(&self, zone: &Zone) {
        if let Some(raw) = zone.raw() {
            self.inner.zone_manager.release(&raw);
        }
        self.inner.zone_manager.release(zone);
    }

    /// Undoes the zone rebindings of a failed pass and releases zones created by it
    fn rollback(&self, outgoing: &ViewList, built: &[Arc<View>], partial: Option<&View>) {
        let old_ids = zone_ids(outgoing.as_slice());
        let zones = built
            .iter()
            .flat_map(|v| v.all_zones())
            .chain(partial.into_iter().flat_map(View::all_zones));

        let mut reverted = 0;
        for zone in zones {
            zone.view_revert();
            if !old_ids.contains(&zone.id()) {
                self.release_zone(&zone);
            }
            reverted += 1;
        }
        debug!("rolled back {reverted} zones of {} views", built.len() + usize::from(partial.is_some()));
    }

    /// Works out the session key `maps` asks for without installing it
    fn plan_session_key(&self, maps: &ConfigMaps<'_>, directory: &Path) -> Result<SessionKeyPlan> {
        let file = maps.get_str("session-keyfile")?;
        let Some(file) = file.filter(|f| *f != "none") else {
            return Ok(SessionKeyPlan::Disabled);
        };
        let name = maps.get_str("session-keyname")?.unwrap_or("local-ddns");
        let algorithm = maps.get_str("session-keyalg")?.unwrap_or("hmac-sha256");
        let mut name = Name::from_str(name).map_err(|e| ConfigError::invalid("session-keyname", e))?;
        name.set_fqdn(true);

        let current = self.inner.session_key.read().clone();
        if let Some(current) = current {
            if *current.name() == name && current.algorithm() == algorithm {
                return Ok(SessionKeyPlan::Current(current));
            }
        }

        Ok(SessionKeyPlan::Generated {
            key: Arc::new(TsigKey::generate(name, algorithm)?),
            path: directory.join(file),
        })
    }

    fn install_session_key(&self, plan: SessionKeyPlan) {
        let key = match plan {
            SessionKeyPlan::Disabled => None,
            SessionKeyPlan::Current(key) => Some(key),
            SessionKeyPlan::Generated { key, path } => {
                if let Err(e) = write_session_key(&path, &key) {
                    warn!("could not write session key to {}: {e}", path.display());
                }
                Some(key)
            }
        };
        *self.inner.session_key.write() = key;
    }
}
