// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Zones added, changed and removed at runtime
//!
//! Each operation runs in exclusive mode, so it never interleaves with a reload, a
//! catalog zone change or another of these operations.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ServerContext;
use crate::acl::AclContext;
use crate::config::{Config, ZoneConfig, ZoneTypeConfig};
use crate::error::{ErrorKind, Result};
use crate::proto::rr::{DNSClass, Name};
use crate::store::ZoneStore;
use crate::view::View;
use crate::zone::{configure_zone, Zone, ZoneConfigurer, ZoneKind, ZoneMatch};

/// What `modzone` changed
#[derive(Debug)]
pub struct ModifiedZone {
    /// The zone now serving the name
    pub zone: Arc<Zone>,
    /// True if the zone was configured statically, so the change is lost on the next
    /// reconfiguration unless the configuration file is edited as well
    pub static_config: bool,
}

fn check_dynamic_type(stanza: &ZoneConfig) -> Result<()> {
    if stanza.in_view().is_some() {
        return Err(ErrorKind::UnsupportedZoneType {
            zone: stanza.name.clone(),
            zone_type: "in-view".to_string(),
        }
        .into());
    }

    let zone_type = stanza
        .zone_type()?
        .ok_or_else(|| ErrorKind::MissingType(stanza.name.clone()))?;
    if matches!(
        zone_type,
        ZoneTypeConfig::Hint | ZoneTypeConfig::Forward | ZoneTypeConfig::DelegationOnly
    ) {
        return Err(ErrorKind::UnsupportedZoneType {
            zone: stanza.name.clone(),
            zone_type: zone_type.as_str().to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_not_fixed(zone: &Zone) -> Result<()> {
    let reason = if zone.is_builtin() {
        "is a built-in zone"
    } else if zone.kind() == ZoneKind::Key {
        "is a managed-keys zone"
    } else if zone.parent_catz().is_some() {
        "is a catalog zone member and must be changed through its catalog zone"
    } else {
        return Ok(());
    };

    Err(ErrorKind::NotDynamicZone {
        zone: zone.origin().to_string(),
        reason: reason.to_string(),
    }
    .into())
}

fn writable_store(view: &View) -> Result<Arc<dyn ZoneStore>> {
    let store = view
        .store()
        .cloned()
        .ok_or_else(|| ErrorKind::NewZonesNotAllowed(view.name().to_string()))?;
    store
        .check_writable()
        .map_err(|source| ErrorKind::PersistenceUnwritable {
            view: view.name().to_string(),
            source,
        })?;
    Ok(store)
}

impl ServerContext {
    /// Resolves the zone named by a control command.
    ///
    /// Without a view name the zone must exist in exactly one view of `class`.
    pub fn zone_from_args(
        &self,
        name: &Name,
        class: DNSClass,
        view: Option<&str>,
    ) -> Result<(Arc<View>, Arc<Zone>)> {
        if let Some(view_name) = view {
            let view = self
                .find_view(view_name, class)
                .ok_or_else(|| ErrorKind::ViewNotFound(view_name.to_string()))?;
            return match view.find_zone(name) {
                ZoneMatch::Exact(zone) => Ok((view, zone)),
                ZoneMatch::Partial(_) => Err(ErrorKind::PartialMatch(name.to_string()).into()),
                ZoneMatch::NotFound => Err(ErrorKind::ZoneNotFound(name.to_string()).into()),
            };
        }

        let views = self.views();
        let mut found = None;
        for view in views.iter().filter(|v| v.class() == class) {
            if let Some(zone) = view.zone(name) {
                if found.is_some() {
                    return Err(ErrorKind::MultipleViewsMatched(name.to_string()).into());
                }
                found = Some((view.clone(), zone));
            }
        }
        found.ok_or_else(|| ErrorKind::ZoneNotFound(name.to_string()).into())
    }

    pub(super) fn with_configurer<T>(
        &self,
        config: &Config,
        view: &View,
        f: impl FnOnce(&ZoneConfigurer<'_>) -> Result<T>,
    ) -> Result<T> {
        let directory = config.directory(&self.inner.defaults)?;
        let acls = AclContext::new(&config.acls);
        let views = self.views();
        let cfg = ZoneConfigurer {
            view,
            view_options: config.view(view.name()).map(|v| &v.options),
            global: Some(&config.options),
            defaults: &self.inner.defaults.options,
            outgoing: None,
            configured: views.as_slice(),
            acls: &acls,
            zone_manager: &self.inner.zone_manager,
            directory: &directory,
            old_rpz_ok: false,
        };

        view.thaw();
        let result = f(&cfg);
        view.freeze();
        result
    }

    /// Adds a zone to a running view and persists it once it loaded.
    ///
    /// A zone that fails to load is removed again and nothing is persisted. A zone that
    /// loaded but could not be persisted stays in service.
    pub async fn add_zone(&self, stanza: ZoneConfig, view: Option<&str>) -> Result<Arc<Zone>> {
        let origin = stanza.origin()?;
        let class = stanza.class_or(DNSClass::IN)?;
        let _guard = self.inner.tasks.begin_exclusive().await;
        let view = self.view_for(view, class)?;

        if !view.allow_new_zones() {
            return Err(ErrorKind::NewZonesNotAllowed(view.name().to_string()).into());
        }
        check_dynamic_type(&stanza)?;
        if let ZoneMatch::Exact(_) = view.find_zone(&origin) {
            return Err(ErrorKind::ZoneAlreadyExists(stanza.name.clone()).into());
        }
        let store = writable_store(&view)?;

        let config = self.config();
        let zone = self
            .with_configurer(&config, &view, |cfg| configure_zone(cfg, &stanza, true, false))?
            .ok_or_else(|| ErrorKind::UnsupportedZoneType {
                zone: stanza.name.clone(),
                zone_type: "pseudo".to_string(),
            })?;
        zone.view_commit();

        if let Err(e) = zone.load(self.inner.loader.as_ref()).await {
            self.discard_zone(&view, &zone);
            return Err(ErrorKind::LoadFailed {
                zone: stanza.name.clone(),
                reason: e.to_string(),
            }
            .into());
        }

        if let Err(e) = store.upsert(&stanza) {
            warn!("zone {zone} added but not persisted to {}: {e}", store.path().display());
        }
        info!("zone added: {zone}");
        Ok(zone)
    }

    /// Reconfigures an existing zone from a new stanza and reloads it.
    ///
    /// The stored record is replaced in one step; if that fails the old record stays and
    /// the change is lost on restart. A reload failure leaves the new configuration in
    /// place with the zone unloaded; it must then be restored with `addzone`.
    pub async fn modify_zone(&self, stanza: ZoneConfig, view: Option<&str>) -> Result<ModifiedZone> {
        let origin = stanza.origin()?;
        let class = stanza.class_or(DNSClass::IN)?;
        let _guard = self.inner.tasks.begin_exclusive().await;
        let view = self.view_for(view, class)?;

        if !view.allow_new_zones() {
            return Err(ErrorKind::NewZonesNotAllowed(view.name().to_string()).into());
        }
        let old = match view.find_zone(&origin) {
            ZoneMatch::Exact(zone) => zone,
            _ => return Err(ErrorKind::ZoneNotFound(stanza.name.clone()).into()),
        };
        check_not_fixed(&old)?;
        check_dynamic_type(&stanza)?;

        let added = old.is_added();
        let store = if added { Some(writable_store(&view)?) } else { None };

        let config = self.config();
        let zone = self
            .with_configurer(&config, &view, |cfg| configure_zone(cfg, &stanza, added, true))?
            .ok_or_else(|| ErrorKind::UnsupportedZoneType {
                zone: stanza.name.clone(),
                zone_type: "pseudo".to_string(),
            })?;
        zone.view_commit();
        if !Arc::ptr_eq(&old, &zone) {
            debug!("zone {zone} replaced by a new zone object");
            old.unload();
            self.release_zone(&old);
        }

        match &store {
            Some(store) => {
                if let Err(e) = store.upsert(&stanza) {
                    warn!("zone {zone} modified but not persisted to {}: {e}", store.path().display());
                }
            }
            None => {
                let mut config = (*config).clone();
                if let Some(zones) = config.zones_of_mut(view.name()) {
                    match zones.iter_mut().find(|z| z.origin().is_ok_and(|o| o == origin)) {
                        Some(entry) => *entry = stanza.clone(),
                        None => zones.push(stanza.clone()),
                    }
                }
                *self.inner.config.write() = Arc::new(config);
                warn!(
                    "zone {zone} was configured statically; the change is lost on the next \
                     reconfiguration unless the configuration file is updated"
                );
            }
        }

        if let Err(e) = zone.load(self.inner.loader.as_ref()).await {
            warn!("zone {zone} failed to reload after modzone: {e}");
            zone.unload();
            return Err(ErrorKind::ZoneUnmounted(stanza.name.clone()).into());
        }

        info!("zone modified: {zone}");
        Ok(ModifiedZone {
            zone,
            static_config: !added,
        })
    }

    /// Takes a zone out of service.
    ///
    /// The zone leaves the view immediately; unloading, file removal with `clean` and the
    /// persistent deletion happen in the background.
    pub async fn delete_zone(
        &self,
        name: &Name,
        class: DNSClass,
        view: Option<&str>,
        clean: bool,
    ) -> Result<Arc<Zone>> {
        let guard = self.inner.tasks.begin_exclusive().await;
        let (view, zone) = self.zone_from_args(name, class, view)?;

        if zone.rpz_num().is_some() {
            return Err(ErrorKind::NotDynamicZone {
                zone: name.to_string(),
                reason: "is a response policy zone and cannot be deleted".to_string(),
            }
            .into());
        }
        check_not_fixed(&zone)?;

        let added = zone.is_added();
        let store = if added { Some(writable_store(&view)?) } else { None };
        unmount(&view, &zone);
        drop(guard);
        info!("zone {zone} scheduled for removal");

        let server = self.clone();
        let removed = Arc::clone(&zone);
        self.inner.tasks.spawn(async move {
            let _guard = server.inner.tasks.begin_exclusive().await;
            removed.unload();
            if clean {
                clean_files(&removed);
            }

            let origin = removed.origin().clone();
            let replaced = server
                .find_view(view.name(), view.class())
                .is_some_and(|current| current.zone(&origin).is_some());
            match store {
                Some(_) if replaced => debug!("zone {origin} was re-added, keeping its record"),
                Some(store) => match store.delete(&origin) {
                    Ok(true) => debug!("zone {origin} removed from {}", store.path().display()),
                    Ok(false) => warn!("zone {origin} was not in {}", store.path().display()),
                    Err(e) => warn!("zone {origin}: removing the stored record failed: {e}"),
                },
                None => {
                    let mut config = (*server.config()).clone();
                    if let Some(zones) = config.zones_of_mut(view.name()) {
                        zones.retain(|z| z.origin().map_or(true, |o| o != origin));
                    }
                    *server.inner.config.write() = Arc::new(config);
                    warn!(
                        "zone {origin} was configured statically and returns on the next \
                         reconfiguration unless it is removed from the configuration file"
                    );
                }
            }

            server.release_zone(&removed);
            info!("zone deleted: {origin}");
        });

        Ok(zone)
    }

    /// Drops a zone that never made it into service, with its unsigned companion
    pub(super) fn discard_zone(&self, view: &View, zone: &Zone) {
        zone.unload();
        if let Some(raw) = zone.raw() {
            raw.unload();
        }
        unmount(view, zone);
        self.release_zone(zone);
    }

    /// The configuration a zone is currently served with, as `zone "<name>" { ... };`
    pub fn show_zone(&self, name: &Name, class: DNSClass, view: Option<&str>) -> Result<String> {
        let (view, zone) = self.zone_from_args(name, class, view)?;

        let stanza = if zone.is_added() {
            match view.store() {
                Some(store) => store.get(name)?,
                None => None,
            }
            .or_else(|| zone.config())
        } else {
            zone.config()
                .or_else(|| self.config().find_zone(view.name(), name).cloned())
        };

        stanza
            .map(|s| s.to_stanza())
            .ok_or_else(|| {
                ErrorKind::NotDynamicZone {
                    zone: name.to_string(),
                    reason: "has no configuration".to_string(),
                }
                .into()
            })
    }
}

pub(super) fn unmount(view: &View, zone: &Zone) {
    if zone.kind() == ZoneKind::Redirect {
        view.set_redirect(None);
    } else {
        view.remove_zone(zone.origin());
    }
}

pub(super) fn clean_files(zone: &Zone) {
    let options = zone.options();
    for path in options.path.iter().chain(&options.journal) {
        match std::fs::remove_file(path) {
            Ok(()) => info!("zone {zone}: removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => warn!("zone {zone}: removing {} failed: {e}", path.display()),
        }
    }
}
