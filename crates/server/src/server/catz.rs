// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, warn};

use super::dynamic::{clean_files, unmount};
use super::{ServerContext, ServerInner};
use crate::catz::{CatalogZone, CatzAction, CatzEntry};
use crate::error::{ErrorKind, Result};
use crate::proto::rr::Name;
use crate::view::View;
use crate::zone::configure_zone;

/// One member change of a catalog zone
///
/// The event owns its view and catalog; applying it never touches a view that was
/// replaced by a reconfiguration in the meantime.
#[derive(Debug)]
pub struct CatzChangeEvent {
    /// What happened to the member
    pub action: CatzAction,
    /// The member as now listed, or as last listed for deletions
    pub entry: CatzEntry,
    /// The catalog listing it
    pub catalog: Arc<CatalogZone>,
    /// The view serving the catalog
    pub view: Arc<View>,
}

pub(super) type CatzSender = mpsc::UnboundedSender<(CatzChangeEvent, TaskTrackerToken)>;

async fn catz_worker(
    server: Weak<ServerInner>,
    mut events: mpsc::UnboundedReceiver<(CatzChangeEvent, TaskTrackerToken)>,
) {
    while let Some((event, _token)) = events.recv().await {
        let Some(inner) = server.upgrade() else {
            break;
        };
        let server = ServerContext { inner };
        let (action, member, catalog) = (event.action, event.entry.name.clone(), event.catalog.origin().clone());
        if let Err(e) = server.apply_catz_event(event).await {
            warn!("catalog zone {catalog}: {action} of member {member} failed: {e}");
        }
    }
    debug!("catalog zone worker stopped");
}

impl ServerContext {
    /// Queues a catalog member change; changes are applied one at a time, in order
    pub fn post_catz_event(&self, event: CatzChangeEvent) {
        let token = self.inner.tasks.token();
        let mut sender = self.inner.catz_events.lock();
        let tx = sender.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(catz_worker(Arc::downgrade(&self.inner), rx));
            tx
        });
        if tx.send((event, token)).is_err() {
            warn!("catalog zone worker is gone, dropping change");
        }
    }

    /// Replaces the member list of the catalog zone `catalog` in `view` and queues the
    /// resulting changes, returning how many there were
    pub fn update_catalog(&self, view: &Arc<View>, catalog: &Name, members: Vec<CatzEntry>) -> Result<usize> {
        let catz = view
            .catz()
            .and_then(|c| c.get(catalog))
            .cloned()
            .ok_or_else(|| ErrorKind::ZoneNotFound(catalog.to_string()))?;

        let changes = catz.update(members);
        let count = changes.len();
        for (action, entry) in changes {
            self.post_catz_event(CatzChangeEvent {
                action,
                entry,
                catalog: Arc::clone(&catz),
                view: Arc::clone(view),
            });
        }
        Ok(count)
    }

    async fn apply_catz_event(&self, event: CatzChangeEvent) -> Result<()> {
        let _guard = self.inner.tasks.begin_exclusive().await;
        let CatzChangeEvent {
            action,
            entry,
            catalog,
            view,
        } = event;

        let current = self.find_view(view.name(), view.class());
        if !current.is_some_and(|v| Arc::ptr_eq(&v, &view)) {
            debug!("view {view} was reconfigured, ignoring catalog change for {}", entry.name);
            return Ok(());
        }

        let origin = catalog.origin();
        let existing = view.zone(&entry.name);
        let owned = existing
            .as_ref()
            .is_some_and(|z| z.is_added() && z.parent_catz().as_ref() == Some(origin));

        match action {
            CatzAction::Add if existing.is_some() => {
                return Err(ErrorKind::ZoneAlreadyExists(entry.name.to_string()).into());
            }
            CatzAction::Modify | CatzAction::Delete if !owned => {
                return Err(ErrorKind::NotDynamicZone {
                    zone: entry.name.to_string(),
                    reason: format!("is not a member of catalog zone {origin}"),
                }
                .into());
            }
            CatzAction::Delete => {
                if let Some(zone) = existing {
                    zone.unload();
                    if catalog.member_file(&entry.name).is_some() {
                        clean_files(&zone);
                    }
                    unmount(&view, &zone);
                    self.release_zone(&zone);
                    info!("catalog zone {origin}: member {zone} deleted");
                }
                return Ok(());
            }
            CatzAction::Add | CatzAction::Modify => (),
        }

        let modify = action == CatzAction::Modify;
        let stanza = catalog.zone_config(&entry, view.class());
        let config = self.config();
        let zone = self
            .with_configurer(&config, &view, |cfg| configure_zone(cfg, &stanza, true, modify))?
            .ok_or_else(|| ErrorKind::ZoneNotFound(entry.name.to_string()))?;
        zone.view_commit();
        if let Some(old) = existing.filter(|old| !Arc::ptr_eq(old, &zone)) {
            debug!("catalog zone {origin}: member {zone} replaced by a new zone object");
            old.unload();
            self.release_zone(&old);
        }

        if let Err(e) = zone.load(self.inner.loader.as_ref()).await {
            self.discard_zone(&view, &zone);
            return Err(ErrorKind::LoadFailed {
                zone: entry.name.to_string(),
                reason: e.to_string(),
            }
            .into());
        }

        zone.set_added(true);
        zone.set_parent_catz(Some(origin.clone()));
        info!("catalog zone {origin}: member {zone} {}", if modify { "modified" } else { "added" });
        Ok(())
    }
}
