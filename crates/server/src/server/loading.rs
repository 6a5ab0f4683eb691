// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{ServerContext, ServerInner};
use crate::view::ViewList;
use crate::zone::Zone;

/// Which zones a configuration load (re)loads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadMode {
    /// Every zone, as on startup and `reload`
    All,
    /// Only zones without loaded contents, as on `reconfig`
    NewOnly,
}

/// Counts outstanding zone loads; the last one to finish reports completion
struct LoadBatch {
    inner: Arc<ServerInner>,
    generation: u64,
    failed: AtomicUsize,
    started: Instant,
}

impl Drop for LoadBatch {
    fn drop(&mut self) {
        self.inner.zone_manager.force_maintenance();
        let failed = self.failed.load(Ordering::Relaxed);
        if failed > 0 {
            warn!("{failed} zones failed to load");
        }
        info!("all zones loaded in {:?}", self.started.elapsed());
        self.inner.zones_loaded.send_replace(self.generation);
    }
}

impl ServerContext {
    /// Starts loading the zones of `views` in the background.
    ///
    /// Built-in zones of each view (managed keys, redirect) load first, in order;
    /// everything else loads concurrently. [`ServerContext::wait_for_zones_loaded`]
    /// returns once all of them finished.
    pub(crate) fn load_zones(&self, views: &ViewList, mode: LoadMode) {
        let generation = self.inner.load_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let batch = Arc::new(LoadBatch {
            inner: Arc::clone(&self.inner),
            generation,
            failed: AtomicUsize::new(0),
            started: Instant::now(),
        });

        let mut seen = HashSet::new();
        let mut builtin = Vec::new();
        let mut zones = Vec::new();
        for view in views.iter() {
            for zone in view.managed_keys().cloned().into_iter().chain(view.redirect()) {
                if seen.insert(zone.id()) {
                    builtin.push(zone);
                }
            }
            for zone in view.zones() {
                if seen.insert(zone.id()) {
                    zones.push(zone);
                }
            }
        }

        let wanted = |zone: &Arc<Zone>| mode == LoadMode::All || !zone.is_loaded();
        builtin.retain(wanted);
        zones.retain(wanted);
        debug!(
            "loading {} built-in and {} other zones ({mode:?})",
            builtin.len(),
            zones.len()
        );

        let loader = Arc::clone(&self.inner.loader);
        let tasks = self.inner.tasks.clone();
        self.inner.tasks.spawn(async move {
            for zone in builtin {
                if zone.load(loader.as_ref()).await.is_err() {
                    batch.failed.fetch_add(1, Ordering::Relaxed);
                }
            }

            for zone in zones {
                let batch = Arc::clone(&batch);
                let loader = Arc::clone(&loader);
                tasks.spawn(async move {
                    if zone.load(loader.as_ref()).await.is_ok() {
                        debug!("zone {zone} loaded");
                    } else {
                        batch.failed.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
    }
}
