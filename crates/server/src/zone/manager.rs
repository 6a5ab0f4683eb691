// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Zone, ZoneOp};

/// Tracks every zone that takes part in maintenance (refresh, notify, key rolls)
#[derive(Debug, Default)]
pub struct ZoneManager {
    zones: Mutex<HashMap<u64, Weak<Zone>>>,
    pool_size: AtomicUsize,
    maintenance_runs: AtomicU64,
}

impl ZoneManager {
    /// A manager with no zones
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the task and memory pools for the expected number of zones
    pub fn set_size(&self, zones: usize) {
        let old = self.pool_size.swap(zones, Ordering::Relaxed);
        if old != zones {
            debug!("zone manager sized for {zones} zones (was {old})");
        }
    }

    /// The size last passed to [`Self::set_size`]
    pub fn size(&self) -> usize {
        self.pool_size.load(Ordering::Relaxed)
    }

    /// Starts managing `zone`; managing a zone twice is harmless
    pub fn manage(&self, zone: &Arc<Zone>) {
        self.zones.lock().insert(zone.id(), Arc::downgrade(zone));
    }

    /// Stops managing `zone`
    pub fn release(&self, zone: &Zone) {
        if self.zones.lock().remove(&zone.id()).is_some() {
            debug!("zone {zone} released from maintenance");
        }
    }

    /// True if `zone` is managed
    pub fn is_managed(&self, zone: &Zone) -> bool {
        self.zones.lock().contains_key(&zone.id())
    }

    /// Number of managed zones that are still alive
    pub fn managed_count(&self) -> usize {
        let mut zones = self.zones.lock();
        zones.retain(|_, z| z.strong_count() > 0);
        zones.len()
    }

    /// Queues a key-maintenance pass for `zone`
    pub fn schedule_rekey(&self, zone: &Zone) {
        zone.request(ZoneOp::Rekey);
    }

    /// Runs one maintenance pass over every managed zone, returning how many zones had
    /// queued operations
    pub fn force_maintenance(&self) -> usize {
        let zones = {
            let mut zones = self.zones.lock();
            zones.retain(|_, z| z.strong_count() > 0);
            zones.values().filter_map(Weak::upgrade).collect::<Vec<_>>()
        };

        let mut busy = 0;
        for zone in zones {
            let ops = zone.take_pending();
            if !ops.is_empty() {
                debug!("zone {zone}: running {ops:?}");
                busy += 1;
            }
        }

        let run = self.maintenance_runs.fetch_add(1, Ordering::Relaxed) + 1;
        info!("zone maintenance pass {run}: {busy} zones with queued work");
        busy
    }

    /// Number of maintenance passes run so far
    pub fn maintenance_runs(&self) -> u64 {
        self.maintenance_runs.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::proto::rr::{DNSClass, Name};
    use crate::zone::ZoneKind;

    #[test]
    fn test_manage_release() {
        let mgr = ZoneManager::new();
        let zone = Zone::new(Name::from_str("example.com.").unwrap(), DNSClass::IN, ZoneKind::Primary, vec![]);

        mgr.manage(&zone);
        mgr.manage(&zone);
        assert_eq!(mgr.managed_count(), 1);
        assert!(mgr.is_managed(&zone));

        mgr.release(&zone);
        assert_eq!(mgr.managed_count(), 0);
    }

    #[test]
    fn test_dropped_zones_are_forgotten() {
        let mgr = ZoneManager::new();
        let zone = Zone::new(Name::from_str("gone.test.").unwrap(), DNSClass::IN, ZoneKind::Primary, vec![]);
        mgr.manage(&zone);
        drop(zone);
        assert_eq!(mgr.managed_count(), 0);
    }

    #[test]
    fn test_maintenance_drains_queue() {
        let mgr = ZoneManager::new();
        let zone = Zone::new(Name::from_str("example.org.").unwrap(), DNSClass::IN, ZoneKind::Primary, vec![]);
        mgr.manage(&zone);
        mgr.schedule_rekey(&zone);

        assert_eq!(mgr.force_maintenance(), 1);
        assert_eq!(zone.pending(ZoneOp::Rekey), 0);
        assert_eq!(mgr.force_maintenance(), 0);
        assert_eq!(mgr.maintenance_runs(), 2);
    }
}
