// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-view zone table

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::Zone;
use crate::error::{ErrorKind, Result};
use crate::proto::rr::{LowerName, Name};

/// Result of a zone table lookup
#[derive(Clone, Debug)]
pub enum ZoneMatch {
    /// A zone with exactly this origin
    Exact(Arc<Zone>),
    /// The closest enclosing zone
    Partial(Arc<Zone>),
    /// No zone at or above the name
    NotFound,
}

impl ZoneMatch {
    /// The exactly matching zone
    pub fn exact(self) -> Option<Arc<Zone>> {
        match self {
            Self::Exact(zone) => Some(zone),
            _ => None,
        }
    }

    /// The matched zone, exact or enclosing
    pub fn zone(self) -> Option<Arc<Zone>> {
        match self {
            Self::Exact(zone) | Self::Partial(zone) => Some(zone),
            Self::NotFound => None,
        }
    }
}

/// Zones of a view, keyed by origin
#[derive(Clone, Debug, Default)]
pub struct ZoneTable {
    zones: HashMap<LowerName, Arc<Zone>>,
}

impl ZoneTable {
    /// Constructs an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a zone, failing if one with the same origin exists
    pub fn insert(&mut self, zone: Arc<Zone>) -> Result<()> {
        let key = LowerName::new(zone.origin());
        if self.zones.contains_key(&key) {
            return Err(ErrorKind::DuplicateZone(zone.origin().to_string()).into());
        }
        self.zones.insert(key, zone);
        Ok(())
    }

    /// Inserts or replaces the zone with the same origin, returning the replaced one
    pub fn upsert(&mut self, zone: Arc<Zone>) -> Option<Arc<Zone>> {
        self.zones.insert(LowerName::new(zone.origin()), zone)
    }

    /// Removes a zone from the table
    pub fn remove(&mut self, name: &Name) -> Option<Arc<Zone>> {
        self.zones.remove(&LowerName::new(name))
    }

    /// The zone with exactly this origin
    pub fn get(&self, name: &Name) -> Option<Arc<Zone>> {
        self.zones.get(&LowerName::new(name)).cloned()
    }

    /// Searches for the closest zone at or above `name`
    pub fn find(&self, name: &Name) -> ZoneMatch {
        let name = LowerName::new(name);
        if let Some(zone) = self.zones.get(&name) {
            return ZoneMatch::Exact(zone.clone());
        }

        let mut current = name;
        while !current.is_root() {
            current = current.base_name();
            if let Some(zone) = self.zones.get(&current) {
                debug!("found enclosing zone {}", zone.origin());
                return ZoneMatch::Partial(zone.clone());
            }
        }

        ZoneMatch::NotFound
    }

    /// True if a zone with this origin exists
    pub fn contains(&self, name: &Name) -> bool {
        self.zones.contains_key(&LowerName::new(name))
    }

    /// All zones, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }

    /// Number of zones
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// True if the table holds no zone
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::proto::rr::DNSClass;
    use crate::zone::ZoneKind;

    fn zone(name: &str) -> Arc<Zone> {
        Zone::new(Name::from_str(name).unwrap(), DNSClass::IN, ZoneKind::Primary, vec!["rbt".into()])
    }

    #[test]
    fn test_exact_and_partial() {
        let mut table = ZoneTable::new();
        table.insert(zone("example.com.")).unwrap();
        table.insert(zone("sub.example.com.")).unwrap();

        let exact = table.find(&Name::from_str("Example.COM.").unwrap());
        assert!(matches!(exact, ZoneMatch::Exact(_)));

        let partial = table
            .find(&Name::from_str("www.sub.example.com.").unwrap())
            .zone()
            .unwrap();
        assert_eq!(partial.origin(), &Name::from_str("sub.example.com.").unwrap());

        assert!(matches!(
            table.find(&Name::from_str("example.net.").unwrap()),
            ZoneMatch::NotFound
        ));
    }

    #[test]
    fn test_duplicate_insert() {
        let mut table = ZoneTable::new();
        table.insert(zone("example.com.")).unwrap();
        assert!(table.insert(zone("EXAMPLE.com.")).is_err());
        assert_eq!(table.len(), 1);

        let replaced = table.upsert(zone("example.com."));
        assert!(replaced.is_some());
        assert!(table.remove(&Name::from_str("example.com.").unwrap()).is_some());
        assert!(table.is_empty());
    }
}
