// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Catalog zones
//!
//! A catalog zone lists member zones that every consumer should serve as secondaries.
//! When a catalog changes, the difference against the previously known members is
//! turned into [`CatzChangeEvent`](crate::server::CatzChangeEvent)s, which the server applies one at a time under
//! exclusive mode.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use toml::Value;
use tracing::{debug, info};

use crate::config::maps::value_to_sockaddrs;
use crate::config::{ConfigMaps, OptionMap, ZoneConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::proto::rr::{DNSClass, LowerName, Name};

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogZonesConfig {
    zones: Vec<CatalogZoneConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct CatalogZoneConfig {
    zone: String,
    #[serde(default, alias = "default-masters")]
    default_primaries: Option<Value>,
    zone_directory: Option<PathBuf>,
    #[serde(default)]
    in_memory: bool,
    #[serde(default = "default_min_update_interval")]
    min_update_interval: u32,
}

fn default_min_update_interval() -> u32 {
    5
}

/// Consumer settings of one catalog zone
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatzOptions {
    /// Primaries for members that do not name their own
    pub default_primaries: Vec<SocketAddr>,
    /// Where member zone files are written
    pub zone_directory: Option<PathBuf>,
    /// Keep member zones in memory only
    pub in_memory: bool,
    /// Minimum seconds between catalog updates
    pub min_update_interval: u32,
}

/// A member zone as listed in a catalog
#[derive(Clone, Debug, PartialEq)]
pub struct CatzEntry {
    /// Member zone origin
    pub name: Name,
    /// Member-specific primaries
    pub primaries: Vec<SocketAddr>,
    /// Extra zone options such as `allow-query`
    pub options: OptionMap,
}

impl CatzEntry {
    /// A member with no specific settings
    pub fn new(name: Name) -> Self {
        Self {
            name,
            primaries: Vec::new(),
            options: OptionMap::new(),
        }
    }
}

/// What happened to a member
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatzAction {
    /// New member
    Add,
    /// Member with changed settings
    Modify,
    /// Member removed from the catalog
    Delete,
}

impl fmt::Display for CatzAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "delete",
        })
    }
}

/// One configured catalog zone and its known members
#[derive(Debug)]
pub struct CatalogZone {
    origin: Name,
    options: CatzOptions,
    members: Mutex<BTreeMap<LowerName, CatzEntry>>,
}

impl CatalogZone {
    /// The catalog zone origin
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Consumer settings
    pub fn options(&self) -> &CatzOptions {
        &self.options
    }

    /// Known members
    pub fn members(&self) -> Vec<CatzEntry> {
        self.members.lock().values().cloned().collect()
    }

    /// True if `name` is a known member
    pub fn has_member(&self, name: &Name) -> bool {
        self.members.lock().contains_key(&LowerName::new(name))
    }

    /// Replaces the member list, returning the changes in add, modify, delete order
    pub fn update(&self, entries: Vec<CatzEntry>) -> Vec<(CatzAction, CatzEntry)> {
        let new = entries
            .into_iter()
            .map(|e| (LowerName::new(&e.name), e))
            .collect::<BTreeMap<_, _>>();
        let mut members = self.members.lock();

        let mut changes = Vec::new();
        for (key, entry) in &new {
            match members.get(key) {
                None => changes.push((CatzAction::Add, entry.clone())),
                Some(old) if old != entry => changes.push((CatzAction::Modify, entry.clone())),
                Some(_) => (),
            }
        }
        for (key, entry) in members.iter() {
            if !new.contains_key(key) {
                changes.push((CatzAction::Delete, entry.clone()));
            }
        }

        debug!("catalog zone {}: {} changes", self.origin, changes.len());
        *members = new;
        changes
    }

    /// The file a non in-memory member is stored in
    pub fn member_file(&self, member: &Name) -> Option<PathBuf> {
        if self.options.in_memory {
            return None;
        }
        let file = format!("__catz__{}_{}.db", trim_dot(&self.origin), trim_dot(member));
        Some(match &self.options.zone_directory {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        })
    }

    /// Generates the zone stanza for a member
    pub fn zone_config(&self, entry: &CatzEntry, class: DNSClass) -> ZoneConfig {
        let mut options = entry.options.clone();
        options.insert("type", "secondary");

        let primaries = if entry.primaries.is_empty() {
            &self.options.default_primaries
        } else {
            &entry.primaries
        };
        options.insert(
            "primaries",
            Value::Array(primaries.iter().map(|a| Value::String(a.to_string())).collect()),
        );
        if let Some(file) = self.member_file(&entry.name) {
            options.insert("file", file.to_string_lossy().into_owned());
        }

        let class = (class != DNSClass::IN).then(|| class.to_string());
        ZoneConfig::new(entry.name.to_string(), class, options)
    }
}

fn trim_dot(name: &Name) -> String {
    let text = name.to_string();
    text.strip_suffix('.').unwrap_or(&text).to_string()
}

/// The catalog zones of a view
#[derive(Debug, Default)]
pub struct CatalogZones {
    zones: BTreeMap<LowerName, Arc<CatalogZone>>,
}

impl CatalogZones {
    /// The catalog zone with this origin
    pub fn get(&self, origin: &Name) -> Option<&Arc<CatalogZone>> {
        self.zones.get(&LowerName::new(origin))
    }

    /// True if `origin` is a configured catalog zone
    pub fn is_catalog(&self, origin: &Name) -> bool {
        self.zones.contains_key(&LowerName::new(origin))
    }

    /// The catalog that lists `member`
    pub fn owner_of(&self, member: &Name) -> Option<&Arc<CatalogZone>> {
        self.zones.values().find(|c| c.has_member(member))
    }

    /// All catalog zones
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CatalogZone>> {
        self.zones.values()
    }

    /// Number of catalog zones
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// True if there are none
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Reads `catalog-zones` from `maps`, carrying the known members of catalogs that
/// remain configured
pub fn configure_catz(
    maps: &ConfigMaps<'_>,
    outgoing: Option<&Arc<CatalogZones>>,
) -> ConfigResult<Option<Arc<CatalogZones>>> {
    let Some(config) = maps.get_as::<CatalogZonesConfig>("catalog-zones")? else {
        return Ok(None);
    };

    let port = maps.get_u32("port")?.and_then(|p| u16::try_from(p).ok()).unwrap_or(53);
    let mut zones = BTreeMap::new();
    for catz in config.zones {
        let mut origin = Name::from_str(&catz.zone)?;
        origin.set_fqdn(true);
        let key = LowerName::new(&origin);
        if zones.contains_key(&key) {
            return Err(ConfigError::invalid(
                "catalog-zones",
                format_args!("catalog zone '{}' listed twice", catz.zone),
            ));
        }

        let options = CatzOptions {
            default_primaries: match &catz.default_primaries {
                Some(v) => value_to_sockaddrs("default-primaries", v, port)?,
                None => Vec::new(),
            },
            zone_directory: catz.zone_directory,
            in_memory: catz.in_memory,
            min_update_interval: catz.min_update_interval,
        };

        let members = outgoing
            .and_then(|o| o.get(&origin))
            .map(|old| old.members.lock().clone())
            .unwrap_or_default();
        if !members.is_empty() {
            info!("catalog zone {origin}: carrying {} members forward", members.len());
        }

        zones.insert(
            key,
            Arc::new(CatalogZone {
                origin,
                options,
                members: Mutex::new(members),
            }),
        );
    }

    Ok(Some(Arc::new(CatalogZones { zones })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn catalog(toml: &str, outgoing: Option<&Arc<CatalogZones>>) -> Arc<CatalogZones> {
        let options = OptionMap::from_toml(toml).unwrap();
        configure_catz(&ConfigMaps::new([&options]), outgoing)
            .unwrap()
            .unwrap()
    }

    const CONFIG: &str = r#"
[catalog-zones]
zones = [{ zone = "catz.example", default-primaries = ["192.0.2.1"], zone-directory = "/var/catz" }]
"#;

    #[test]
    fn test_member_diff() {
        let catzs = catalog(CONFIG, None);
        let catz = catzs.get(&name("catz.example.")).unwrap();

        let changes = catz.update(vec![CatzEntry::new(name("a.test.")), CatzEntry::new(name("b.test."))]);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|(a, _)| *a == CatzAction::Add));

        let mut b = CatzEntry::new(name("b.test."));
        b.primaries.push("192.0.2.9:53".parse().unwrap());
        let changes = catz.update(vec![b, CatzEntry::new(name("c.test."))]);
        let actions = changes
            .iter()
            .map(|(a, e)| (*a, e.name.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(
            actions,
            vec![
                (CatzAction::Modify, "b.test.".to_string()),
                (CatzAction::Add, "c.test.".to_string()),
                (CatzAction::Delete, "a.test.".to_string()),
            ]
        );
    }

    #[test]
    fn test_members_carried_forward() {
        let first = catalog(CONFIG, None);
        first
            .get(&name("catz.example."))
            .unwrap()
            .update(vec![CatzEntry::new(name("a.test."))]);

        let second = catalog(CONFIG, Some(&first));
        let catz = second.get(&name("catz.example.")).unwrap();
        assert!(catz.has_member(&name("a.test.")));
        assert!(second.owner_of(&name("a.test.")).is_some());
        assert!(catz.update(vec![CatzEntry::new(name("a.test."))]).is_empty());
    }

    #[test]
    fn test_generated_stanza() {
        let catzs = catalog(CONFIG, None);
        let catz = catzs.get(&name("catz.example.")).unwrap();
        let config = catz.zone_config(&CatzEntry::new(name("a.test.")), DNSClass::IN);

        assert_eq!(config.name, "a.test.");
        assert_eq!(
            config.options.get("file"),
            Some(&Value::String("/var/catz/__catz__catz.example_a.test.db".to_string()))
        );
        assert_eq!(
            config.options.get("primaries"),
            Some(&Value::Array(vec![Value::String("192.0.2.1:53".to_string())]))
        );
        assert_eq!(config.class, None);
    }
}
