// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Forwarding and dual-stack servers

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::config::maps::value_to_sockaddrs;
use crate::config::ConfigMaps;
use crate::error::{ConfigError, ConfigResult};
use crate::proto::rr::{LowerName, Name};

/// How forwarders are used
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Forwarding disabled below this name
    None,
    /// Try forwarders, then resolve iteratively
    #[default]
    First,
    /// Only use forwarders
    Only,
}

impl FromStr for ForwardPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Self::First),
            "only" => Ok(Self::Only),
            _ => Err(ConfigError::invalid("forward", format_args!("unknown policy '{s}'"))),
        }
    }
}

/// Forwarders for one name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forwarders {
    /// Servers to forward to
    pub addrs: Vec<SocketAddr>,
    /// Forwarding policy
    pub policy: ForwardPolicy,
}

/// The forwarding entries of a view, deepest match wins
#[derive(Clone, Debug, Default)]
pub struct ForwardTable {
    entries: BTreeMap<LowerName, (Name, Forwarders)>,
}

impl ForwardTable {
    /// Constructs an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `name`
    pub fn insert(&mut self, name: Name, forwarders: Forwarders) {
        debug!(
            "forwarding for {name}: {:?} {:?}",
            forwarders.policy, forwarders.addrs
        );
        self.entries.insert(LowerName::new(&name), (name, forwarders));
    }

    /// Removes the entry for `name`
    pub fn remove(&mut self, name: &Name) -> Option<Forwarders> {
        self.entries.remove(&LowerName::new(name)).map(|(_, f)| f)
    }

    /// The entry with exactly this name
    pub fn get(&self, name: &Name) -> Option<&Forwarders> {
        self.entries.get(&LowerName::new(name)).map(|(_, f)| f)
    }

    /// The deepest entry at or above `name`
    pub fn find(&self, name: &Name) -> Option<(&Name, &Forwarders)> {
        let mut current = LowerName::new(name);
        loop {
            if let Some((n, f)) = self.entries.get(&current) {
                return Some((n, f));
            }
            if current.is_root() {
                return None;
            }
            current = current.base_name();
        }
    }

    /// True if some active entry is at or below `name`
    pub fn forwards_at_or_below(&self, name: &Name) -> bool {
        self.entries
            .values()
            .any(|(n, f)| name.zone_of(n) && f.policy != ForwardPolicy::None && !f.addrs.is_empty())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads `forwarders` and `forward` from `maps`.
///
/// Returns `None` when no forwarders are configured at any layer. An explicitly empty
/// list yields an entry with [`ForwardPolicy::None`], which turns forwarding off below
/// the name.
pub fn forwarders_from(maps: &ConfigMaps<'_>) -> ConfigResult<Option<Forwarders>> {
    let Some(value) = maps.get("forwarders") else {
        return Ok(None);
    };
    let port = maps
        .get_u32("forward-port")?
        .or(maps.get_u32("port")?)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(53);
    let addrs = value_to_sockaddrs("forwarders", value, port)?;

    let policy = if addrs.is_empty() {
        ForwardPolicy::None
    } else {
        maps.get_str("forward")?
            .map(ForwardPolicy::from_str)
            .transpose()?
            .unwrap_or_default()
    };

    Ok(Some(Forwarders { addrs, policy }))
}

/// The `dual-stack-servers` of a view
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DualStackServers {
    /// Servers given by address
    pub addrs: Vec<SocketAddr>,
    /// Servers given by name, resolved on use
    pub names: Vec<(Name, u16)>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DualStackConfig {
    #[serde(default)]
    port: Option<u16>,
    servers: Vec<String>,
}

impl DualStackServers {
    /// Reads `dual-stack-servers = { port = 53, servers = ["192.0.2.1", "ns.example. port 5300"] }`
    pub fn from_maps(maps: &ConfigMaps<'_>) -> ConfigResult<Option<Self>> {
        let Some(config) = maps.get_as::<DualStackConfig>("dual-stack-servers")? else {
            return Ok(None);
        };
        let default_port = config.port.unwrap_or(53);

        let mut servers = Self::default();
        for server in &config.servers {
            if let Ok(addr) = crate::config::maps::parse_sockaddr(server, default_port) {
                servers.addrs.push(addr);
                continue;
            }

            let mut words = server.split_whitespace();
            let name = words.next().unwrap_or_default();
            let port = match (words.next(), words.next()) {
                (Some("port"), Some(p)) => p
                    .parse::<u16>()
                    .map_err(|_| ConfigError::invalid("dual-stack-servers", format_args!("bad port in '{server}'")))?,
                (None, _) => default_port,
                _ => {
                    return Err(ConfigError::invalid(
                        "dual-stack-servers",
                        format_args!("cannot parse '{server}'"),
                    ))
                }
            };
            let mut name = Name::from_str(name)?;
            name.set_fqdn(true);
            servers.names.push((name, port));
        }

        Ok(Some(servers))
    }
}
