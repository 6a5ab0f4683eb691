// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration document for the server
//!
//! The document is TOML. Top-level `[options]` apply to every view, `[[views]]`
//! declare views with their own options and zones, and `[[zones]]` at the top level
//! belong to the implicit `_default` view used when no views are declared.

mod defaults;
pub mod maps;
mod zone;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::proto::rr::DNSClass;

pub use self::defaults::DEFAULT_CONFIG;
pub use self::maps::{ConfigMaps, OptionMap, SizeSpec};
pub use self::zone::{parse_class, ZoneConfig, ZoneTypeConfig};

/// Name of the implicit view used when no views are declared
pub const DEFAULT_VIEW: &str = "_default";

/// Server configuration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Global options, looked up after view options
    #[serde(default)]
    pub options: OptionMap,
    /// Named ACLs, usable anywhere an address match list is accepted
    #[serde(default)]
    pub acls: BTreeMap<String, Value>,
    /// TSIG keys available to every view
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
    /// Per-server settings
    #[serde(default)]
    pub servers: Vec<PeerConfig>,
    /// DNSSEC trust anchors, static and managed
    #[serde(default)]
    pub trust_anchors: Vec<TrustAnchorConfig>,
    /// Dynamically loaded database instances
    #[serde(default)]
    pub dyndb: Vec<DyndbConfig>,
    /// Dynamically loadable zone databases
    #[serde(default)]
    pub dlz: Vec<DlzConfig>,
    /// Zones of the implicit default view
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    /// Declared views, in match order
    #[serde(default)]
    pub views: Vec<ViewConfig>,
}

impl Config {
    /// read a Config file from the file specified at path.
    pub fn read_config(path: &Path) -> ConfigResult<Self> {
        let mut file = File::open(path)?;
        let mut toml = String::new();
        file.read_to_string(&mut toml)?;
        Self::from_toml(&toml)
    }

    /// Read a [`Config`] from the given TOML string.
    pub fn from_toml(toml: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// The compiled-in defaults, the last layer of every option lookup
    pub fn defaults() -> ConfigResult<Self> {
        Ok(toml::from_str(DEFAULT_CONFIG)?)
    }

    fn validate(&self) -> ConfigResult<()> {
        if !self.views.is_empty() && !self.zones.is_empty() {
            return Err(ConfigErrorKind::Syntax(
                "when using 'views' statements, all zones must be in views".to_string(),
            )
            .into());
        }

        for (i, view) in self.views.iter().enumerate() {
            let class = view.class()?;
            if self.views[..i]
                .iter()
                .any(|v| v.name == view.name && v.class().ok() == Some(class))
            {
                return Err(ConfigError::invalid(
                    "views",
                    format_args!("view '{}' is defined twice", view.name),
                ));
            }
        }

        Ok(())
    }

    /// The working directory for relative paths
    pub fn directory(&self, defaults: &Self) -> ConfigResult<PathBuf> {
        let maps = ConfigMaps::new([&self.options, &defaults.options]);
        Ok(PathBuf::from(maps.get_str("directory")?.unwrap_or(".")))
    }

    /// Find the stanza for `name` in the view called `view`
    pub fn find_zone(&self, view: &str, name: &crate::proto::rr::Name) -> Option<&ZoneConfig> {
        self.zones_of(view)?
            .iter()
            .find(|z| z.origin().map(|o| o == *name).unwrap_or(false))
    }

    /// The zone list of `view`, the top-level list for the default view
    pub fn zones_of(&self, view: &str) -> Option<&Vec<ZoneConfig>> {
        if self.views.is_empty() && view == DEFAULT_VIEW {
            return Some(&self.zones);
        }
        self.views.iter().find(|v| v.name == view).map(|v| &v.zones)
    }

    /// Mutable access to the zone list of `view`
    pub fn zones_of_mut(&mut self, view: &str) -> Option<&mut Vec<ZoneConfig>> {
        if self.views.is_empty() && view == DEFAULT_VIEW {
            return Some(&mut self.zones);
        }
        self.views
            .iter_mut()
            .find(|v| v.name == view)
            .map(|v| &mut v.zones)
    }

    /// The declared view with the given name
    pub fn view(&self, name: &str) -> Option<&ViewConfig> {
        self.views.iter().find(|v| v.name == name)
    }
}

/// A `[[views]]` entry
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ViewConfig {
    /// View name, unique per class
    pub name: String,
    /// View class, `IN` when absent
    #[serde(default)]
    pub class: Option<String>,
    /// View options, looked up ahead of the global options
    #[serde(default)]
    pub options: OptionMap,
    /// TSIG keys only visible in this view
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
    /// Per-server settings, replacing the global list
    #[serde(default)]
    pub servers: Vec<PeerConfig>,
    /// Trust anchors, added to the global ones
    #[serde(default)]
    pub trust_anchors: Vec<TrustAnchorConfig>,
    /// Dynamically loaded database instances
    #[serde(default)]
    pub dyndb: Vec<DyndbConfig>,
    /// Dynamically loadable zone databases
    #[serde(default)]
    pub dlz: Vec<DlzConfig>,
    /// Zones of this view
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl ViewConfig {
    /// The view class
    pub fn class(&self) -> ConfigResult<DNSClass> {
        match &self.class {
            Some(class) => parse_class(class),
            None => Ok(DNSClass::IN),
        }
    }
}

/// A TSIG key
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    /// Key name
    pub name: String,
    /// HMAC algorithm name
    #[serde(default = "default_key_algorithm")]
    pub algorithm: String,
    /// Base64 encoded secret
    pub secret: String,
}

fn default_key_algorithm() -> String {
    "hmac-sha256".to_string()
}

/// A `[[servers]]` entry
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PeerConfig {
    /// The server address or prefix
    pub address: String,
    /// Per-server options such as `bogus`, `edns` or `keys`
    #[serde(flatten)]
    pub options: OptionMap,
}

impl PeerConfig {
    /// The address as a network, a bare address is a host route
    pub fn network(&self) -> ConfigResult<IpNet> {
        if let Ok(net) = self.address.parse::<IpNet>() {
            return Ok(net);
        }
        self.address
            .parse::<std::net::IpAddr>()
            .map(IpNet::from)
            .map_err(|e| ConfigError::invalid("servers", format_args!("'{}': {e}", self.address)))
    }
}

/// Kind of a trust anchor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorType {
    /// A static DNSKEY, never rolled
    StaticKey,
    /// A DNSKEY used to bootstrap RFC 5011 maintenance
    InitialKey,
    /// A static DS
    StaticDs,
    /// A DS used to bootstrap RFC 5011 maintenance
    InitialDs,
}

impl AnchorType {
    /// True for anchors maintained through the managed-keys zone
    pub fn is_managed(self) -> bool {
        matches!(self, Self::InitialKey | Self::InitialDs)
    }
}

/// A trust anchor
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TrustAnchorConfig {
    /// Owner name of the anchor
    pub name: String,
    /// Anchor kind
    #[serde(rename = "type")]
    pub anchor_type: AnchorType,
    /// DNSKEY flags
    #[serde(default)]
    pub flags: Option<u16>,
    /// DNSKEY protocol, always 3
    #[serde(default)]
    pub protocol: Option<u8>,
    /// DNSSEC algorithm number
    pub algorithm: u8,
    /// Base64 public key, for key anchors
    #[serde(default)]
    pub key: Option<String>,
    /// Key tag, for DS anchors
    #[serde(default)]
    pub key_tag: Option<u16>,
    /// Digest type, for DS anchors
    #[serde(default)]
    pub digest_type: Option<u8>,
    /// Hex digest, for DS anchors
    #[serde(default)]
    pub digest: Option<String>,
}

/// A `[[dyndb]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DyndbConfig {
    /// Instance name
    pub name: String,
    /// Driver name
    pub library: String,
    /// Free-form parameters passed to the driver
    #[serde(default)]
    pub parameters: String,
}

/// A `[[dlz]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DlzConfig {
    /// Instance name
    pub name: String,
    /// Driver name followed by driver arguments
    pub database: String,
    /// Whether the database is searched for every query
    #[serde(default = "default_true")]
    pub search: bool,
}

fn default_true() -> bool {
    true
}
