// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Detailed per-zone options

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use toml::Value;

use super::{Zone, ZoneKind};
use crate::acl::{Acl, AclContext};
use crate::config::maps::value_to_sockaddrs;
use crate::config::{ConfigMaps, OptionMap};
use crate::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::proto::rr::Name;

/// On-disk format of the zone file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MasterFormat {
    /// Master file text
    #[default]
    Text,
    /// Binary raw format
    Raw,
    /// Memory-mapped image
    Map,
}

impl FromStr for MasterFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "raw" => Ok(Self::Raw),
            "map" => Ok(Self::Map),
            _ => Err(ConfigError::invalid("masterfile-format", format_args!("unknown format '{s}'"))),
        }
    }
}

/// Who receives NOTIFY messages
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotifyMode {
    /// NS records and `also-notify`
    #[default]
    Yes,
    /// Nobody
    No,
    /// Only `also-notify`
    Explicit,
    /// Only when acting as primary
    PrimaryOnly,
}

impl NotifyMode {
    fn from_value(value: &Value) -> ConfigResult<Self> {
        match value {
            Value::Boolean(true) => Ok(Self::Yes),
            Value::Boolean(false) => Ok(Self::No),
            Value::String(s) => match s.as_str() {
                "yes" | "true" => Ok(Self::Yes),
                "no" | "false" => Ok(Self::No),
                "explicit" => Ok(Self::Explicit),
                "primary-only" | "master-only" => Ok(Self::PrimaryOnly),
                _ => Err(ConfigError::invalid("notify", format_args!("unknown mode '{s}'"))),
            },
            other => Err(ConfigError::invalid(
                "notify",
                format_args!("expected a boolean or mode, found {}", other.type_str()),
            )),
        }
    }
}

/// The options applied to a zone object
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZoneOptions {
    /// `file` exactly as configured
    pub file: Option<String>,
    /// The file resolved against the working directory
    pub path: Option<PathBuf>,
    /// Journal of dynamic updates and incremental transfers
    pub journal: Option<PathBuf>,
    /// Zone file format
    pub format: MasterFormat,
    /// Primary servers of a secondary, stub or mirror zone
    pub primaries: Vec<SocketAddr>,
    /// Extra NOTIFY targets
    pub also_notify: Vec<SocketAddr>,
    /// NOTIFY behaviour
    pub notify: NotifyMode,
    /// Zone-level `allow-query`
    pub allow_query: Option<Acl>,
    /// Zone-level `allow-query-on`
    pub allow_query_on: Option<Acl>,
    /// Zone-level `allow-transfer`
    pub allow_transfer: Option<Acl>,
    /// Zone-level `allow-update`
    pub allow_update: Option<Acl>,
    /// Zone-level `allow-update-forwarding`
    pub allow_update_forwarding: Option<Acl>,
    /// Zone-level `allow-notify`
    pub allow_notify: Option<Acl>,
    /// True when an `update-policy` is configured
    pub update_policy: bool,
    /// Journal size limit
    pub max_journal_size: Option<u64>,
    /// Name of the DNSSEC policy
    pub dnssec_policy: Option<String>,
    /// True when keys are maintained automatically
    pub key_maintenance: bool,
    /// True for inline-signing zones
    pub inline_signing: bool,
    /// Per-zone statistics
    pub statistics: bool,
    /// Addresses of a static-stub zone
    pub server_addresses: Vec<IpAddr>,
    /// Names of a static-stub zone
    pub server_names: Vec<Name>,
}

/// The option layers for one zone stanza
#[derive(Clone, Copy, Debug)]
pub(crate) struct ZoneLayers<'a> {
    pub(crate) zone: &'a OptionMap,
    pub(crate) view: Option<&'a OptionMap>,
    pub(crate) global: Option<&'a OptionMap>,
    pub(crate) defaults: &'a OptionMap,
}

impl<'a> ZoneLayers<'a> {
    /// Every layer, defaults last
    pub(crate) fn all(&self) -> ConfigMaps<'a> {
        ConfigMaps::from_optional([Some(self.zone), self.view, self.global, Some(self.defaults)])
    }

    /// The user-written layers only
    pub(crate) fn user(&self) -> ConfigMaps<'a> {
        ConfigMaps::from_optional([Some(self.zone), self.view, self.global])
    }
}

impl ZoneOptions {
    /// Derives the options of a `kind` zone from its layers
    pub(crate) fn from_layers(
        zone_name: &str,
        kind: ZoneKind,
        layers: &ZoneLayers<'_>,
        acls: &AclContext<'_>,
        directory: &Path,
    ) -> ConfigResult<Self> {
        let all = layers.all();
        let user = layers.user();
        let zone_only = ConfigMaps::new([layers.zone]);

        let file = zone_only.get_str("file")?.map(str::to_string);
        let path = file.as_deref().map(|f| resolve(directory, f));
        let journal = match zone_only.get_str("journal")? {
            Some(j) => Some(resolve(directory, j)),
            None => path.as_ref().map(|p| journal_for(p)),
        };

        let port = all.get_u32("port")?.and_then(|p| u16::try_from(p).ok()).unwrap_or(53);
        let primaries = match zone_only.get("primaries").or_else(|| zone_only.get("masters")) {
            Some(v) => value_to_sockaddrs("primaries", v, port)?,
            None => Vec::new(),
        };
        let also_notify = match user.get("also-notify") {
            Some(v) => value_to_sockaddrs("also-notify", v, port)?,
            None => Vec::new(),
        };

        let notify = match all.get("notify") {
            Some(v) => NotifyMode::from_value(v)?,
            None => NotifyMode::Yes,
        };

        let dnssec_policy = user
            .get_str("dnssec-policy")?
            .filter(|p| *p != "none")
            .map(str::to_string);
        let key_maintenance = dnssec_policy.is_some() || user.get_str("auto-dnssec")? == Some("maintain");
        let inline_signing = matches!(kind, ZoneKind::Primary | ZoneKind::Secondary)
            && user.bool_or("inline-signing", dnssec_policy.is_some() && kind == ZoneKind::Secondary)?;

        let statistics = match all.get("zone-statistics") {
            Some(Value::Boolean(b)) => *b,
            Some(Value::String(s)) => s != "none" && s != "no",
            _ => false,
        };

        let mut server_addresses = Vec::new();
        let mut server_names = Vec::new();
        if kind == ZoneKind::StaticStub {
            for addr in zone_only.get_str_list("server-addresses")?.unwrap_or_default() {
                server_addresses.push(
                    IpAddr::from_str(addr)
                        .map_err(|e| ConfigError::invalid("server-addresses", format_args!("'{addr}': {e}")))?,
                );
            }
            for name in zone_only.get_str_list("server-names")?.unwrap_or_default() {
                let mut name = Name::from_str(name)?;
                name.set_fqdn(true);
                server_names.push(name);
            }
            if server_addresses.is_empty() && server_names.is_empty() {
                return Err(ConfigErrorKind::Missing(format!(
                    "zone '{zone_name}': server-addresses or server-names"
                ))
                .into());
            }
        }

        let format = all
            .get_str("masterfile-format")?
            .map(MasterFormat::from_str)
            .transpose()?
            .unwrap_or_default();

        let max_journal_size = match all.get_size("max-journal-size")? {
            Some(crate::config::SizeSpec::Bytes(b)) => Some(b),
            _ => None,
        };

        let options = Self {
            file,
            path,
            journal,
            format,
            primaries,
            also_notify,
            notify,
            allow_query: acls.lookup(&user, "allow-query")?,
            allow_query_on: acls.lookup(&user, "allow-query-on")?,
            allow_transfer: acls.lookup(&user, "allow-transfer")?,
            allow_update: acls.lookup(&zone_only, "allow-update")?,
            allow_update_forwarding: acls.lookup(&user, "allow-update-forwarding")?,
            allow_notify: acls.lookup(&user, "allow-notify")?,
            update_policy: zone_only.contains("update-policy"),
            max_journal_size,
            dnssec_policy,
            key_maintenance,
            inline_signing,
            statistics,
            server_addresses,
            server_names,
        };
        options.check(zone_name, kind)?;
        Ok(options)
    }

    fn check(&self, zone_name: &str, kind: ZoneKind) -> ConfigResult<()> {
        match kind {
            ZoneKind::Secondary | ZoneKind::Stub if self.primaries.is_empty() => Err(ConfigErrorKind::Missing(
                format!("zone '{zone_name}': primaries"),
            )
            .into()),
            ZoneKind::Primary if self.file.is_none() => {
                Err(ConfigErrorKind::Missing(format!("zone '{zone_name}': file")).into())
            }
            _ => Ok(()),
        }
    }

    /// Splits the options of an inline-signing zone into the signed half and the raw
    /// half; the raw zone keeps the configured file and primaries
    pub(crate) fn split_inline(&self) -> (Self, Self) {
        let raw = Self {
            inline_signing: false,
            key_maintenance: false,
            dnssec_policy: None,
            allow_update: None,
            update_policy: false,
            ..self.clone()
        };
        let signed_path = self.path.as_ref().map(|p| {
            let mut name = p.as_os_str().to_owned();
            name.push(".signed");
            PathBuf::from(name)
        });
        let signed = Self {
            journal: signed_path.as_ref().map(|p| journal_for(p)),
            path: signed_path,
            primaries: Vec::new(),
            ..self.clone()
        };
        (signed, raw)
    }
}

fn resolve(directory: &Path, file: &str) -> PathBuf {
    let file = Path::new(file);
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        directory.join(file)
    }
}

fn journal_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".jnl");
    PathBuf::from(name)
}

/// The kind options are validated for; db-backed primaries (builtin, dlz) have no file
pub(crate) fn options_kind(kind: ZoneKind, db_args: &[String]) -> ZoneKind {
    match (kind, db_args.first().map(String::as_str)) {
        (ZoneKind::Primary, Some(db)) if db != "rbt" && db != "rbt64" => ZoneKind::Dlz,
        (kind, _) => kind,
    }
}

/// Applies `options` to `zone`, splitting them with its raw companion if it has one
pub(crate) fn apply_options(zone: &Zone, options: ZoneOptions) {
    match zone.raw() {
        Some(raw) if options.inline_signing => {
            let (signed, raw_options) = options.split_inline();
            raw.set_options(raw_options);
            zone.set_options(signed);
        }
        _ => zone.set_options(options),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::Config;

    fn options(kind: ZoneKind, zone: &str) -> ConfigResult<ZoneOptions> {
        let zone = OptionMap::from_toml(zone).unwrap();
        let defaults = Config::defaults().unwrap().options;
        let named = BTreeMap::new();
        ZoneOptions::from_layers(
            "example.com",
            kind,
            &ZoneLayers {
                zone: &zone,
                view: None,
                global: None,
                defaults: &defaults,
            },
            &AclContext::new(&named),
            Path::new("/var/named"),
        )
    }

    #[test]
    fn test_primary_paths() {
        let opts = options(ZoneKind::Primary, r#"file = "example.com.db""#).unwrap();
        assert_eq!(opts.file.as_deref(), Some("example.com.db"));
        assert_eq!(opts.path, Some(PathBuf::from("/var/named/example.com.db")));
        assert_eq!(opts.journal, Some(PathBuf::from("/var/named/example.com.db.jnl")));
        assert_eq!(opts.notify, NotifyMode::Yes);
    }

    #[test]
    fn test_primary_needs_file() {
        assert!(options(ZoneKind::Primary, "").is_err());
    }

    #[test]
    fn test_secondary_needs_primaries() {
        assert!(options(ZoneKind::Secondary, r#"file = "bk""#).is_err());
        let opts = options(ZoneKind::Secondary, r#"primaries = ["192.0.2.1", "192.0.2.2 port 5300"]"#).unwrap();
        assert_eq!(opts.primaries.len(), 2);
        assert_eq!(opts.primaries[0].port(), 53);
        assert_eq!(opts.primaries[1].port(), 5300);
    }

    #[test]
    fn test_inline_signing_split() {
        let opts = options(
            ZoneKind::Primary,
            "file = \"example.com.db\"\ninline-signing = true\nauto-dnssec = \"maintain\"",
        )
        .unwrap();
        assert!(opts.inline_signing);
        assert!(opts.key_maintenance);

        let (signed, raw) = opts.split_inline();
        assert_eq!(raw.path, Some(PathBuf::from("/var/named/example.com.db")));
        assert_eq!(signed.path, Some(PathBuf::from("/var/named/example.com.db.signed")));
        assert!(!raw.inline_signing);
    }

    #[test]
    fn test_dynamic_zone() {
        let opts = options(
            ZoneKind::Primary,
            "file = \"dyn.db\"\nallow-update = [\"key ddns\"]",
        )
        .unwrap();
        assert!(opts.allow_update.is_some());
    }

    #[test]
    fn test_static_stub_servers() {
        let opts = options(ZoneKind::StaticStub, r#"server-addresses = ["192.0.2.53"]"#).unwrap();
        assert_eq!(opts.server_addresses, vec!["192.0.2.53".parse::<IpAddr>().unwrap()]);
        assert!(options(ZoneKind::StaticStub, "").is_err());
    }
}
