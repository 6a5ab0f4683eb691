// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Response policy zones
//!
//! The `response-policy` option lists up to [`MAX_RPZ_ZONES`] policy zones in priority
//! order. Each zone gets a number, the bit of that number in the table-wide bitmaps
//! records the per-zone switches. A table that did not change between configurations
//! is carried forward so the policy summary does not have to be rebuilt.

use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::maps::parse_ttl;
use crate::config::ConfigMaps;
use crate::error::{ConfigError, ErrorKind, Result};
use crate::proto::rr::Name;

/// The most policy zones a view may have
pub const MAX_RPZ_ZONES: usize = 64;

const DEFAULT_MAX_POLICY_TTL: u32 = 604_800;

/// Talks to an external response policy service (DNSRPS)
pub trait PolicyService: Send + Sync {
    /// Hands the generated configuration text to the service
    fn connect(&self, config: &str) -> std::result::Result<(), String>;
}

/// Overrides the policy encoded in the zone data
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PolicyOverride {
    /// Use the policy in the zone
    #[default]
    Given,
    /// Evaluate and log, but do not apply
    Disabled,
    /// Answer normally
    Passthru,
    /// Same as passthru, kept for old configurations
    NoOp,
    /// Drop the query
    Drop,
    /// Force the client to TCP
    TcpOnly,
    /// Answer NXDOMAIN
    Nxdomain,
    /// Answer NODATA
    Nodata,
    /// Answer with a CNAME to the target
    Cname(Name),
}

impl PolicyOverride {
    fn parse(text: &str) -> Result<Self> {
        let mut words = text.split_whitespace();
        let word = words.next().unwrap_or_default().to_ascii_lowercase();
        let policy = match word.as_str() {
            "given" => Self::Given,
            "disabled" => Self::Disabled,
            "passthru" => Self::Passthru,
            "no-op" => Self::NoOp,
            "drop" => Self::Drop,
            "tcp-only" => Self::TcpOnly,
            "nxdomain" => Self::Nxdomain,
            "nodata" => Self::Nodata,
            "cname" => {
                let target = words
                    .next()
                    .ok_or_else(|| ConfigError::invalid("policy", "cname needs a target"))?;
                let mut name =
                    Name::from_str(target).map_err(|_| ErrorKind::InvalidActionName(target.to_string()))?;
                name.set_fqdn(true);
                Self::Cname(name)
            }
            _ => return Err(ConfigError::invalid("policy", format_args!("unknown policy '{text}'")).into()),
        };
        if words.next().is_some() {
            return Err(ConfigError::invalid("policy", format_args!("trailing text in '{text}'")).into());
        }
        Ok(policy)
    }

    fn keyword(&self) -> &'static str {
        match self {
            Self::Given => "given",
            Self::Disabled => "disabled",
            Self::Passthru => "passthru",
            Self::NoOp => "no-op",
            Self::Drop => "drop",
            Self::TcpOnly => "tcp-only",
            Self::Nxdomain => "nxdomain",
            Self::Nodata => "nodata",
            Self::Cname(_) => "cname",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum TtlValue {
    Secs(u32),
    Text(String),
}

impl TtlValue {
    fn secs(&self) -> Result<u32> {
        match self {
            Self::Secs(s) => Ok(*s),
            Self::Text(t) => parse_ttl(t)
                .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
                .map_err(|e| ConfigError::invalid("max-policy-ttl", e).into()),
        }
    }

    fn render(&self) -> Result<String> {
        Ok(self.secs()?.to_string())
    }
}

/// The `response-policy` option
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ResponsePolicyConfig {
    zones: Vec<RpzZoneConfig>,
    recursive_only: Option<bool>,
    break_dnssec: Option<bool>,
    max_policy_ttl: Option<TtlValue>,
    min_ns_dots: Option<u32>,
    qname_wait_recurse: Option<bool>,
    nsip_wait_recurse: Option<bool>,
    nsip_enable: Option<bool>,
    nsdname_enable: Option<bool>,
    log: Option<bool>,
    dnsrps_enable: Option<bool>,
    dnsrps_options: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RpzZoneConfig {
    zone: String,
    policy: Option<String>,
    max_policy_ttl: Option<TtlValue>,
    recursive_only: Option<bool>,
    log: Option<bool>,
    nsip_enable: Option<bool>,
    nsdname_enable: Option<bool>,
    min_update_interval: Option<TtlValue>,
}

/// One policy zone
#[derive(Clone, Debug)]
pub struct RpzZone {
    /// Position in the table, also its bit in the bitmaps
    pub num: usize,
    /// The zone origin
    pub origin: Name,
    /// `rpz-client-ip` subtree
    pub client_ip: Name,
    /// `rpz-ip` subtree
    pub ip: Name,
    /// `rpz-nsdname` subtree
    pub nsdname: Name,
    /// `rpz-nsip` subtree
    pub nsip: Name,
    /// CNAME target meaning passthru
    pub passthru: Name,
    /// CNAME target meaning drop
    pub drop: Name,
    /// CNAME target meaning tcp-only
    pub tcp_only: Name,
    /// Policy override
    pub policy: PolicyOverride,
    /// TTL cap for policy records
    pub max_policy_ttl: u32,
    /// Minimum interval between policy summary updates, in seconds
    pub min_update_interval: u32,
}

impl RpzZone {
    fn same_policy(&self, other: &Self) -> bool {
        self.max_policy_ttl == other.max_policy_ttl && self.origin == other.origin && self.policy == other.policy
    }
}

/// Table-wide switches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RpzParams {
    /// Number of zones
    pub num_zones: usize,
    /// Apply policy even when DNSSEC records were requested
    pub break_dnssec: bool,
    /// Wait for recursion before applying QNAME policy
    pub qname_wait_recurse: bool,
    /// Wait for recursion before applying NSIP policy
    pub nsip_wait_recurse: bool,
    /// Minimum labels for NSDNAME and NSIP triggers
    pub min_ns_labels: u32,
    /// Zones with NSIP triggers enabled
    pub nsip_on: u64,
    /// Zones with NSDNAME triggers enabled
    pub nsdname_on: u64,
    /// Zones that also apply to non-recursive queries
    pub no_rd_ok: u64,
    /// Zones that do not log hits
    pub no_log: u64,
    /// Policy is delegated to an external service
    pub dnsrps_enabled: bool,
}

/// The response-policy table of a view
#[derive(Debug)]
pub struct RpzTable {
    params: RpzParams,
    zones: Vec<RpzZone>,
    dnsrps_config: Option<String>,
    version: u64,
}

impl RpzTable {
    /// Table-wide switches
    pub fn params(&self) -> &RpzParams {
        &self.params
    }

    /// Zones in priority order
    pub fn zones(&self) -> &[RpzZone] {
        &self.zones
    }

    /// Generated DNSRPS configuration text, when DNSRPS is enabled
    pub fn dnsrps_config(&self) -> Option<&str> {
        self.dnsrps_config.as_deref()
    }

    /// Policy version, bumped whenever the table is rebuilt
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The number of the zone with this origin
    pub fn find(&self, origin: &Name) -> Option<usize> {
        self.zones.iter().find(|z| &z.origin == origin).map(|z| z.num)
    }

    fn reusable_by(&self, params: &RpzParams, zones: &[RpzZone], dnsrps_config: Option<&str>) -> bool {
        self.params == *params
            && self.zones.len() == zones.len()
            && self.zones.iter().zip(zones).all(|(old, new)| old.same_policy(new))
            && self.dnsrps_config.as_deref() == dnsrps_config
    }
}

/// The table a view ends up with
#[derive(Debug, Default)]
pub struct RpzOutcome {
    /// The table, `None` without `response-policy`
    pub table: Option<Arc<RpzTable>>,
    /// True when the outgoing table was carried forward
    pub old_rpz_ok: bool,
}

/// Builds the response-policy table from `maps` (view then global options).
pub fn configure_rpz(
    maps: &ConfigMaps<'_>,
    outgoing: Option<&Arc<RpzTable>>,
    service: Option<&dyn PolicyService>,
) -> Result<RpzOutcome> {
    let Some(config) = maps.get_as::<ResponsePolicyConfig>("response-policy")? else {
        return Ok(RpzOutcome::default());
    };

    if config.zones.is_empty() {
        debug!("response-policy lists no zones, no policy table");
        return Ok(RpzOutcome::default());
    }
    if config.zones.len() > MAX_RPZ_ZONES {
        return Err(ErrorKind::TooManyPolicyZones(config.zones.len()).into());
    }

    let dnsrps_enable = match config.dnsrps_enable {
        Some(enable) => enable,
        None => maps.bool_or("dnsrps-enable", false)?,
    };
    let dnsrps_config = if dnsrps_enable {
        let text = dnsrps_config_text(&config)?;
        let service = service.ok_or_else(|| {
            ErrorKind::PolicyServiceUnavailable("dnsrps-enable set but no policy service is available".to_string())
        })?;
        service
            .connect(&text)
            .map_err(ErrorKind::PolicyServiceUnavailable)?;
        Some(text)
    } else {
        None
    };

    let table_recursive_only = config.recursive_only.unwrap_or(true);
    let table_log = config.log.unwrap_or(true);
    let table_nsip = config.nsip_enable.unwrap_or(true);
    let table_nsdname = config.nsdname_enable.unwrap_or(true);
    let table_ttl = config
        .max_policy_ttl
        .as_ref()
        .map(TtlValue::secs)
        .transpose()?
        .unwrap_or(DEFAULT_MAX_POLICY_TTL);

    let mut params = RpzParams {
        num_zones: config.zones.len(),
        break_dnssec: config.break_dnssec.unwrap_or(false),
        qname_wait_recurse: config.qname_wait_recurse.unwrap_or(true),
        nsip_wait_recurse: config.nsip_wait_recurse.unwrap_or(true),
        min_ns_labels: config.min_ns_dots.unwrap_or(1) + 1,
        dnsrps_enabled: dnsrps_enable,
        ..RpzParams::default()
    };

    let mut zones: Vec<RpzZone> = Vec::with_capacity(config.zones.len());
    for (num, zone) in config.zones.iter().enumerate() {
        let bit = 1_u64 << num;

        let mut origin =
            Name::from_str(&zone.zone).map_err(|_| ErrorKind::InvalidZoneName(zone.zone.clone()))?;
        origin.set_fqdn(true);
        if origin.is_root() {
            return Err(ErrorKind::InvalidZoneName(zone.zone.clone()).into());
        }
        if !dnsrps_enable && zones.iter().any(|z| z.origin == origin) {
            return Err(ErrorKind::DuplicateRpzZone(zone.zone.clone()).into());
        }

        if !zone.recursive_only.unwrap_or(table_recursive_only) {
            params.no_rd_ok |= bit;
        }
        if !zone.log.unwrap_or(table_log) {
            params.no_log |= bit;
        }
        if zone.nsip_enable.unwrap_or(table_nsip) {
            params.nsip_on |= bit;
        }
        if zone.nsdname_enable.unwrap_or(table_nsdname) {
            params.nsdname_on |= bit;
        }

        let policy = match &zone.policy {
            Some(p) => PolicyOverride::parse(p)?,
            None => PolicyOverride::Given,
        };

        zones.push(RpzZone {
            num,
            client_ip: under(&origin, "rpz-client-ip")?,
            ip: under(&origin, "rpz-ip")?,
            nsdname: under(&origin, "rpz-nsdname")?,
            nsip: under(&origin, "rpz-nsip")?,
            passthru: action("rpz-passthru.")?,
            drop: action("rpz-drop.")?,
            tcp_only: action("rpz-tcp-only.")?,
            origin,
            policy,
            max_policy_ttl: zone
                .max_policy_ttl
                .as_ref()
                .map(TtlValue::secs)
                .transpose()?
                .unwrap_or(table_ttl),
            min_update_interval: zone
                .min_update_interval
                .as_ref()
                .map(TtlValue::secs)
                .transpose()?
                .unwrap_or(5),
        });
    }

    if let Some(old) = outgoing {
        if old.reusable_by(&params, &zones, dnsrps_config.as_deref()) {
            debug!("reusing response-policy table version {}", old.version);
            return Ok(RpzOutcome {
                table: Some(Arc::clone(old)),
                old_rpz_ok: true,
            });
        }
    }

    let version = outgoing.map_or(1, |old| old.version + 1);
    info!(
        "response-policy table version {version} with {} zones",
        zones.len()
    );
    Ok(RpzOutcome {
        table: Some(Arc::new(RpzTable {
            params,
            zones,
            dnsrps_config,
            version,
        })),
        old_rpz_ok: false,
    })
}

fn under(origin: &Name, label: &str) -> Result<Name> {
    Name::from_ascii(label)
        .and_then(|n| n.append_domain(origin))
        .map_err(|_| ErrorKind::InvalidZoneName(format!("{label}.{origin}")).into())
}

fn action(name: &str) -> Result<Name> {
    Name::from_ascii(name).map_err(|_| ErrorKind::InvalidActionName(name.to_string()).into())
}

/// Renders the configuration handed to the policy service.
///
/// Only explicitly configured settings are emitted, zone clauses first, then the
/// table-wide settings and the verbatim `dnsrps-options`.
fn dnsrps_config_text(config: &ResponsePolicyConfig) -> Result<String> {
    fn yes_no(b: bool) -> &'static str {
        if b {
            "yes"
        } else {
            "no"
        }
    }

    let mut out = String::new();
    for zone in &config.zones {
        write!(out, "zone \"{}\"", zone.zone).ok();
        if let Some(policy) = &zone.policy {
            let policy = PolicyOverride::parse(policy)?;
            write!(out, " policy {}", policy.keyword()).ok();
            if let PolicyOverride::Cname(target) = &policy {
                write!(out, " {target}").ok();
            }
        }
        if let Some(b) = zone.recursive_only {
            write!(out, " recursive-only {}", yes_no(b)).ok();
        }
        if let Some(b) = zone.log {
            write!(out, " log {}", yes_no(b)).ok();
        }
        if let Some(ttl) = &zone.max_policy_ttl {
            write!(out, " max-policy-ttl {}", ttl.render()?).ok();
        }
        if let Some(b) = zone.nsip_enable {
            write!(out, " nsip-enable {}", yes_no(b)).ok();
        }
        if let Some(b) = zone.nsdname_enable {
            write!(out, " nsdname-enable {}", yes_no(b)).ok();
        }
        out.push_str(";\n");
    }

    let mut global = Vec::new();
    if let Some(b) = config.recursive_only {
        global.push(format!("recursive-only {}", yes_no(b)));
    }
    if let Some(ttl) = &config.max_policy_ttl {
        global.push(format!("max-policy-ttl {}", ttl.render()?));
    }
    if let Some(dots) = config.min_ns_dots {
        global.push(format!("min-ns-dots {dots}"));
    }
    if let Some(b) = config.qname_wait_recurse {
        global.push(format!("qname-wait-recurse {}", yes_no(b)));
    }
    if let Some(b) = config.break_dnssec {
        global.push(format!("break-dnssec {}", yes_no(b)));
    }
    if let Some(b) = config.nsip_enable {
        global.push(format!("nsip-enable {}", yes_no(b)));
    }
    if let Some(b) = config.nsdname_enable {
        global.push(format!("nsdname-enable {}", yes_no(b)));
    }
    if let Some(options) = &config.dnsrps_options {
        global.push(format!("dnsrps-options {{ {} }}", options.trim()));
    }
    out.push_str(&global.join(" "));
    out.push('\n');

    Ok(out)
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::config::OptionMap;

    fn rpz(toml: &str, outgoing: Option<&Arc<RpzTable>>) -> Result<RpzOutcome> {
        let options = OptionMap::from_toml(toml).unwrap();
        configure_rpz(&ConfigMaps::new([&options]), outgoing, None)
    }

    const TWO_ZONES: &str = r#"
[response-policy]
zones = [{ zone = "rpz.local" }, { zone = "bl.example", policy = "nxdomain", log = false }]
"#;

    #[test]
    fn test_derived_names() {
        let table = rpz(TWO_ZONES, None).unwrap().table.unwrap();
        let first = &table.zones()[0];

        assert_eq!(first.client_ip, Name::from_str("rpz-client-ip.rpz.local.").unwrap());
        assert_eq!(first.nsdname, Name::from_str("rpz-nsdname.rpz.local.").unwrap());
        assert_eq!(first.passthru, Name::from_str("rpz-passthru.").unwrap());
        assert_eq!(table.find(&Name::from_str("bl.example.").unwrap()), Some(1));
        assert_eq!(table.params().no_log, 0b10);
        assert_eq!(table.params().nsip_on, 0b11);
        assert_eq!(table.version(), 1);
    }

    #[test]
    fn test_unchanged_table_is_reused() {
        let first = rpz(TWO_ZONES, None).unwrap().table.unwrap();
        let second = rpz(TWO_ZONES, Some(&first)).unwrap();

        assert!(second.old_rpz_ok);
        assert!(Arc::ptr_eq(&first, second.table.as_ref().unwrap()));
    }

    #[test]
    fn test_changed_policy_bumps_version() {
        let first = rpz(TWO_ZONES, None).unwrap().table.unwrap();
        let changed = rpz(
            r#"
[response-policy]
zones = [{ zone = "rpz.local" }, { zone = "bl.example", policy = "nodata", log = false }]
"#,
            Some(&first),
        )
        .unwrap();

        assert!(!changed.old_rpz_ok);
        assert_eq!(changed.table.unwrap().version(), 2);
    }

    #[test]
    fn test_single_setting_changes_not_reused() {
        let first = rpz(
            "[response-policy]\nzones = [{ zone = \"rpz.test\", policy = \"cname a.example\", max-policy-ttl = 60 }]",
            None,
        )
        .unwrap()
        .table
        .unwrap();

        let ttl = rpz(
            "[response-policy]\nzones = [{ zone = \"rpz.test\", policy = \"cname a.example\", max-policy-ttl = 120 }]",
            Some(&first),
        )
        .unwrap();
        assert!(!ttl.old_rpz_ok);
        assert_eq!(ttl.table.unwrap().zones()[0].max_policy_ttl, 120);

        let target = rpz(
            "[response-policy]\nzones = [{ zone = \"rpz.test\", policy = \"cname b.example\", max-policy-ttl = 60 }]",
            Some(&first),
        )
        .unwrap();
        assert!(!target.old_rpz_ok);
        assert_eq!(target.table.unwrap().version(), 2);
    }

    #[test]
    fn test_empty_zone_list_has_no_table() {
        let outcome = rpz("[response-policy]\nzones = []", None).unwrap();
        assert!(outcome.table.is_none());
        assert!(!outcome.old_rpz_ok);
    }

    #[test]
    fn test_reordered_zones_not_reused() {
        let first = rpz(
            "[response-policy]\nzones = [{ zone = \"a.test\" }, { zone = \"b.test\" }]",
            None,
        )
        .unwrap()
        .table
        .unwrap();
        let swapped = rpz(
            "[response-policy]\nzones = [{ zone = \"b.test\" }, { zone = \"a.test\" }]",
            Some(&first),
        )
        .unwrap();
        assert!(!swapped.old_rpz_ok);
    }

    #[test]
    fn test_rejects() {
        assert!(matches!(
            rpz("[response-policy]\nzones = [{ zone = \".\" }]", None).unwrap_err().kind(),
            ErrorKind::InvalidZoneName(_)
        ));
        assert!(matches!(
            rpz(
                "[response-policy]\nzones = [{ zone = \"a.test\" }, { zone = \"A.test\" }]",
                None
            )
            .unwrap_err()
            .kind(),
            ErrorKind::DuplicateRpzZone(_)
        ));

        let many = (0..65)
            .map(|i| format!("{{ zone = \"z{i}.test\" }}"))
            .collect::<Vec<_>>()
            .join(", ");
        assert!(matches!(
            rpz(&format!("[response-policy]\nzones = [{many}]"), None)
                .unwrap_err()
                .kind(),
            ErrorKind::TooManyPolicyZones(65)
        ));
    }

    #[test]
    fn test_cname_policy() {
        let table = rpz(
            "[response-policy]\nzones = [{ zone = \"rpz.test\", policy = \"cname walled.example\" }]",
            None,
        )
        .unwrap()
        .table
        .unwrap();
        assert_eq!(
            table.zones()[0].policy,
            PolicyOverride::Cname(Name::from_str("walled.example.").unwrap())
        );
    }

    struct Recorder(Mutex<Option<String>>);

    impl PolicyService for Recorder {
        fn connect(&self, config: &str) -> std::result::Result<(), String> {
            *self.0.lock() = Some(config.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_dnsrps_config_text() {
        let options = OptionMap::from_toml(
            r#"
[response-policy]
dnsrps-enable = true
break-dnssec = true
dnsrps-options = "server unix:/run/rpz"
zones = [{ zone = "rpz.test", policy = "drop", recursive-only = false }, { zone = "rpz.test" }]
"#,
        )
        .unwrap();
        let service = Recorder(Mutex::new(None));
        let outcome = configure_rpz(&ConfigMaps::new([&options]), None, Some(&service)).unwrap();

        let expected = "zone \"rpz.test\" policy drop recursive-only no;\nzone \"rpz.test\";\nbreak-dnssec yes dnsrps-options { server unix:/run/rpz }\n";
        assert_eq!(service.0.lock().as_deref(), Some(expected));
        assert_eq!(outcome.table.unwrap().dnsrps_config(), Some(expected));
    }

    #[test]
    fn test_dnsrps_needs_service() {
        let err = rpz(
            "[response-policy]\ndnsrps-enable = true\nzones = [{ zone = \"rpz.test\" }]",
            None,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PolicyServiceUnavailable(_)));
    }

    #[test]
    fn test_global_dnsrps_enable() {
        let global = OptionMap::from_toml("dnsrps-enable = true").unwrap();
        let view = OptionMap::from_toml("[response-policy]\nzones = [{ zone = \"rpz.test\" }]").unwrap();
        let err = configure_rpz(&ConfigMaps::new([&view, &global]), None, None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PolicyServiceUnavailable(_)));

        let view = OptionMap::from_toml(
            "[response-policy]\ndnsrps-enable = false\nzones = [{ zone = \"rpz.test\" }]",
        )
        .unwrap();
        let local = configure_rpz(&ConfigMaps::new([&view, &global]), None, None).unwrap();
        assert!(local.table.unwrap().dnsrps_config().is_none());
    }
}
