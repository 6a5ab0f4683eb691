// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Resolver configuration for a view
//!
//! The resolver engine itself is outside this crate. What lives here are the settings a
//! view hands to it, the ADB memory budget, the statistics carried across
//! reconfiguration, and the query-source dispatchers shared between views.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::config::ConfigMaps;
use crate::error::{ConfigError, ConfigResult};
use crate::forward::DualStackServers;
use crate::proto::rr::Name;

/// Address and nameserver database of one view
#[derive(Debug, Default)]
pub struct Adb {
    max_size: AtomicU64,
}

impl Adb {
    /// An ADB limited to `max_size` bytes, zero meaning unlimited
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size: AtomicU64::new(max_size),
        }
    }

    /// Memory limit in bytes
    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }

    /// Changes the memory limit
    pub fn set_max_size(&self, max_size: u64) {
        self.max_size.store(max_size, Ordering::Release);
    }
}

/// Resolver counters, kept across reconfiguration
#[derive(Debug, Default)]
pub struct ResolverStats {
    queries: AtomicU64,
    responses: AtomicU64,
    quota_drops: AtomicU64,
}

impl ResolverStats {
    /// Counts an outgoing query
    pub fn query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a response
    pub fn response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a fetch refused by a quota
    pub fn quota_drop(&self) {
        self.quota_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Outgoing queries so far
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Responses so far
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Fetches refused so far
    pub fn quota_drops(&self) -> u64 {
        self.quota_drops.load(Ordering::Relaxed)
    }
}

/// What a client sees when a fetch quota is exceeded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaResponse {
    /// No response at all
    Drop,
    /// SERVFAIL
    Fail,
}

impl FromStr for QuotaResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(Self::Drop),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("'{s}' is not drop or fail")),
        }
    }
}

/// A fetch quota and the response once it is hit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchQuota {
    /// Limit, zero for none
    pub limit: u32,
    /// Behaviour past the limit
    pub response: QuotaResponse,
}

/// DNSSEC algorithms the resolver knows by mnemonic
const ALGORITHMS: &[(&str, u8)] = &[
    ("RSAMD5", 1),
    ("DH", 2),
    ("DSA", 3),
    ("RSASHA1", 5),
    ("NSEC3DSA", 6),
    ("NSEC3RSASHA1", 7),
    ("RSASHA256", 8),
    ("RSASHA512", 10),
    ("ECCGOST", 12),
    ("ECDSAP256SHA256", 13),
    ("ECDSAP384SHA384", 14),
    ("ED25519", 15),
    ("ED448", 16),
];

/// DS digest types the resolver knows by mnemonic
const DIGESTS: &[(&str, u8)] = &[("SHA-1", 1), ("SHA-256", 2), ("GOST", 3), ("SHA-384", 4)];

fn mnemonic(table: &[(&str, u8)], key: &str, text: &str) -> ConfigResult<u8> {
    if let Ok(number) = text.parse::<u8>() {
        return Ok(number);
    }
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(text))
        .map(|(_, number)| *number)
        .ok_or_else(|| ConfigError::invalid(key, format_args!("unknown algorithm '{text}'")))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DisableClause {
    domain: String,
    #[serde(alias = "digests")]
    algorithms: Vec<String>,
}

/// Algorithms or digests switched off below a name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disabled {
    /// Where the rule starts
    pub domain: Name,
    /// Algorithm or digest numbers
    pub numbers: Vec<u8>,
}

fn disabled(maps: &ConfigMaps<'_>, key: &str, table: &[(&str, u8)]) -> ConfigResult<Vec<Disabled>> {
    let Some(clauses) = maps.get_as::<Vec<DisableClause>>(key)? else {
        return Ok(Vec::new());
    };

    clauses
        .into_iter()
        .map(|clause| {
            let domain = Name::from_str(&clause.domain)?;
            let numbers = clause
                .algorithms
                .iter()
                .map(|a| mnemonic(table, key, a))
                .collect::<ConfigResult<Vec<_>>>()?;
            Ok(Disabled { domain, numbers })
        })
        .collect()
}

/// Everything the view configures on its resolver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverSettings {
    /// IPv4 query source, `None` when IPv4 is unavailable
    pub query_source_v4: Option<SocketAddr>,
    /// IPv6 query source, `None` when IPv6 is unavailable
    pub query_source_v6: Option<SocketAddr>,
    /// Destination port for outgoing queries
    pub port: u16,
    /// Advertised EDNS buffer size
    pub edns_udp_size: u16,
    /// Largest UDP response sent
    pub max_udp_size: u16,
    /// How long lame servers are remembered
    pub lame_ttl: Duration,
    /// How long SERVFAIL is cached
    pub servfail_ttl: Duration,
    /// Total time for one resolution
    pub query_timeout: Duration,
    /// Initial retry interval
    pub retry_interval: Duration,
    /// Tries before exponential backoff
    pub nonbackoff_tries: u32,
    /// Largest RSA exponent accepted, zero for no limit
    pub max_rsa_exponent_size: u32,
    /// Soft clients-per-query limit
    pub clients_per_query: u32,
    /// Hard clients-per-query limit
    pub max_clients_per_query: u32,
    /// Delegation depth limit
    pub max_recursion_depth: u32,
    /// Query count limit per resolution
    pub max_recursion_queries: u32,
    /// Per-zone fetch quota
    pub fetches_per_zone: FetchQuota,
    /// Per-server fetch quota
    pub fetches_per_server: FetchQuota,
    /// DNSSEC algorithms disabled below names
    pub disabled_algorithms: Vec<Disabled>,
    /// DS digests disabled below names
    pub disabled_ds_digests: Vec<Disabled>,
    /// Negative answers without SOA get TTL zero
    pub zero_no_soa_ttl: bool,
    /// DSCP mark of outgoing IPv4 queries
    pub dscp_v4: Option<u8>,
    /// DSCP mark of outgoing IPv6 queries
    pub dscp_v6: Option<u8>,
}

const MIN_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LAME_TTL: Duration = Duration::from_secs(1800);
const MAX_SERVFAIL_TTL: Duration = Duration::from_secs(30);

impl ResolverSettings {
    /// Reads the settings from the view's option layers
    pub fn from_maps(maps: &ConfigMaps<'_>) -> ConfigResult<Self> {
        let port = maps.get_u32("port")?.unwrap_or(53);
        let port = u16::try_from(port).map_err(|_| ConfigError::invalid("port", port))?;

        let query_source_v4 = maps
            .get_sockaddr("query-source", 0)?
            .filter(|sa| sa.is_ipv4() && !matches!(sa.ip(), IpAddr::V4(ip) if ip.is_broadcast()));
        let query_source_v6 = maps.get_sockaddr("query-source-v6", 0)?.filter(SocketAddr::is_ipv6);

        // timeouts of 300 or less are seconds, larger values are milliseconds
        let query_timeout = match maps.get_u32("resolver-query-timeout")? {
            Some(0) | None => MIN_QUERY_TIMEOUT,
            Some(secs) if secs <= 300 => Duration::from_secs(u64::from(secs)),
            Some(millis) => Duration::from_millis(u64::from(millis)),
        }
        .clamp(MIN_QUERY_TIMEOUT, MAX_QUERY_TIMEOUT);

        let fetches_per_zone = FetchQuota {
            limit: maps.get_u32("fetches-per-zone")?.unwrap_or(0),
            response: quota_response(maps, "fetches-per-zone-response", QuotaResponse::Drop)?,
        };
        let fetches_per_server = FetchQuota {
            limit: maps.get_u32("fetches-per-server")?.unwrap_or(0),
            response: quota_response(maps, "fetches-per-server-response", QuotaResponse::Fail)?,
        };

        let clients_per_query = maps.get_u32("clients-per-query")?.unwrap_or(10);
        let max_clients_per_query = maps
            .get_u32("max-clients-per-query")?
            .unwrap_or(100)
            .max(clients_per_query);

        Ok(Self {
            query_source_v4,
            query_source_v6,
            port,
            edns_udp_size: udp_size(maps, "edns-udp-size")?,
            max_udp_size: udp_size(maps, "max-udp-size")?,
            lame_ttl: secs(maps, "lame-ttl", 0)?.min(MAX_LAME_TTL),
            servfail_ttl: secs(maps, "servfail-ttl", 1)?.min(MAX_SERVFAIL_TTL),
            query_timeout,
            retry_interval: Duration::from_millis(u64::from(
                maps.get_u32("resolver-retry-interval")?.unwrap_or(800).clamp(300, 2000),
            )),
            nonbackoff_tries: maps.get_u32("resolver-nonbackoff-tries")?.unwrap_or(3).max(1),
            max_rsa_exponent_size: maps.get_u32("max-rsa-exponent-size")?.unwrap_or(0),
            clients_per_query,
            max_clients_per_query,
            max_recursion_depth: maps.get_u32("max-recursion-depth")?.unwrap_or(7),
            max_recursion_queries: maps.get_u32("max-recursion-queries")?.unwrap_or(100),
            fetches_per_zone,
            fetches_per_server,
            disabled_algorithms: disabled(maps, "disable-algorithms", ALGORITHMS)?,
            disabled_ds_digests: disabled(maps, "disable-ds-digests", DIGESTS)?,
            zero_no_soa_ttl: maps.bool_or("zero-no-soa-ttl-cache", false)?,
            dscp_v4: dscp(maps, "query-source-dscp")?,
            dscp_v6: dscp(maps, "query-source-v6-dscp")?,
        })
    }

    /// True if `algorithm` is disabled at or above `name`
    pub fn algorithm_disabled(&self, name: &Name, algorithm: u8) -> bool {
        self.disabled_algorithms
            .iter()
            .any(|d| d.domain.zone_of(name) && d.numbers.contains(&algorithm))
    }
}

fn quota_response(maps: &ConfigMaps<'_>, key: &str, default: QuotaResponse) -> ConfigResult<QuotaResponse> {
    maps.get_str(key)?
        .map(|text| text.parse().map_err(|e: String| ConfigError::invalid(key, e)))
        .transpose()
        .map(|r| r.unwrap_or(default))
}

fn udp_size(maps: &ConfigMaps<'_>, key: &str) -> ConfigResult<u16> {
    let size = maps.get_u32(key)?.unwrap_or(1232).clamp(512, 4096);
    Ok(size as u16)
}

fn secs(maps: &ConfigMaps<'_>, key: &str, default: u32) -> ConfigResult<Duration> {
    Ok(Duration::from_secs(u64::from(maps.get_secs(key)?.unwrap_or(default))))
}

fn dscp(maps: &ConfigMaps<'_>, key: &str) -> ConfigResult<Option<u8>> {
    match maps.get_u32(key)? {
        None => Ok(None),
        Some(value) if value < 64 => Ok(Some(value as u8)),
        Some(value) => Err(ConfigError::invalid(key, format_args!("{value} is out of range"))),
    }
}

static NEXT_DISPATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A UDP query-source binding
#[derive(Debug)]
pub struct Dispatch {
    id: u64,
    local: SocketAddr,
    exclusive: bool,
}

impl Dispatch {
    /// Unique id of the dispatcher
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bound local address
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// True if the dispatcher uses its own randomised port per query
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

/// Hands out dispatchers, sharing those bound to fixed ports
#[derive(Debug, Default)]
pub struct DispatchManager {
    shared: Mutex<HashMap<SocketAddr, Weak<Dispatch>>>,
}

impl DispatchManager {
    /// Constructs an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher for `local`.
    ///
    /// A fixed port is shared between all views naming the same address; port zero
    /// gets an exclusive dispatcher with a random port.
    pub fn get(&self, local: SocketAddr, first_view: bool) -> Arc<Dispatch> {
        if local.port() == 0 {
            let mut addr = local;
            addr.set_port(rand::thread_rng().gen_range(1024..=u16::MAX));
            debug!("exclusive dispatcher for {local}, first port {}", addr.port());
            return Arc::new(Dispatch {
                id: NEXT_DISPATCH_ID.fetch_add(1, Ordering::Relaxed),
                local: addr,
                exclusive: true,
            });
        }

        if first_view {
            info!("using specific query-source port {local} suppresses port randomization and can be insecure");
        }

        let mut shared = self.shared.lock();
        shared.retain(|_, d| d.strong_count() > 0);
        if let Some(existing) = shared.get(&local).and_then(Weak::upgrade) {
            return existing;
        }

        let dispatch = Arc::new(Dispatch {
            id: NEXT_DISPATCH_ID.fetch_add(1, Ordering::Relaxed),
            local,
            exclusive: false,
        });
        shared.insert(local, Arc::downgrade(&dispatch));
        dispatch
    }
}

/// The resolver of one view
#[derive(Debug)]
pub struct Resolver {
    settings: ResolverSettings,
    stats: Arc<ResolverStats>,
    dispatch_v4: Option<Arc<Dispatch>>,
    dispatch_v6: Option<Arc<Dispatch>>,
    adb: Arc<Adb>,
    cache: Arc<Cache>,
    dual_stack: Option<DualStackServers>,
}

impl Resolver {
    /// Assembles a resolver
    pub fn new(
        settings: ResolverSettings,
        dispatches: &DispatchManager,
        first_view: bool,
        cache: Arc<Cache>,
        adb: Arc<Adb>,
        stats: Option<Arc<ResolverStats>>,
    ) -> Self {
        let dispatch_v4 = settings.query_source_v4.map(|sa| dispatches.get(sa, first_view));
        let dispatch_v6 = settings.query_source_v6.map(|sa| dispatches.get(sa, first_view));
        Self {
            settings,
            stats: stats.unwrap_or_default(),
            dispatch_v4,
            dispatch_v6,
            adb,
            cache,
            dual_stack: None,
        }
    }

    /// Configured settings
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Counters
    pub fn stats(&self) -> &Arc<ResolverStats> {
        &self.stats
    }

    /// The IPv4 dispatcher
    pub fn dispatch_v4(&self) -> Option<&Arc<Dispatch>> {
        self.dispatch_v4.as_ref()
    }

    /// The IPv6 dispatcher
    pub fn dispatch_v6(&self) -> Option<&Arc<Dispatch>> {
        self.dispatch_v6.as_ref()
    }

    /// The view's ADB
    pub fn adb(&self) -> &Arc<Adb> {
        &self.adb
    }

    /// The cache fetched answers go to
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Alternate servers for the other address family
    pub fn dual_stack(&self) -> Option<&DualStackServers> {
        self.dual_stack.as_ref()
    }

    pub(crate) fn set_dual_stack(&mut self, servers: Option<DualStackServers>) {
        self.dual_stack = servers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OptionMap};

    fn settings(toml: &str) -> ResolverSettings {
        let defaults = Config::defaults().unwrap();
        let view = OptionMap::from_toml(toml).unwrap();
        let maps = ConfigMaps::new([&view, &defaults.options]);
        ResolverSettings::from_maps(&maps).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = settings("");
        assert_eq!(settings.port, 53);
        assert_eq!(settings.query_timeout, Duration::from_secs(10));
        assert_eq!(settings.fetches_per_zone.response, QuotaResponse::Drop);
        assert_eq!(settings.fetches_per_server.response, QuotaResponse::Fail);
        assert_eq!(settings.query_source_v4.unwrap().port(), 0);
        assert!(settings.query_source_v6.unwrap().is_ipv6());
    }

    #[test]
    fn test_clamps() {
        let settings = settings(
            "resolver-query-timeout = 100\nlame-ttl = 7200\nedns-udp-size = 100000\nclients-per-query = 200",
        );
        assert_eq!(settings.query_timeout, Duration::from_secs(30));
        assert_eq!(settings.lame_ttl, Duration::from_secs(1800));
        assert_eq!(settings.edns_udp_size, 4096);
        assert_eq!(settings.max_clients_per_query, 200);
    }

    #[test]
    fn test_disabled_algorithms() {
        let settings = settings(
            r#"disable-algorithms = [{ domain = "example.", algorithms = ["RSASHA1", "8"] }]"#,
        );
        let below = Name::from_str("www.example.").unwrap();
        assert!(settings.algorithm_disabled(&below, 5));
        assert!(settings.algorithm_disabled(&below, 8));
        assert!(!settings.algorithm_disabled(&below, 13));
        assert!(!settings.algorithm_disabled(&Name::from_str("other.").unwrap(), 5));

        let defaults = Config::defaults().unwrap();
        let view = OptionMap::from_toml(
            r#"disable-algorithms = [{ domain = "example.", algorithms = ["NOPE"] }]"#,
        )
        .unwrap();
        assert!(ResolverSettings::from_maps(&ConfigMaps::new([&view, &defaults.options])).is_err());
    }

    #[test]
    fn test_dispatch_sharing() {
        let manager = DispatchManager::new();
        let fixed: SocketAddr = "192.0.2.1:5300".parse().unwrap();
        let a = manager.get(fixed, true);
        let b = manager.get(fixed, false);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_exclusive());

        let any: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let c = manager.get(any, false);
        let d = manager.get(any, false);
        assert!(c.is_exclusive());
        assert_ne!(c.id(), d.id());
        assert_ne!(c.local().port(), 0);
    }
}
