// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use ipnet::IpNet;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::empty::{configure_empty_zones, EmptyZoneSettings};
use super::{AnswerPolicy, DnssecSettings, Hints, OrderRule, Peer, View, ViewAcls, ViewList};
use crate::acl::{recursion_acls, AclContext, AclLayers};
use crate::cache::{self, attach_cache, CacheParams, CacheRegistry, CheckNames};
use crate::catz::configure_catz;
use crate::config::{
    Config, ConfigMaps, OptionMap, SizeSpec, TrustAnchorConfig, ViewConfig, ZoneConfig, DEFAULT_VIEW,
};
use crate::drivers::DriverRegistry;
use crate::error::{ConfigError, ConfigResult, ErrorKind, Result};
use crate::forward::{forwarders_from, DualStackServers};
use crate::keys::{DynamicKeyring, KeyTable, Keyring, NtaTable, TrustAnchor, TsigKey, ValidationMode};
use crate::proto::rr::{DNSClass, Name};
use crate::resolver::{Adb, DispatchManager, Resolver, ResolverSettings};
use crate::reuse::try_reuse;
use crate::rpz::{configure_rpz, PolicyService};
use crate::rrl::RateLimit;
use crate::store::{open_store, view_file_stem, StoreKind};
use crate::zone::{configure_zone, Zone, ZoneConfigurer, ZoneKind, ZoneManager, ZoneOptions};

const DNSTAP_TYPES: &[&str] = &["all", "auth", "client", "forwarder", "resolver", "update"];
const DNS64_PREFIX_LENS: &[u8] = &[32, 40, 48, 56, 64, 96];

/// Where a view's settings come from
#[derive(Clone, Copy)]
pub(crate) struct ViewSource<'a> {
    /// The `[[views]]` entry, `None` for the implicit default view
    pub(crate) config: Option<&'a ViewConfig>,
    /// The zone stanzas of the view
    pub(crate) zones: &'a [ZoneConfig],
    /// True for the compiled-in views, which get no RPZ, catalog zones or hints
    pub(crate) builtin: bool,
}

/// Everything shared by the views of one reconfiguration
pub(crate) struct ViewBuilder<'a> {
    pub(crate) config: &'a Config,
    pub(crate) defaults: &'a Config,
    pub(crate) acls: &'a AclContext<'a>,
    pub(crate) outgoing: Option<&'a ViewList>,
    pub(crate) zone_manager: &'a ZoneManager,
    pub(crate) dispatches: &'a DispatchManager,
    pub(crate) drivers: &'a DriverRegistry,
    pub(crate) policy_service: Option<&'a dyn PolicyService>,
    pub(crate) session_key: Option<&'a Arc<TsigKey>>,
    pub(crate) bindkeys: Option<&'a [TrustAnchorConfig]>,
    pub(crate) directory: &'a Path,
}

impl<'a> ViewBuilder<'a> {
    fn zone_configurer<'b>(
        &'b self,
        view: &'b View,
        view_options: Option<&'b OptionMap>,
        outgoing: Option<&'b View>,
        configured: &'b [Arc<View>],
        old_rpz_ok: bool,
    ) -> ZoneConfigurer<'b> {
        ZoneConfigurer {
            view,
            view_options,
            global: Some(&self.config.options),
            defaults: &self.defaults.options,
            outgoing,
            configured,
            acls: self.acls,
            zone_manager: self.zone_manager,
            directory: self.directory,
            old_rpz_ok,
        }
    }

    fn state_file(&self, view: &str, extension: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{extension}", view_file_stem(view)))
    }

    /// Configures `view` from `source`.
    ///
    /// On error the view is left as far as it got; the caller reverts the zone
    /// bindings of every view of the pass and drops them.
    pub(crate) fn configure_view(
        &self,
        view: &mut View,
        source: ViewSource<'_>,
        configured: &[Arc<View>],
        caches: &mut CacheRegistry,
        first_view: bool,
    ) -> Result<()> {
        let name = view.name().to_string();
        let class = view.class();
        let view_options = source.config.map(|v| &v.options);
        let maps = ConfigMaps::from_optional([
            view_options,
            Some(&self.config.options),
            Some(&self.defaults.options),
        ]);
        let outgoing = self.outgoing.and_then(|l| l.find(&name, class)).cloned();
        let outgoing = outgoing.as_deref();

        debug!("configuring view {view}");
        view.recursion = maps.bool_or("recursion", true)?;
        view.allow_new_zones = maps.bool_or("allow-new-zones", false)?;
        view.new_zones_directory = match maps.get_str("new-zones-directory")? {
            Some(dir) => self.directory.join(dir),
            None => self.directory.to_path_buf(),
        };

        // policy and catalog tables must exist before the zones that feed them
        let mut old_rpz_ok = false;
        if class == DNSClass::IN && !source.builtin {
            let outcome = configure_rpz(&maps, outgoing.and_then(View::rpz), self.policy_service)?;
            view.rpz = outcome.table;
            old_rpz_ok = outcome.old_rpz_ok;
            view.catz = configure_catz(&maps, outgoing.and_then(View::catz))?;
        }

        {
            let cfg = self.zone_configurer(view, view_options, outgoing, configured, old_rpz_ok);
            for stanza in source.zones {
                let stanza = builtin_stanza(stanza, &maps)?;
                configure_zone(&cfg, &stanza, false, false)?;
            }
            configure_catz_members(&cfg)?;
        }
        check_rpz_zones(view)?;

        if view.allow_new_zones {
            let kind = maps
                .get_str("new-zone-store")?
                .map(StoreKind::from_str)
                .transpose()
                .map_err(|e| ConfigError::invalid("new-zone-store", e))?
                .unwrap_or_default();
            let store = open_store(kind, &view.new_zones_directory, &name)?;
            let migrated = store.migrate_legacy_format()?;
            if migrated > 0 {
                info!("view {view}: migrated {migrated} zones to {}", store.path().display());
            }

            let cfg = self.zone_configurer(view, view_options, outgoing, configured, old_rpz_ok);
            let mut loaded = 0;
            store.for_each(&mut |stanza| {
                configure_zone(&cfg, &stanza, true, false)?;
                loaded += 1;
                Ok(())
            })?;
            if loaded > 0 {
                info!("view {name}: {loaded} zones configured from {}", store.path().display());
            }
            view.store = Some(store);
        }

        let dlz = source.config.map_or(&self.config.dlz, |v| &v.dlz);
        for config in dlz {
            let db = self.drivers.create_dlz(config, class)?;
            if config.search {
                db.configure(&name).map_err(|reason| ErrorKind::DriverFailed {
                    kind: "dlz",
                    name: config.name.clone(),
                    reason,
                })?;
                view.dlz.push(db);
            } else {
                debug!("view {name}: dlz '{}' is only used by its zones", config.name);
            }
        }

        // cache
        let validation = ValidationMode::from_maps(&maps)?;
        let accept_expired = maps.bool_or("dnssec-accept-expired", false)?;
        let max_cache_size = cache::max_cache_size(
            maps.get_size("max-cache-size")?.unwrap_or(SizeSpec::Default),
            &name,
        );
        let params = CacheParams {
            class,
            check_names: CheckNames::from_maps(&maps)?,
            zero_no_soa_ttl: maps.bool_or("zero-no-soa-ttl-cache", false)?,
            accept_expired,
            enable_validation: validation.is_enabled(),
            max_cache_ttl: maps.get_secs("max-cache-ttl")?.unwrap_or(604_800),
            max_ncache_ttl: maps.get_secs("max-ncache-ttl")?.unwrap_or(10_800),
            cleaning_interval: maps.get_secs("cleaning-interval")?.unwrap_or(0),
            max_stale_ttl: if maps.bool_or("stale-answer-enable", false)? {
                maps.get_secs("max-stale-ttl")?.unwrap_or(43_200)
            } else {
                0
            },
            max_cache_size,
        };
        let cache_name = maps
            .get_str("attach-cache")?
            .map_or_else(|| name.clone(), str::to_string);
        let outgoing_cache = outgoing
            .and_then(View::cache)
            .filter(|c| c.name() == cache_name);

        let attachment = attach_cache(caches, &cache_name, &name, &params, outgoing_cache)?;
        let cache = Arc::clone(attachment.entry.cache());
        if !attachment.shared {
            cache.configure(max_cache_size, params.cleaning_interval, params.max_stale_ttl);
        }
        if !attachment.shared && !attachment.reused {
            if let Some(path) = cache::cache_file(&maps, self.directory)? {
                match cache.load_file(&path) {
                    Ok(count) => info!("view {name}: {count} entries loaded from {}", path.display()),
                    Err(e) => warn!("view {name}: could not load cache file {}: {e}", path.display()),
                }
            }
        }
        view.dns64 = dns64_prefixes(&maps)?;

        // resolver
        let settings = ResolverSettings::from_maps(&maps)?;
        let adb = Arc::new(Adb::new(attachment.entry.adb_size(&name, max_cache_size)));
        if !attachment.shared {
            attachment.entry.set_primary_adb(Arc::clone(&adb));
        }
        let stats = outgoing
            .and_then(View::resolver)
            .map(|r| Arc::clone(r.stats()));
        let mut resolver = Resolver::new(settings, self.dispatches, first_view, Arc::clone(&cache), adb, stats);

        if let Some(forwarders) = forwarders_from(&maps)? {
            if view.forwarders_at(&Name::root()).is_none() {
                view.add_forwarders(Name::root(), forwarders);
            }
        }
        resolver.set_dual_stack(DualStackServers::from_maps(&maps)?);
        view.resolver = Some(resolver);

        if view.hints().is_none() && !source.builtin {
            if class == DNSClass::IN {
                view.set_hints(Some(Hints::Builtin));
            } else if view.zone(&Name::root()).is_none() {
                warn!("view {view}: no root hints");
            }
        }

        if attachment.reused {
            if let Some(old) = outgoing {
                let root = Name::root();
                if old.forwarders_at(&root) != view.forwarders_at(&root) || old.hints() != view.hints() {
                    info!("view {name}: root forwarding or hints changed, cache will be flushed");
                    attachment.entry.set_needs_flush();
                }
            }
        }
        view.cache = Some(cache);
        view.cache_params = Some(params);
        view.cache_shared = attachment.shared;

        // keys
        let view_keys = source.config.map(|v| v.keys.as_slice()).unwrap_or_default();
        let mut keyring = Keyring::from_config(view_keys, &self.config.keys, self.session_key)?;
        let dynamic = match outgoing.and_then(|v| v.keyring().dynamic()) {
            Some(dynamic) => Arc::clone(dynamic),
            None => {
                let path = self.state_file(&name, "tsigkeys");
                Arc::new(DynamicKeyring::restore(&path)?.unwrap_or_default())
            }
        };
        keyring.set_dynamic(dynamic);
        view.keyring = keyring;

        // peers, access control, answer shaping
        let servers = match source.config {
            Some(v) if !v.servers.is_empty() => &v.servers,
            _ => &self.config.servers,
        };
        view.peers = servers
            .iter()
            .map(|p| {
                Ok(Peer {
                    network: p.network()?,
                    options: p.options.clone(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let layers = AclLayers {
            view: view_options,
            global: Some(&self.config.options),
            defaults: &self.defaults.options,
        };
        view.acls = Some(ViewAcls {
            match_clients: layers.with_defaults(self.acls, "match-clients")?,
            match_destinations: layers.with_defaults(self.acls, "match-destinations")?,
            match_recursive_only: maps.bool_or("match-recursive-only", false)?,
            query: layers.with_defaults(self.acls, "allow-query")?,
            query_on: layers.with_defaults(self.acls, "allow-query-on")?,
            recursion: recursion_acls(&layers, self.acls, view.recursion)?,
            notify: layers.with_defaults(self.acls, "allow-notify")?,
            update: layers.with_defaults(self.acls, "allow-update")?,
            update_forwarding: layers.with_defaults(self.acls, "allow-update-forwarding")?,
            transfer: layers.with_defaults(self.acls, "allow-transfer")?,
        });
        view.answers = answer_policy(&maps, self.acls)?;
        view.root_delegation_only = root_delegation_only(&maps)?;

        // DNSSEC
        if class == DNSClass::IN {
            let view_anchors = source.config.map(|v| v.trust_anchors.as_slice()).unwrap_or_default();
            let configured_anchors = view_anchors
                .iter()
                .chain(&self.config.trust_anchors)
                .map(TrustAnchor::from_config)
                .collect::<ConfigResult<Vec<_>>>()?;
            let mut keytable = KeyTable::load(&name, validation, configured_anchors, self.bindkeys)?;
            keytable.set_must_be_secure(&maps)?;

            let ntas = NtaTable::from_maps(&maps)?;
            match outgoing.and_then(View::ntas) {
                Some(old) => {
                    let count = ntas.carry_from(old);
                    debug!("view {name}: {count} negative trust anchors carried forward");
                }
                None => {
                    let nta_file = self.state_file(&name, "nta");
                    match ntas.restore(&nta_file) {
                        Ok(0) => (),
                        Ok(count) => info!("view {name}: {count} negative trust anchors restored"),
                        Err(e) => warn!("view {name}: reading {} failed: {e}", nta_file.display()),
                    }
                }
            }

            view.managed_keys = Some(self.managed_keys_zone(view, outgoing, &maps)?);
            view.dnssec = Some(DnssecSettings {
                validation,
                accept_expired,
                keytable,
                ntas,
            });
        }

        let dyndb = source.config.map_or(&self.config.dyndb, |v| &v.dyndb);
        for config in dyndb {
            view.dyndb.push(self.drivers.load_dyndb(config, &name)?);
        }

        {
            let settings = EmptyZoneSettings::from_maps(&maps, view.recursion)?;
            let cfg = self.zone_configurer(view, view_options, outgoing, configured, old_rpz_ok);
            configure_empty_zones(&cfg, &settings)?;
        }

        view.rrl = RateLimit::from_maps(&maps, self.acls)?;
        view.dnstap = dnstap_types(&maps)?;

        info!(
            "view {view}: configured with {} zones{}",
            view.zone_count(),
            if view.cache_shared { ", shared cache" } else { "" }
        );
        Ok(())
    }

    fn managed_keys_zone(&self, view: &View, outgoing: Option<&View>, maps: &ConfigMaps<'_>) -> Result<Arc<Zone>> {
        let directory = match maps.get_str("managed-keys-directory")? {
            Some(dir) => self.directory.join(dir),
            None => self.directory.to_path_buf(),
        };
        let file = if view.name() == DEFAULT_VIEW {
            "managed-keys.bind".to_string()
        } else {
            format!("{}.mkeys", view_file_stem(view.name()))
        };

        let db_args = vec!["rbt".to_string()];
        let candidate = outgoing.and_then(View::managed_keys);
        let zone = try_reuse("managed-keys zone", view.id(), candidate, |zone| {
            if zone.db_args() == db_args.as_slice() {
                Ok(())
            } else {
                Err("database changed")
            }
        })
        .unwrap_or_else(|| {
            let zone = Zone::new(Name::root(), view.class(), ZoneKind::Key, db_args.clone());
            self.zone_manager.manage(&zone);
            zone
        });

        zone.set_view(view.id());
        zone.set_options(ZoneOptions {
            path: Some(directory.join(&file)),
            journal: Some(directory.join(format!("{file}.jnl"))),
            file: Some(file),
            ..ZoneOptions::default()
        });
        Ok(zone)
    }
}

/// Re-adds the members of catalog zones that were carried forward
fn configure_catz_members(cfg: &ZoneConfigurer<'_>) -> Result<()> {
    let Some(catalogs) = cfg.view.catz() else {
        return Ok(());
    };

    for catalog in catalogs.iter() {
        for entry in catalog.members() {
            if cfg.view.zone(&entry.name).is_some() {
                debug!("catalog zone {}: member {} is configured statically", catalog.origin(), entry.name);
                continue;
            }

            let stanza = catalog.zone_config(&entry, cfg.view.class());
            match configure_zone(cfg, &stanza, true, false) {
                Ok(Some(zone)) => zone.set_parent_catz(Some(catalog.origin().clone())),
                Ok(None) => (),
                Err(e) => warn!("catalog zone {}: member {} not configured: {e}", catalog.origin(), entry.name),
            }
        }
    }
    Ok(())
}

/// Fails if a response-policy zone was listed but never configured
fn check_rpz_zones(view: &View) -> Result<()> {
    let Some(rpz) = view.rpz() else {
        return Ok(());
    };
    if rpz.params().dnsrps_enabled {
        return Ok(());
    }

    let zones = view.zones();
    for policy in rpz.zones() {
        if !zones.iter().any(|z| z.rpz_num() == Some(policy.num)) {
            return Err(ErrorKind::RpzZoneMissing {
                zone: policy.origin.to_string(),
                view: view.name().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Appends the configured answer to `_builtin version`, `hostname` and `id` databases
fn builtin_stanza<'s>(stanza: &'s ZoneConfig, maps: &ConfigMaps<'_>) -> Result<Cow<'s, ZoneConfig>> {
    let Some(toml::Value::String(database)) = stanza.options.get("database") else {
        return Ok(Cow::Borrowed(stanza));
    };
    let mut words = database.split_whitespace();
    if words.next() != Some("_builtin") {
        return Ok(Cow::Borrowed(stanza));
    }

    let answer = match words.next() {
        Some("version") => Some(
            maps.get_str("version")?
                .map_or_else(|| format!("switchyard {}", crate::version()), str::to_string),
        ),
        Some("hostname") => maps.get_str("hostname")?.map(str::to_string).or_else(hostname),
        Some("id") => match maps.get_str("server-id")? {
            Some("hostname") => hostname(),
            other => other.map(str::to_string),
        },
        _ => None,
    };

    match answer {
        Some(answer) if answer != "none" => {
            let mut stanza = stanza.clone();
            stanza.options.insert("database", format!("{database} {answer}"));
            Ok(Cow::Owned(stanza))
        }
        _ => Ok(Cow::Borrowed(stanza)),
    }
}

fn hostname() -> Option<String> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            let mut buf = [0u8; 256];
            // SAFETY: the buffer is valid for writes of its whole length
            let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
            if rc != 0 {
                return None;
            }
            let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
            String::from_utf8(buf[..len].to_vec()).ok()
        } else {
            None
        }
    }
}

fn parse_net(key: &str, text: &str) -> ConfigResult<IpNet> {
    text.parse::<IpNet>()
        .or_else(|_| text.parse::<std::net::IpAddr>().map(IpNet::from))
        .map_err(|e| ConfigError::invalid(key, format_args!("'{text}': {e}")))
}

fn parse_name(key: &str, text: &str) -> ConfigResult<Name> {
    let mut name = Name::from_str(text).map_err(|e| ConfigError::invalid(key, format_args!("'{text}': {e}")))?;
    name.set_fqdn(true);
    Ok(name)
}

fn dns64_prefixes(maps: &ConfigMaps<'_>) -> ConfigResult<Vec<IpNet>> {
    let mut prefixes = Vec::new();
    for text in maps.get_str_list("dns64")?.unwrap_or_default() {
        let prefix = parse_net("dns64", text)?;
        if !matches!(prefix, IpNet::V6(_)) || !DNS64_PREFIX_LENS.contains(&prefix.prefix_len()) {
            return Err(ConfigError::invalid(
                "dns64",
                format_args!("'{text}' must be an IPv6 prefix of length 32, 40, 48, 56, 64 or 96"),
            ));
        }
        prefixes.push(prefix);
    }
    Ok(prefixes)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OrderConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    rr_type: Option<String>,
    order: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PaddingConfig {
    block_size: u16,
}

fn answer_policy(maps: &ConfigMaps<'_>, acls: &AclContext<'_>) -> ConfigResult<AnswerPolicy> {
    let minimal_responses = match maps.get("minimal-responses") {
        None => false,
        Some(toml::Value::Boolean(b)) => *b,
        Some(toml::Value::String(s)) => s != "no",
        Some(other) => {
            return Err(ConfigError::invalid(
                "minimal-responses",
                format_args!("expected boolean or string, found {}", other.type_str()),
            ));
        }
    };

    let response_padding = match maps.get_as::<PaddingConfig>("response-padding")? {
        Some(padding) if padding.block_size > 512 => {
            return Err(ConfigError::invalid("response-padding", "block-size must not exceed 512"));
        }
        Some(padding) => padding.block_size,
        None => 0,
    };

    let mut rrset_order = Vec::new();
    for rule in maps.get_as::<Vec<OrderConfig>>("rrset-order")?.unwrap_or_default() {
        if !matches!(rule.order.as_str(), "fixed" | "random" | "cyclic" | "none") {
            return Err(ConfigError::invalid("rrset-order", format_args!("unknown order '{}'", rule.order)));
        }
        rrset_order.push(OrderRule {
            name: rule.name.as_deref().map(|n| parse_name("rrset-order", n)).transpose()?,
            rr_type: rule.rr_type.map(|t| t.to_ascii_uppercase()),
            order: rule.order,
        });
    }

    Ok(AnswerPolicy {
        message_compression: maps.bool_or("message-compression", true)?,
        minimal_responses,
        response_padding,
        rrset_order,
        deny_answer_addresses: maps
            .get_str_list("deny-answer-addresses")?
            .unwrap_or_default()
            .into_iter()
            .map(|a| parse_net("deny-answer-addresses", a))
            .collect::<ConfigResult<_>>()?,
        deny_answer_aliases: maps
            .get_str_list("deny-answer-aliases")?
            .unwrap_or_default()
            .into_iter()
            .map(|n| parse_name("deny-answer-aliases", n))
            .collect::<ConfigResult<_>>()?,
        sortlist: acls.lookup(maps, "sortlist")?,
    })
}

fn root_delegation_only(maps: &ConfigMaps<'_>) -> ConfigResult<Option<Vec<Name>>> {
    match maps.get("root-delegation-only") {
        None | Some(toml::Value::Boolean(false)) => Ok(None),
        Some(toml::Value::Boolean(true)) => Ok(Some(Vec::new())),
        Some(_) => maps
            .get_str_list("root-delegation-only")?
            .unwrap_or_default()
            .into_iter()
            .map(|n| parse_name("root-delegation-only", n))
            .collect::<ConfigResult<Vec<_>>>()
            .map(Some),
    }
}

fn dnstap_types(maps: &ConfigMaps<'_>) -> ConfigResult<Vec<String>> {
    let mut types = Vec::new();
    for entry in maps.get_str_list("dnstap")?.unwrap_or_default() {
        let mut words = entry.split_whitespace();
        let kind = words.next().unwrap_or_default();
        let mode = words.next();
        if !DNSTAP_TYPES.contains(&kind)
            || !matches!(mode, None | Some("query") | Some("response"))
            || words.next().is_some()
        {
            return Err(ConfigError::invalid("dnstap", format_args!("'{entry}'")));
        }
        types.push(entry.to_string());
    }
    Ok(types)
}
