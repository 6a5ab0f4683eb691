// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Automatic empty zones
//!
//! A recursive view answers authoritatively, and negatively, for the reverse zones of
//! private and special-use address space, so those queries never leak to the public
//! servers.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ConfigMaps;
use crate::error::{ConfigError, ConfigResult, Result};
use crate::forward::ForwardPolicy;
use crate::proto::rr::{DNSClass, Name};
use crate::reuse::try_reuse;
use crate::zone::{Zone, ZoneConfigurer, ZoneKind, ZoneMatch, ZoneOptions};

/// The empty zones created unless disabled or already covered
pub const EMPTY_ZONES: &[&str] = &[
    // RFC 1918
    "10.IN-ADDR.ARPA",
    "16.172.IN-ADDR.ARPA",
    "17.172.IN-ADDR.ARPA",
    "18.172.IN-ADDR.ARPA",
    "19.172.IN-ADDR.ARPA",
    "20.172.IN-ADDR.ARPA",
    "21.172.IN-ADDR.ARPA",
    "22.172.IN-ADDR.ARPA",
    "23.172.IN-ADDR.ARPA",
    "24.172.IN-ADDR.ARPA",
    "25.172.IN-ADDR.ARPA",
    "26.172.IN-ADDR.ARPA",
    "27.172.IN-ADDR.ARPA",
    "28.172.IN-ADDR.ARPA",
    "29.172.IN-ADDR.ARPA",
    "30.172.IN-ADDR.ARPA",
    "31.172.IN-ADDR.ARPA",
    "168.192.IN-ADDR.ARPA",
    // RFC 6598
    "64.100.IN-ADDR.ARPA",
    "65.100.IN-ADDR.ARPA",
    "66.100.IN-ADDR.ARPA",
    "67.100.IN-ADDR.ARPA",
    "68.100.IN-ADDR.ARPA",
    "69.100.IN-ADDR.ARPA",
    "70.100.IN-ADDR.ARPA",
    "71.100.IN-ADDR.ARPA",
    "72.100.IN-ADDR.ARPA",
    "73.100.IN-ADDR.ARPA",
    "74.100.IN-ADDR.ARPA",
    "75.100.IN-ADDR.ARPA",
    "76.100.IN-ADDR.ARPA",
    "77.100.IN-ADDR.ARPA",
    "78.100.IN-ADDR.ARPA",
    "79.100.IN-ADDR.ARPA",
    "80.100.IN-ADDR.ARPA",
    "81.100.IN-ADDR.ARPA",
    "82.100.IN-ADDR.ARPA",
    "83.100.IN-ADDR.ARPA",
    "84.100.IN-ADDR.ARPA",
    "85.100.IN-ADDR.ARPA",
    "86.100.IN-ADDR.ARPA",
    "87.100.IN-ADDR.ARPA",
    "88.100.IN-ADDR.ARPA",
    "89.100.IN-ADDR.ARPA",
    "90.100.IN-ADDR.ARPA",
    "91.100.IN-ADDR.ARPA",
    "92.100.IN-ADDR.ARPA",
    "93.100.IN-ADDR.ARPA",
    "94.100.IN-ADDR.ARPA",
    "95.100.IN-ADDR.ARPA",
    "96.100.IN-ADDR.ARPA",
    "97.100.IN-ADDR.ARPA",
    "98.100.IN-ADDR.ARPA",
    "99.100.IN-ADDR.ARPA",
    "100.100.IN-ADDR.ARPA",
    "101.100.IN-ADDR.ARPA",
    "102.100.IN-ADDR.ARPA",
    "103.100.IN-ADDR.ARPA",
    "104.100.IN-ADDR.ARPA",
    "105.100.IN-ADDR.ARPA",
    "106.100.IN-ADDR.ARPA",
    "107.100.IN-ADDR.ARPA",
    "108.100.IN-ADDR.ARPA",
    "109.100.IN-ADDR.ARPA",
    "110.100.IN-ADDR.ARPA",
    "111.100.IN-ADDR.ARPA",
    "112.100.IN-ADDR.ARPA",
    "113.100.IN-ADDR.ARPA",
    "114.100.IN-ADDR.ARPA",
    "115.100.IN-ADDR.ARPA",
    "116.100.IN-ADDR.ARPA",
    "117.100.IN-ADDR.ARPA",
    "118.100.IN-ADDR.ARPA",
    "119.100.IN-ADDR.ARPA",
    "120.100.IN-ADDR.ARPA",
    "121.100.IN-ADDR.ARPA",
    "122.100.IN-ADDR.ARPA",
    "123.100.IN-ADDR.ARPA",
    "124.100.IN-ADDR.ARPA",
    "125.100.IN-ADDR.ARPA",
    "126.100.IN-ADDR.ARPA",
    "127.100.IN-ADDR.ARPA",
    // RFC 5735 and RFC 5737
    "0.IN-ADDR.ARPA",
    "127.IN-ADDR.ARPA",
    "254.169.IN-ADDR.ARPA",
    "2.0.192.IN-ADDR.ARPA",
    "100.51.198.IN-ADDR.ARPA",
    "113.0.203.IN-ADDR.ARPA",
    "255.255.255.255.IN-ADDR.ARPA",
    // local IPv6 unicast and loopback
    "0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.IP6.ARPA",
    "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.IP6.ARPA",
    // unique local
    "D.F.IP6.ARPA",
    // link local
    "8.E.F.IP6.ARPA",
    "9.E.F.IP6.ARPA",
    "A.E.F.IP6.ARPA",
    "B.E.F.IP6.ARPA",
    // documentation, RFC 3849
    "8.B.D.0.1.0.0.2.IP6.ARPA",
    // RFC 7534
    "EMPTY.AS112.ARPA",
    // RFC 8375
    "HOME.ARPA",
];

/// How a view creates its empty zones
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmptyZoneSettings {
    /// `empty-zones-enable`, defaulting to the view's recursion setting
    pub enabled: bool,
    /// `disable-empty-zone` entries
    pub disabled: Vec<Name>,
    /// SOA MNAME; the zone's own name when `None`
    pub server: Option<Name>,
    /// SOA RNAME
    pub contact: Name,
}

impl EmptyZoneSettings {
    /// Reads the settings from `maps`
    pub fn from_maps(maps: &ConfigMaps<'_>, recursion: bool) -> ConfigResult<Self> {
        let enabled = maps.get_bool("empty-zones-enable")?.unwrap_or(recursion);

        let disabled = match maps.get_str_list("disable-empty-zone")? {
            Some(names) => names
                .into_iter()
                .map(|n| fqdn("disable-empty-zone", n))
                .collect::<ConfigResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        let server = maps
            .get_str("empty-server")?
            .map(|s| fqdn("empty-server", s))
            .transpose()?;
        let contact = match maps.get_str("empty-contact")? {
            Some(contact) => fqdn("empty-contact", contact)?,
            None => Name::root(),
        };

        Ok(Self {
            enabled,
            disabled,
            server,
            contact,
        })
    }

    fn db_args(&self, origin: &Name) -> Vec<String> {
        let server = self.server.as_ref().unwrap_or(origin);
        vec![
            "_builtin".to_string(),
            "empty".to_string(),
            server.to_string(),
            self.contact.to_string(),
        ]
    }
}

fn fqdn(key: &str, text: &str) -> ConfigResult<Name> {
    let mut name = Name::from_str(text).map_err(|e| ConfigError::invalid(key, format_args!("'{text}': {e}")))?;
    name.set_fqdn(true);
    Ok(name)
}

/// Why no empty zone is created at `origin`, if there is a reason
fn covered(cfg: &ZoneConfigurer<'_>, settings: &EmptyZoneSettings, origin: &Name) -> Option<&'static str> {
    let view = cfg.view;
    if settings.disabled.iter().any(|d| d == origin) {
        return Some("disabled");
    }

    match view.find_zone(origin) {
        ZoneMatch::Exact(_) => return Some("zone configured"),
        ZoneMatch::Partial(zone) if !zone.origin().is_root() => return Some("enclosing zone configured"),
        _ => (),
    }

    match view.forwarders_for(origin) {
        Some((_, forwarders)) if forwarders.policy == ForwardPolicy::Only => Some("forward only"),
        _ => None,
    }
}

/// Adds the empty zones `settings` ask for to `cfg.view`, returning how many were added
pub(crate) fn configure_empty_zones(cfg: &ZoneConfigurer<'_>, settings: &EmptyZoneSettings) -> Result<usize> {
    let view = cfg.view;
    if view.class() != DNSClass::IN || !settings.enabled {
        return Ok(0);
    }

    let mut added = 0;
    for empty in EMPTY_ZONES {
        let origin = fqdn("empty zone", empty)?;
        if let Some(reason) = covered(cfg, settings, &origin) {
            debug!("view {view}: no empty zone {origin}: {reason}");
            continue;
        }

        let db_args = settings.db_args(&origin);
        let candidate = cfg.outgoing.and_then(|v| v.zone(&origin));
        let zone = try_reuse("empty zone", &origin, candidate.as_ref(), |zone| {
            if !zone.is_automatic() {
                Err("not an empty zone")
            } else if zone.db_args() != db_args.as_slice() {
                Err("empty-server or empty-contact changed")
            } else {
                Ok(())
            }
        })
        .unwrap_or_else(|| {
            let zone = Zone::new(origin.clone(), DNSClass::IN, ZoneKind::Primary, db_args);
            cfg.zone_manager.manage(&zone);
            zone.set_automatic(true);
            zone
        });

        zone.set_view(view.id());
        zone.set_options(ZoneOptions::default());
        if let Err(e) = view.add_zone(Arc::clone(&zone)) {
            zone.view_revert();
            return Err(e);
        }
        added += 1;
    }

    if added > 0 {
        info!("view {view}: {added} automatic empty zones");
    }
    Ok(added)
}
