// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Response rate limiting settings

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::Deserialize;
use toml::Value;

use crate::acl::{Acl, AclContext};
use crate::config::ConfigMaps;
use crate::error::{ConfigError, ConfigResult};

const MAX_RATE: u32 = 1000;
const MAX_SLIP: u32 = 10;
const MAX_WINDOW: u32 = 3600;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RateLimitConfig {
    responses_per_second: Option<u32>,
    referrals_per_second: Option<u32>,
    nodata_per_second: Option<u32>,
    nxdomains_per_second: Option<u32>,
    errors_per_second: Option<u32>,
    all_per_second: Option<u32>,
    slip: Option<u32>,
    window: Option<u32>,
    qps_scale: Option<u32>,
    ipv4_prefix_length: Option<u8>,
    ipv6_prefix_length: Option<u8>,
    max_table_size: Option<u32>,
    min_table_size: Option<u32>,
    exempt_clients: Option<Value>,
    log_only: Option<bool>,
}

/// Per-response-class limits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rates {
    /// Positive answers
    pub responses: u32,
    /// Referrals and delegations
    pub referrals: u32,
    /// NODATA answers
    pub nodata: u32,
    /// NXDOMAIN answers
    pub nxdomains: u32,
    /// Error responses
    pub errors: u32,
    /// All responses together
    pub all: u32,
}

/// Response rate limiting for one view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Limits per second
    pub rates: Rates,
    /// Every nth dropped response is sent truncated instead
    pub slip: u32,
    /// Seconds over which rates are averaged
    pub window: u32,
    /// Query rate at which limits start scaling down, zero for off
    pub qps_scale: u32,
    /// Mask applied to IPv4 clients
    pub ipv4_mask: Ipv4Addr,
    /// Mask applied to IPv6 clients
    pub ipv6_mask: Ipv6Addr,
    /// Upper bound of the state table
    pub max_table_size: u32,
    /// Initial size of the state table
    pub min_table_size: u32,
    /// Clients never limited
    pub exempt: Acl,
    /// Log what would be limited but answer anyway
    pub log_only: bool,
}

fn limited(key: &str, value: Option<u32>, default: u32, max: u32) -> ConfigResult<u32> {
    match value {
        None => Ok(default),
        Some(v) if v <= max => Ok(v),
        Some(v) => Err(ConfigError::invalid(key, format_args!("{v} exceeds {max}"))),
    }
}

impl RateLimit {
    /// Reads `rate-limit`, `None` when absent
    pub fn from_maps(maps: &ConfigMaps<'_>, acls: &AclContext<'_>) -> ConfigResult<Option<Self>> {
        let Some(config) = maps.get_as::<RateLimitConfig>("rate-limit")? else {
            return Ok(None);
        };

        let responses = limited("responses-per-second", config.responses_per_second, 0, MAX_RATE)?;
        let rates = Rates {
            responses,
            referrals: limited("referrals-per-second", config.referrals_per_second, responses, MAX_RATE)?,
            nodata: limited("nodata-per-second", config.nodata_per_second, responses, MAX_RATE)?,
            nxdomains: limited("nxdomains-per-second", config.nxdomains_per_second, responses, MAX_RATE)?,
            errors: limited("errors-per-second", config.errors_per_second, responses, MAX_RATE)?,
            all: limited("all-per-second", config.all_per_second, 0, MAX_RATE)?,
        };

        let ipv4_prefix = config.ipv4_prefix_length.unwrap_or(24);
        if ipv4_prefix > 32 {
            return Err(ConfigError::invalid("ipv4-prefix-length", ipv4_prefix));
        }
        let ipv6_prefix = config.ipv6_prefix_length.unwrap_or(56);
        if ipv6_prefix > 128 {
            return Err(ConfigError::invalid("ipv6-prefix-length", ipv6_prefix));
        }

        let max_table_size = config.max_table_size.unwrap_or(20_000);
        let min_table_size = config.min_table_size.unwrap_or(500).clamp(1, max_table_size.max(1));

        let exempt = match &config.exempt_clients {
            Some(value) => acls.compile("exempt-clients", value)?,
            None => Acl::none(),
        };

        Ok(Some(Self {
            rates,
            slip: limited("slip", config.slip, 2, MAX_SLIP)?,
            window: limited("window", config.window, 15, MAX_WINDOW)?.max(1),
            qps_scale: config.qps_scale.unwrap_or(0),
            ipv4_mask: Ipv4Addr::from(prefix_mask_v4(ipv4_prefix)),
            ipv6_mask: Ipv6Addr::from(prefix_mask_v6(ipv6_prefix)),
            max_table_size,
            min_table_size,
            exempt,
            log_only: config.log_only.unwrap_or(false),
        }))
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}
