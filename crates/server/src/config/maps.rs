// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Layered option lookup
//!
//! Options are looked up in an ordered list of maps: zone, view, global options and
//! finally the compiled-in defaults. The first map holding the key wins.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::error::{ConfigError, ConfigResult};

/// One layer of options, as written in the configuration document
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OptionMap(Table);

impl OptionMap {
    /// An empty map
    pub fn new() -> Self {
        Self(Table::new())
    }

    /// Parses a map from TOML text
    pub fn from_toml(toml: &str) -> ConfigResult<Self> {
        Ok(Self(toml.parse::<Table>()?))
    }

    /// Returns the raw value for `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets `key`, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes `key`, returning the previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// True if `key` is present in this layer
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates all options of this layer in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of options
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if this layer holds no options
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The underlying TOML table
    pub fn as_table(&self) -> &Table {
        &self.0
    }
}

impl From<Table> for OptionMap {
    fn from(table: Table) -> Self {
        Self(table)
    }
}

/// A cache size setting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeSpec {
    /// No limit
    Unlimited,
    /// Use the built-in default for the setting
    Default,
    /// An absolute size in bytes
    Bytes(u64),
    /// A percentage of physical memory
    Percent(u8),
}

/// Precedence-ordered list of option maps
#[derive(Clone, Debug, Default)]
pub struct ConfigMaps<'a> {
    maps: Vec<&'a OptionMap>,
}

impl<'a> ConfigMaps<'a> {
    /// Builds a lookup over `maps`, highest precedence first
    pub fn new(maps: impl IntoIterator<Item = &'a OptionMap>) -> Self {
        Self {
            maps: maps.into_iter().collect(),
        }
    }

    /// Builds a lookup skipping absent layers
    pub fn from_optional(maps: impl IntoIterator<Item = Option<&'a OptionMap>>) -> Self {
        Self {
            maps: maps.into_iter().flatten().collect(),
        }
    }

    /// Returns a lookup with `first` placed ahead of the current layers
    pub fn with_front(&self, first: &'a OptionMap) -> Self {
        let mut maps = Vec::with_capacity(self.maps.len() + 1);
        maps.push(first);
        maps.extend_from_slice(&self.maps);
        Self { maps }
    }

    /// Returns the first value found for `key`
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.maps.iter().find_map(|m| m.get(key))
    }

    /// True if any layer holds `key`
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Looks up a boolean, accepting `true`/`false` and `yes`/`no`
    pub fn get_bool(&self, key: &str) -> ConfigResult<Option<bool>> {
        self.get(key).map(|v| parse_bool(key, v)).transpose()
    }

    /// Looks up a boolean with a fallback
    pub fn bool_or(&self, key: &str, default: bool) -> ConfigResult<bool> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }

    /// Looks up a string
    pub fn get_str(&self, key: &str) -> ConfigResult<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(ConfigError::invalid(
                key,
                format_args!("expected a string, found {}", other.type_str()),
            )),
        }
    }

    /// Looks up a non-negative integer that fits in 32 bits
    pub fn get_u32(&self, key: &str) -> ConfigResult<Option<u32>> {
        self.get_u64(key)?
            .map(|v| u32::try_from(v).map_err(|_| ConfigError::invalid(key, "value out of range")))
            .transpose()
    }

    /// Looks up a non-negative integer
    pub fn get_u64(&self, key: &str) -> ConfigResult<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Integer(i)) => u64::try_from(*i)
                .map(Some)
                .map_err(|_| ConfigError::invalid(key, "value must not be negative")),
            Some(other) => Err(ConfigError::invalid(
                key,
                format_args!("expected an integer, found {}", other.type_str()),
            )),
        }
    }

    /// Looks up a time interval, either seconds or a string such as `1w2d` or `30m`
    pub fn get_duration(&self, key: &str) -> ConfigResult<Option<Duration>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Integer(i)) => u64::try_from(*i)
                .map(|s| Some(Duration::from_secs(s)))
                .map_err(|_| ConfigError::invalid(key, "interval must not be negative")),
            Some(Value::String(s)) => parse_ttl(s).map(Some).map_err(|e| ConfigError::invalid(key, e)),
            Some(other) => Err(ConfigError::invalid(
                key,
                format_args!("expected an interval, found {}", other.type_str()),
            )),
        }
    }

    /// Looks up a time interval in whole seconds, saturating at `u32::MAX`
    pub fn get_secs(&self, key: &str) -> ConfigResult<Option<u32>> {
        Ok(self
            .get_duration(key)?
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX)))
    }

    /// Looks up a socket address, `default_port` applies when none is given
    pub fn get_sockaddr(&self, key: &str, default_port: u16) -> ConfigResult<Option<SocketAddr>> {
        self.get(key)
            .map(|v| value_to_sockaddr(key, v, default_port))
            .transpose()
    }

    /// Looks up a size, `unlimited`, `default`, a byte count or a percentage
    pub fn get_size(&self, key: &str) -> ConfigResult<Option<SizeSpec>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Integer(i)) => u64::try_from(*i)
                .map(|b| Some(SizeSpec::Bytes(b)))
                .map_err(|_| ConfigError::invalid(key, "size must not be negative")),
            Some(Value::String(s)) => parse_size(s).map(Some).map_err(|e| ConfigError::invalid(key, e)),
            Some(other) => Err(ConfigError::invalid(
                key,
                format_args!("expected a size, found {}", other.type_str()),
            )),
        }
    }

    /// Looks up a percentage written as `NN%`
    pub fn get_percentage(&self, key: &str) -> ConfigResult<Option<u8>> {
        match self.get_size(key)? {
            None => Ok(None),
            Some(SizeSpec::Percent(p)) => Ok(Some(p)),
            Some(_) => Err(ConfigError::invalid(key, "expected a percentage")),
        }
    }

    /// Looks up a list of strings; a single string is accepted as a list of one
    pub fn get_str_list(&self, key: &str) -> ConfigResult<Option<Vec<&'a str>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.as_str()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.as_str()),
                    other => Err(ConfigError::invalid(
                        key,
                        format_args!("expected a list of strings, found {}", other.type_str()),
                    )),
                })
                .collect::<ConfigResult<Vec<_>>>()
                .map(Some),
            Some(other) => Err(ConfigError::invalid(
                key,
                format_args!("expected a list, found {}", other.type_str()),
            )),
        }
    }

    /// Deserializes the value of `key` into a typed structure
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        self.get(key)
            .map(|v| v.clone().try_into::<T>().map_err(|e| ConfigError::invalid(key, e)))
            .transpose()
    }
}

pub(crate) fn parse_bool(key: &str, value: &Value) -> ConfigResult<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(true),
            "no" | "false" => Ok(false),
            _ => Err(ConfigError::invalid(key, format_args!("'{s}' is not a boolean"))),
        },
        other => Err(ConfigError::invalid(
            key,
            format_args!("expected a boolean, found {}", other.type_str()),
        )),
    }
}

/// Parses a time interval such as `86400`, `1d`, `2h30m` or `1w`
pub fn parse_ttl(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty interval".to_string());
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c.to_ascii_lowercase() {
            'w' => 7 * 24 * 3600,
            'd' => 24 * 3600,
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("bad unit '{c}' in interval '{text}'")),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{c}' in interval '{text}'"))?;
        digits.clear();
        total = n
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("interval '{text}' is too large"))?;
    }
    if !digits.is_empty() {
        return Err(format!("trailing number without a unit in interval '{text}'"));
    }

    Ok(Duration::from_secs(total))
}

/// Parses `unlimited`, `default`, `NN%` or a byte count with an optional k/m/g suffix
pub fn parse_size(text: &str) -> Result<SizeSpec, String> {
    let lower = text.trim().to_ascii_lowercase();
    match lower.as_str() {
        "unlimited" => return Ok(SizeSpec::Unlimited),
        "default" => return Ok(SizeSpec::Default),
        _ => (),
    }

    if let Some(pct) = lower.strip_suffix('%') {
        let pct = pct
            .parse::<u8>()
            .map_err(|_| format!("bad percentage '{text}'"))?;
        if pct > 100 {
            return Err(format!("percentage '{text}' exceeds 100%"));
        }
        return Ok(SizeSpec::Percent(pct));
    }

    let (number, scale) = match lower.chars().last() {
        Some('k') => (&lower[..lower.len() - 1], 1024),
        Some('m') => (&lower[..lower.len() - 1], 1024 * 1024),
        Some('g') => (&lower[..lower.len() - 1], 1024 * 1024 * 1024),
        _ => (lower.as_str(), 1),
    };
    number
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .map(SizeSpec::Bytes)
        .ok_or_else(|| format!("bad size '{text}'"))
}

/// Parses `addr`, `addr port N`, `addr#N` or `[v6]:N` into a socket address
pub fn parse_sockaddr(text: &str, default_port: u16) -> Result<SocketAddr, String> {
    let text = text.trim();
    if let Ok(addr) = SocketAddr::from_str(text) {
        return Ok(addr);
    }

    let mut words = text.split_whitespace();
    let addr = words.next().ok_or_else(|| "empty address".to_string())?;
    let (addr, mut port) = match addr.split_once('#') {
        Some((a, p)) => (a, Some(p.parse::<u16>().map_err(|_| format!("bad port in '{text}'"))?)),
        None => (addr, None),
    };
    let ip = match addr {
        "*" => IpAddr::from([0, 0, 0, 0]),
        _ => IpAddr::from_str(addr).map_err(|e| format!("bad address '{addr}': {e}"))?,
    };

    match (words.next(), words.next()) {
        (None, _) => (),
        (Some("port"), Some(p)) => {
            port = Some(match p {
                "*" => 0,
                _ => p.parse::<u16>().map_err(|_| format!("bad port in '{text}'"))?,
            })
        }
        _ => return Err(format!("unexpected text in address '{text}'")),
    }

    Ok(SocketAddr::new(ip, port.unwrap_or(default_port)))
}

pub(crate) fn value_to_sockaddr(key: &str, value: &Value, default_port: u16) -> ConfigResult<SocketAddr> {
    match value {
        Value::String(s) => parse_sockaddr(s, default_port).map_err(|e| ConfigError::invalid(key, e)),
        Value::Table(t) => {
            let address = match t.get("address") {
                Some(Value::String(s)) => s.as_str(),
                _ => return Err(ConfigError::invalid(key, "address table needs an 'address' string")),
            };
            let port = match t.get("port") {
                None => default_port,
                Some(Value::Integer(p)) => u16::try_from(*p)
                    .map_err(|_| ConfigError::invalid(key, format_args!("bad port {p}")))?,
                Some(other) => {
                    return Err(ConfigError::invalid(
                        key,
                        format_args!("expected an integer port, found {}", other.type_str()),
                    ))
                }
            };
            parse_sockaddr(address, port).map_err(|e| ConfigError::invalid(key, e))
        }
        other => Err(ConfigError::invalid(
            key,
            format_args!("expected an address, found {}", other.type_str()),
        )),
    }
}

/// Parses a list of socket addresses, as used by `primaries`, `also-notify` or `forwarders`
pub(crate) fn value_to_sockaddrs(key: &str, value: &Value, default_port: u16) -> ConfigResult<Vec<SocketAddr>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| value_to_sockaddr(key, v, default_port))
            .collect(),
        single => Ok(vec![value_to_sockaddr(key, single, default_port)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(toml: &str) -> OptionMap {
        OptionMap::from_toml(toml).expect("bad toml")
    }

    #[test]
    fn test_first_layer_wins() {
        let view = layer("recursion = false");
        let global = layer("recursion = true\nport = 5353");
        let maps = ConfigMaps::new([&view, &global]);

        assert_eq!(maps.get_bool("recursion").unwrap(), Some(false));
        assert_eq!(maps.get_u32("port").unwrap(), Some(5353));
        assert_eq!(maps.get_u32("missing").unwrap(), None);
    }

    #[test]
    fn test_yes_no_booleans() {
        let opts = layer("notify = \"yes\"\nrecursion = \"no\"\nbad = \"maybe\"");
        let maps = ConfigMaps::new([&opts]);

        assert_eq!(maps.get_bool("notify").unwrap(), Some(true));
        assert_eq!(maps.get_bool("recursion").unwrap(), Some(false));
        assert!(maps.get_bool("bad").is_err());
    }

    #[test]
    fn test_ttl_parsing() {
        assert_eq!(parse_ttl("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_ttl("1w").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_ttl("1h30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_ttl("10x").is_err());
        assert!(parse_ttl("1h30").is_err());
    }

    #[test]
    fn test_size_parsing() {
        assert_eq!(parse_size("unlimited").unwrap(), SizeSpec::Unlimited);
        assert_eq!(parse_size("90%").unwrap(), SizeSpec::Percent(90));
        assert_eq!(parse_size("2M").unwrap(), SizeSpec::Bytes(2 * 1024 * 1024));
        assert_eq!(parse_size("512").unwrap(), SizeSpec::Bytes(512));
        assert!(parse_size("101%").is_err());
    }

    #[test]
    fn test_sockaddr_forms() {
        let plain = parse_sockaddr("192.0.2.1", 53).unwrap();
        assert_eq!(plain, "192.0.2.1:53".parse().unwrap());

        let with_port = parse_sockaddr("192.0.2.1 port 5300", 53).unwrap();
        assert_eq!(with_port.port(), 5300);

        let hashed = parse_sockaddr("2001:db8::1#5353", 53).unwrap();
        assert_eq!(hashed, "[2001:db8::1]:5353".parse().unwrap());

        let any = parse_sockaddr("* port *", 53).unwrap();
        assert_eq!(any.port(), 0);
    }

    #[test]
    fn test_typed_lookup() {
        #[derive(Deserialize)]
        struct Limits {
            responses: u32,
        }

        let opts = layer("[rate-limit]\nresponses = 5");
        let maps = ConfigMaps::new([&opts]);
        let limits: Limits = maps.get_as("rate-limit").unwrap().unwrap();
        assert_eq!(limits.responses, 5);
    }
}
