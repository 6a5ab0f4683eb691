// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Address match lists
//!
//! An [`Acl`] is an ordered list of elements; the first element matching a client
//! decides, a negated element denies. Named ACLs from the `acls` table of the
//! configuration may be referenced by name and nest.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use ipnet::IpNet;
use toml::Value;

use crate::config::{ConfigMaps, OptionMap};
use crate::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::proto::rr::Name;

const MAX_ACL_DEPTH: usize = 16;

/// One element of an address match list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AclElement {
    /// Matches every client
    Any,
    /// Matches no client
    None,
    /// The server's own addresses
    Localhost,
    /// Networks the server is directly attached to
    Localnets,
    /// An address prefix
    Net(IpNet),
    /// Requests signed with this TSIG key
    Key(Name),
    /// A nested list, by name or inline
    Nested(Arc<Acl>),
}

/// An element together with its negation flag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    negated: bool,
    element: AclElement,
}

impl AclEntry {
    /// True if this entry denies on match
    pub fn negated(&self) -> bool {
        self.negated
    }

    /// The matched element
    pub fn element(&self) -> &AclElement {
        &self.element
    }
}

/// The server's own addresses and attached networks
#[derive(Clone, Debug)]
pub struct AclEnv {
    /// Addresses for `localhost`
    pub localhost: Vec<IpNet>,
    /// Networks for `localnets`
    pub localnets: Vec<IpNet>,
}

impl Default for AclEnv {
    fn default() -> Self {
        let loopback = vec![
            IpNet::from(IpAddr::from([127, 0, 0, 1])),
            IpNet::from(IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1])),
        ];
        let mut localnets = vec![
            IpNet::new(IpAddr::from([127, 0, 0, 0]), 8).unwrap_or(loopback[0]),
            loopback[1],
        ];
        localnets.dedup();
        Self {
            localhost: loopback,
            localnets,
        }
    }
}

/// The identity of a client being checked against an ACL
#[derive(Clone, Copy, Debug)]
pub struct Client<'a> {
    /// Source address
    pub addr: IpAddr,
    /// TSIG key that signed the request, if any
    pub key: Option<&'a Name>,
}

/// An ordered address match list
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Acl {
    entries: Vec<AclEntry>,
}

impl Acl {
    /// `{ any; }`
    pub fn any() -> Self {
        Self {
            entries: vec![AclEntry {
                negated: false,
                element: AclElement::Any,
            }],
        }
    }

    /// `{ none; }`
    pub fn none() -> Self {
        Self {
            entries: vec![AclEntry {
                negated: false,
                element: AclElement::None,
            }],
        }
    }

    /// The entries in match order
    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    /// True if the list allows every client
    pub fn is_any(&self) -> bool {
        matches!(
            self.entries.first(),
            Some(AclEntry {
                negated: false,
                element: AclElement::Any
            })
        )
    }

    /// True if the list can never allow a client
    pub fn is_none(&self) -> bool {
        match self.entries.first() {
            None => true,
            Some(AclEntry {
                negated: false,
                element: AclElement::None,
            }) => self.entries.len() == 1,
            Some(AclEntry {
                negated: true,
                element: AclElement::Any,
            }) => true,
            _ => false,
        }
    }

    /// Evaluates the list, `Some(true)` on a positive match, `Some(false)` on a negated
    /// match and `None` if nothing matched
    pub fn matches(&self, client: Client<'_>, env: &AclEnv) -> Option<bool> {
        for entry in &self.entries {
            let hit = match &entry.element {
                AclElement::Any => Some(true),
                AclElement::None => None,
                AclElement::Localhost => env
                    .localhost
                    .iter()
                    .any(|n| n.contains(&client.addr))
                    .then_some(true),
                AclElement::Localnets => env
                    .localnets
                    .iter()
                    .any(|n| n.contains(&client.addr))
                    .then_some(true),
                AclElement::Net(net) => net.contains(&client.addr).then_some(true),
                AclElement::Key(name) => (client.key == Some(name)).then_some(true),
                AclElement::Nested(acl) => acl.matches(client, env),
            };

            if let Some(allowed) = hit {
                return Some(allowed != entry.negated);
            }
        }

        None
    }

    /// True if the client is allowed
    pub fn allows(&self, client: Client<'_>, env: &AclEnv) -> bool {
        self.matches(client, env).unwrap_or(false)
    }
}

/// Resolves ACL references against the named ACLs of a configuration
#[derive(Clone, Copy, Debug)]
pub struct AclContext<'a> {
    named: &'a BTreeMap<String, Value>,
}

impl<'a> AclContext<'a> {
    /// A context over the `acls` table
    pub fn new(named: &'a BTreeMap<String, Value>) -> Self {
        Self { named }
    }

    /// Compiles an ACL value: a string, or a list of strings and nested lists
    pub fn compile(&self, key: &str, value: &Value) -> ConfigResult<Acl> {
        self.compile_at(key, value, 0)
    }

    fn compile_at(&self, key: &str, value: &Value, depth: usize) -> ConfigResult<Acl> {
        if depth > MAX_ACL_DEPTH {
            return Err(ConfigError::invalid(key, "ACL nesting too deep or recursive"));
        }

        let mut entries = Vec::new();
        match value {
            Value::Array(items) => {
                for item in items {
                    entries.push(self.entry(key, item, depth)?);
                }
            }
            single => entries.push(self.entry(key, single, depth)?),
        }

        Ok(Acl { entries })
    }

    fn entry(&self, key: &str, value: &Value, depth: usize) -> ConfigResult<AclEntry> {
        let text = match value {
            Value::String(s) => s.trim(),
            Value::Array(_) => {
                return Ok(AclEntry {
                    negated: false,
                    element: AclElement::Nested(Arc::new(self.compile_at(key, value, depth + 1)?)),
                })
            }
            other => {
                return Err(ConfigError::invalid(
                    key,
                    format_args!("expected an address match element, found {}", other.type_str()),
                ))
            }
        };

        let (negated, text) = match text.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };

        let element = match text {
            "any" => AclElement::Any,
            "none" => AclElement::None,
            "localhost" => AclElement::Localhost,
            "localnets" => AclElement::Localnets,
            _ => {
                if let Some(key_name) = text.strip_prefix("key ") {
                    let mut name = Name::from_str(key_name.trim())?;
                    name.set_fqdn(true);
                    AclElement::Key(name)
                } else if let Ok(net) = IpNet::from_str(text) {
                    AclElement::Net(net)
                } else if let Ok(addr) = IpAddr::from_str(text) {
                    AclElement::Net(IpNet::from(addr))
                } else if let Some(named) = self.named.get(text) {
                    AclElement::Nested(Arc::new(self.compile_at(text, named, depth + 1)?))
                } else {
                    return Err(ConfigErrorKind::UndefinedAcl(text.to_string()).into());
                }
            }
        };

        Ok(AclEntry { negated, element })
    }

    /// Looks `key` up across `maps` and compiles it if found
    pub fn lookup(&self, maps: &ConfigMaps<'_>, key: &str) -> ConfigResult<Option<Acl>> {
        maps.get(key).map(|v| self.compile(key, v)).transpose()
    }
}

/// The three places a view ACL can come from
#[derive(Clone, Copy, Debug)]
pub struct AclLayers<'a> {
    /// View options
    pub view: Option<&'a OptionMap>,
    /// Global options
    pub global: Option<&'a OptionMap>,
    /// Compiled-in defaults
    pub defaults: &'a OptionMap,
}

impl<'a> AclLayers<'a> {
    fn lookup(
        &self,
        ctx: &AclContext<'_>,
        key: &str,
        user: bool,
        defaults: bool,
    ) -> ConfigResult<Option<Acl>> {
        let mut maps = Vec::with_capacity(3);
        if user {
            maps.extend(self.view);
            maps.extend(self.global);
        }
        if defaults {
            maps.push(self.defaults);
        }
        ctx.lookup(&ConfigMaps::new(maps), key)
    }

    /// View, then global, then default value of `key`; `any` if nowhere set
    pub fn with_defaults(&self, ctx: &AclContext<'_>, key: &str) -> ConfigResult<Acl> {
        Ok(self.lookup(ctx, key, true, true)?.unwrap_or_else(Acl::any))
    }
}

/// Cache and recursion ACLs of a view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecursionAcls {
    /// `allow-query-cache`
    pub query_cache: Acl,
    /// `allow-query-cache-on`
    pub query_cache_on: Acl,
    /// `allow-recursion`
    pub recursion: Acl,
    /// `allow-recursion-on`
    pub recursion_on: Acl,
}

/// Resolves the cache and recursion ACLs of a view.
///
/// `allow-query-cache` falls back to `allow-recursion`, then, for recursive views, to
/// `allow-query`; `allow-recursion` falls back to the resulting cache ACL. Only after
/// that are the compiled-in defaults consulted. A non-recursive view without an explicit
/// `allow-query-cache` gets `none`.
pub fn recursion_acls(
    layers: &AclLayers<'_>,
    ctx: &AclContext<'_>,
    recursive: bool,
) -> ConfigResult<RecursionAcls> {
    let mut cache_on = layers.lookup(ctx, "allow-query-cache-on", true, true)?;
    let mut recursion_on = layers.lookup(ctx, "allow-recursion-on", true, true)?;

    let mut cache = layers.lookup(ctx, "allow-query-cache", true, false)?;
    let mut recursion = layers.lookup(ctx, "allow-recursion", true, false)?;

    if cache.is_none() && recursion.is_some() {
        cache = recursion.clone();
    }
    if cache.is_none() && recursive {
        cache = layers.lookup(ctx, "allow-query", true, false)?;
    }
    if recursive && recursion.is_none() && cache.is_some() {
        recursion = cache.clone();
    }

    if recursion.is_none() && recursive {
        recursion = layers.lookup(ctx, "allow-recursion", false, true)?;
    }
    if recursion_on.is_none() && recursive {
        recursion_on = layers.lookup(ctx, "allow-recursion-on", false, true)?;
    }
    if cache.is_none() {
        cache = if recursive {
            layers.lookup(ctx, "allow-query-cache", false, true)?
        } else {
            Some(Acl::none())
        };
    }
    if cache_on.is_none() {
        cache_on = layers.lookup(ctx, "allow-query-cache-on", false, true)?;
    }

    Ok(RecursionAcls {
        query_cache: cache.unwrap_or_else(Acl::none),
        query_cache_on: cache_on.unwrap_or_else(Acl::any),
        recursion: if recursive {
            recursion.unwrap_or_else(Acl::none)
        } else {
            Acl::none()
        },
        recursion_on: recursion_on.unwrap_or_else(Acl::any),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(addr: &str) -> Client<'static> {
        Client {
            addr: addr.parse().unwrap(),
            key: None,
        }
    }

    fn map(toml: &str) -> OptionMap {
        OptionMap::from_toml(toml).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let named = BTreeMap::new();
        let ctx = AclContext::new(&named);
        let acl = ctx
            .compile("allow-query", &Value::from(vec!["!192.168.1.5", "192.168.1.0/24"]))
            .unwrap();
        let env = AclEnv::default();

        assert!(!acl.allows(client("192.168.1.5"), &env));
        assert!(acl.allows(client("192.168.1.6"), &env));
        assert_eq!(acl.matches(client("10.0.0.1"), &env), None);
    }

    #[test]
    fn test_named_and_nested() {
        let mut named = BTreeMap::new();
        named.insert("trusted".to_string(), Value::from(vec!["10.0.0.0/8", "localhost"]));
        let ctx = AclContext::new(&named);
        let acl = ctx.compile("allow-recursion", &Value::from("trusted")).unwrap();
        let env = AclEnv::default();

        assert!(acl.allows(client("10.1.2.3"), &env));
        assert!(acl.allows(client("127.0.0.1"), &env));
        assert!(!acl.allows(client("192.0.2.1"), &env));
    }

    #[test]
    fn test_undefined_and_recursive() {
        let mut named = BTreeMap::new();
        named.insert("loop".to_string(), Value::from("loop"));
        let ctx = AclContext::new(&named);

        assert!(matches!(
            ctx.compile("allow-query", &Value::from("missing")).unwrap_err().kind(),
            ConfigErrorKind::UndefinedAcl(_)
        ));
        assert!(ctx.compile("allow-query", &Value::from("loop")).is_err());
    }

    #[test]
    fn test_key_element() {
        let named = BTreeMap::new();
        let ctx = AclContext::new(&named);
        let acl = ctx.compile("allow-update", &Value::from("key ddns-key")).unwrap();
        let key: Name = "ddns-key.".parse().unwrap();

        let signed = Client {
            addr: "192.0.2.1".parse().unwrap(),
            key: Some(&key),
        };
        assert!(acl.allows(signed, &AclEnv::default()));
        assert!(!acl.allows(client("192.0.2.1"), &AclEnv::default()));
    }

    #[test]
    fn test_cache_inherits_recursion() {
        let named = BTreeMap::new();
        let ctx = AclContext::new(&named);
        let defaults = crate::config::Config::defaults().unwrap().options;
        let view = map(r#"allow-recursion = ["10.0.0.0/8"]"#);
        let layers = AclLayers {
            view: Some(&view),
            global: None,
            defaults: &defaults,
        };

        let acls = recursion_acls(&layers, &ctx, true).unwrap();
        assert_eq!(acls.query_cache, acls.recursion);
        assert!(acls.query_cache.allows(client("10.9.9.9"), &AclEnv::default()));
    }

    #[test]
    fn test_recursion_inherits_query() {
        let named = BTreeMap::new();
        let ctx = AclContext::new(&named);
        let defaults = OptionMap::new();
        let global = map(r#"allow-query = ["192.0.2.0/24"]"#);
        let layers = AclLayers {
            view: None,
            global: Some(&global),
            defaults: &defaults,
        };

        let acls = recursion_acls(&layers, &ctx, true).unwrap();
        assert!(acls.recursion.allows(client("192.0.2.9"), &AclEnv::default()));
        assert!(!acls.recursion.allows(client("198.51.100.1"), &AclEnv::default()));
    }

    #[test]
    fn test_non_recursive_view_has_no_cache_access() {
        let named = BTreeMap::new();
        let ctx = AclContext::new(&named);
        let defaults = map(r#"allow-query-cache = ["any"]"#);
        let layers = AclLayers {
            view: None,
            global: None,
            defaults: &defaults,
        };

        let acls = recursion_acls(&layers, &ctx, false).unwrap();
        assert!(acls.query_cache.is_none());
        assert!(acls.recursion.is_none());
    }
}
