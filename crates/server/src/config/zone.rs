// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Zone stanzas

use std::fmt::{self, Write};
use std::str::FromStr;

use serde::Deserialize;
use toml::Value;

use super::maps::OptionMap;
use crate::error::{ConfigError, ConfigErrorKind, ConfigResult};
use crate::proto::rr::{DNSClass, Name};

/// The `type` of a zone stanza
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ZoneTypeConfig {
    /// Authoritative primary, loaded from a file or database
    Primary,
    /// Secondary, transferred from primaries
    Secondary,
    /// A secondary that is validated before being served
    Mirror,
    /// Stub zone, NS records only
    Stub,
    /// Stub zone with statically configured servers
    StaticStub,
    /// Forwarding pseudo-zone
    Forward,
    /// Root hints
    Hint,
    /// NXDOMAIN redirection zone
    Redirect,
    /// Delegation-only pseudo-zone
    DelegationOnly,
}

impl ZoneTypeConfig {
    /// The canonical spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Mirror => "mirror",
            Self::Stub => "stub",
            Self::StaticStub => "static-stub",
            Self::Forward => "forward",
            Self::Hint => "hint",
            Self::Redirect => "redirect",
            Self::DelegationOnly => "delegation-only",
        }
    }

    /// True for the types that never produce a zone object
    pub fn is_pseudo(self) -> bool {
        matches!(self, Self::Forward | Self::Hint | Self::DelegationOnly)
    }
}

impl FromStr for ZoneTypeConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "primary" | "master" => Self::Primary,
            "secondary" | "slave" => Self::Secondary,
            "mirror" => Self::Mirror,
            "stub" => Self::Stub,
            "static-stub" => Self::StaticStub,
            "forward" => Self::Forward,
            "hint" => Self::Hint,
            "redirect" => Self::Redirect,
            "delegation-only" => Self::DelegationOnly,
            _ => return Err(s.to_string()),
        })
    }
}

impl fmt::Display for ZoneTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single zone stanza
///
/// ```toml
/// [[zones]]
/// name = "example.com"
/// type = "primary"
/// file = "example.com.zone"
/// ```
///
/// Everything other than `name` and `class` is a zone option, looked up ahead of the
/// view and global options.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ZoneConfig {
    /// The zone origin as written
    pub name: String,
    /// Optional class, defaults to the class of the enclosing view
    #[serde(default)]
    pub class: Option<String>,
    /// The zone options, including `type`
    #[serde(flatten)]
    pub options: OptionMap,
}

#[derive(Deserialize)]
struct InlineOptions {
    options: OptionMap,
}

impl ZoneConfig {
    /// Creates a stanza from parts
    pub fn new(name: impl Into<String>, class: Option<String>, options: OptionMap) -> Self {
        Self {
            name: name.into(),
            class,
            options,
        }
    }

    /// Builds a stanza from the option block of a control command, e.g.
    /// `{ type = "primary", file = "example.db" }`
    pub fn from_inline(name: &str, class: Option<&str>, inline: &str) -> ConfigResult<Self> {
        let inline = inline.trim();
        if !inline.starts_with('{') || !inline.ends_with('}') {
            return Err(ConfigErrorKind::Syntax(format!(
                "zone options for '{name}' must be enclosed in braces"
            ))
            .into());
        }
        let parsed: InlineOptions = toml::from_str(&format!("options = {inline}"))?;
        Ok(Self::new(name, class.map(str::to_string), parsed.options))
    }

    /// The zone origin as a fully qualified name
    pub fn origin(&self) -> ConfigResult<Name> {
        let mut name = Name::from_str(&self.name)?;
        name.set_fqdn(true);
        Ok(name)
    }

    /// The configured class, or `default` when none was written
    pub fn class_or(&self, default: DNSClass) -> ConfigResult<DNSClass> {
        match &self.class {
            Some(class) => parse_class(class),
            None => Ok(default),
        }
    }

    /// The zone type, `None` when the stanza has no `type`
    pub fn zone_type(&self) -> ConfigResult<Option<ZoneTypeConfig>> {
        match self.options.get("type") {
            None => Ok(None),
            Some(Value::String(t)) => t.parse().map(Some).map_err(|zone_type| {
                ConfigErrorKind::UnknownZoneType {
                    zone: self.name.clone(),
                    zone_type,
                }
                .into()
            }),
            Some(other) => Err(ConfigError::invalid(
                "type",
                format_args!("expected a string, found {}", other.type_str()),
            )),
        }
    }

    /// The zone type, failing with [`ConfigErrorKind::MissingType`] when absent
    pub fn require_type(&self) -> ConfigResult<ZoneTypeConfig> {
        self.zone_type()?
            .ok_or_else(|| ConfigErrorKind::MissingType(self.name.clone()).into())
    }

    /// The view this stanza borrows its zone from, if any
    pub fn in_view(&self) -> Option<&str> {
        match self.options.get("in-view") {
            Some(Value::String(view)) => Some(view),
            _ => None,
        }
    }

    /// The options as a single-line inline table, as stored in the new-zone database
    pub fn options_inline(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, value)) in self.options.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write!(out, " {} = {}", render_key(key), render_value(value)).ok();
        }
        out.push_str(" }");
        out
    }

    /// Renders the stanza the way `showzone` prints it
    pub fn to_stanza(&self) -> String {
        let mut out = format!("zone \"{}\"", self.name);
        if let Some(class) = &self.class {
            write!(out, " {}", class.to_ascii_uppercase()).ok();
        }
        write!(out, " {};", self.options_inline()).ok();
        out
    }

    /// Renders the stanza as an array-of-tables entry of the text zone store
    pub fn to_toml_entry(&self) -> String {
        let mut out = String::from("[[zones]]\n");
        writeln!(out, "name = {}", Value::String(self.name.clone())).ok();
        if let Some(class) = &self.class {
            writeln!(out, "class = {}", Value::String(class.clone())).ok();
        }
        for (key, value) in self.options.iter() {
            writeln!(out, "{} = {}", render_key(key), render_value(value)).ok();
        }
        out
    }
}

/// Parses a class mnemonic such as `IN`, `CH` or `HS`
pub fn parse_class(class: &str) -> ConfigResult<DNSClass> {
    let upper = class.to_ascii_uppercase();
    let class = match upper.as_str() {
        "CHAOS" => "CH",
        "HESIOD" => "HS",
        other => other,
    };
    DNSClass::from_str(class).map_err(|_| ConfigError::invalid("class", format_args!("unknown class '{class}'")))
}

fn render_key(key: &str) -> String {
    if !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        key.to_string()
    } else {
        Value::String(key.to_string()).to_string()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Table(table) => {
            let mut out = String::from("{");
            for (i, (k, v)) in table.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write!(out, " {} = {}", render_key(k), render_value(v)).ok();
            }
            out.push_str(" }");
            out
        }
        Value::Array(items) => {
            let items = items.iter().map(render_value).collect::<Vec<_>>();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_round_trip() {
        let zone = ZoneConfig::from_inline("dyn.example.com", None, r#"{ type = "primary", file = "y" }"#)
            .expect("inline parse failed");

        assert_eq!(zone.require_type().unwrap(), ZoneTypeConfig::Primary);
        assert_eq!(zone.options_inline(), r#"{ file = "y", type = "primary" }"#);
        assert_eq!(
            zone.to_stanza(),
            r#"zone "dyn.example.com" { file = "y", type = "primary" };"#
        );

        let again = ZoneConfig::from_inline(&zone.name, None, &zone.options_inline()).unwrap();
        assert_eq!(again, zone);
    }

    #[test]
    fn test_nested_values_render_inline() {
        let zone = ZoneConfig::from_inline(
            "example.net",
            Some("IN"),
            r#"{ type = "secondary", primaries = ["192.0.2.1", "192.0.2.2 port 5300"], notify = false }"#,
        )
        .unwrap();

        let inline = zone.options_inline();
        assert!(!inline.contains('\n'));
        assert_eq!(
            zone.to_stanza(),
            r#"zone "example.net" IN { notify = false, primaries = ["192.0.2.1", "192.0.2.2 port 5300"], type = "secondary" };"#
        );
    }

    #[test]
    fn test_missing_braces() {
        assert!(ZoneConfig::from_inline("example.com", None, r#"type = "primary""#).is_err());
    }

    #[test]
    fn test_type_aliases() {
        assert_eq!("master".parse::<ZoneTypeConfig>().unwrap(), ZoneTypeConfig::Primary);
        assert_eq!("slave".parse::<ZoneTypeConfig>().unwrap(), ZoneTypeConfig::Secondary);
        assert!("bogus".parse::<ZoneTypeConfig>().is_err());

        let zone = ZoneConfig::from_inline("x.test", None, r#"{ type = "bogus" }"#).unwrap();
        assert!(matches!(
            zone.zone_type().unwrap_err().kind(),
            ConfigErrorKind::UnknownZoneType { .. }
        ));
    }

    #[test]
    fn test_origin_is_fqdn() {
        let zone = ZoneConfig::new("example.com", None, OptionMap::new());
        assert!(zone.origin().unwrap().is_fqdn());
    }

    #[test]
    fn test_toml_entry_parses_back() {
        #[derive(Deserialize)]
        struct Doc {
            zones: Vec<ZoneConfig>,
        }

        let zone = ZoneConfig::from_inline("ch.example", Some("CH"), r#"{ type = "primary", file = "ch.db" }"#)
            .unwrap();
        let doc: Doc = toml::from_str(&zone.to_toml_entry()).unwrap();
        assert_eq!(doc.zones, vec![zone]);
    }
}
