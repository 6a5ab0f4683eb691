// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Turning one zone stanza into a zone object of a view

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{apply_options, options_kind, Zone, ZoneKind, ZoneLayers, ZoneManager, ZoneOp, ZoneOptions};
use crate::acl::AclContext;
use crate::config::{ConfigMaps, OptionMap, ZoneConfig, ZoneTypeConfig};
use crate::error::{ConfigError, ErrorKind, Result};
use crate::forward::{forwarders_from, ForwardPolicy, Forwarders};
use crate::proto::rr::Name;
use crate::reuse::try_reuse;
use crate::view::{Hints, View};
use crate::zone::MasterFormat;

/// Everything a zone stanza is configured against
pub(crate) struct ZoneConfigurer<'a> {
    /// The view receiving the zone
    pub(crate) view: &'a View,
    /// Options of that view's stanza, if it has one
    pub(crate) view_options: Option<&'a OptionMap>,
    /// Global options
    pub(crate) global: Option<&'a OptionMap>,
    /// Compiled-in default options
    pub(crate) defaults: &'a OptionMap,
    /// The outgoing view with the same name and class
    pub(crate) outgoing: Option<&'a View>,
    /// Views already configured, for `in-view`
    pub(crate) configured: &'a [Arc<View>],
    /// Named ACLs
    pub(crate) acls: &'a AclContext<'a>,
    /// Maintenance of fresh zones
    pub(crate) zone_manager: &'a ZoneManager,
    /// The working directory
    pub(crate) directory: &'a Path,
    /// The response-policy table was carried forward unchanged
    pub(crate) old_rpz_ok: bool,
}

impl<'a> ZoneConfigurer<'a> {
    fn layers(&self, zone: &'a OptionMap) -> ZoneLayers<'a> {
        ZoneLayers {
            zone,
            view: self.view_options,
            global: self.global,
            defaults: self.defaults,
        }
    }
}

fn zone_kind(zone_type: ZoneTypeConfig) -> Option<ZoneKind> {
    Some(match zone_type {
        ZoneTypeConfig::Primary => ZoneKind::Primary,
        ZoneTypeConfig::Secondary => ZoneKind::Secondary,
        ZoneTypeConfig::Mirror => ZoneKind::Mirror,
        ZoneTypeConfig::Stub => ZoneKind::Stub,
        ZoneTypeConfig::StaticStub => ZoneKind::StaticStub,
        ZoneTypeConfig::Redirect => ZoneKind::Redirect,
        ZoneTypeConfig::Forward | ZoneTypeConfig::Hint | ZoneTypeConfig::DelegationOnly => return None,
    })
}

fn db_args(maps: &ConfigMaps<'_>) -> Result<Vec<String>> {
    let database = maps.get_str("database")?.unwrap_or("rbt");
    Ok(database.split_whitespace().map(str::to_string).collect())
}

/// Why `zone` cannot serve a stanza that asks for `kind`, `db_args` and `options`
fn zone_reusable(
    zone: &Zone,
    kind: ZoneKind,
    db_args: &[String],
    options: &ZoneOptions,
    rpz_num: Option<usize>,
    old_rpz_ok: bool,
) -> std::result::Result<(), &'static str> {
    if zone.kind() != kind {
        return Err("zone type changed");
    }
    if zone.db_args() != db_args {
        return Err("database changed");
    }
    if zone.options().file != options.file {
        return Err("file changed");
    }
    if zone.raw().is_some() != options.inline_signing {
        return Err("inline-signing changed");
    }
    if zone.rpz_num() != rpz_num {
        return Err("response-policy zone number changed");
    }
    if rpz_num.is_some() && !old_rpz_ok {
        return Err("response-policy table changed");
    }
    Ok(())
}

fn check_rpz_zone(name: &str, kind: ZoneKind, db_args: &[String], options: &ZoneOptions) -> Result<()> {
    let reason = if !matches!(kind, ZoneKind::Primary | ZoneKind::Secondary) {
        "not a primary or secondary zone"
    } else if !matches!(db_args.first().map(String::as_str), Some("rbt") | Some("rbt64")) {
        "database is not rbt"
    } else if options.format == MasterFormat::Map {
        "masterfile-format map is not supported"
    } else {
        return Ok(());
    };

    Err(ErrorKind::RpzIncompatibleZone {
        zone: name.to_string(),
        reason: reason.to_string(),
    }
    .into())
}

fn zone_forwarders(stanza: &ZoneConfig, default_empty: bool) -> Result<Option<Forwarders>> {
    let forwarders = forwarders_from(&ConfigMaps::new([&stanza.options]))?;
    Ok(match forwarders {
        None if default_empty => Some(Forwarders {
            addrs: Vec::new(),
            policy: ForwardPolicy::None,
        }),
        other => other,
    })
}

/// Configures one zone stanza into `cfg.view`.
///
/// Returns the zone object, or `None` for stanzas that only change view settings
/// (`hint`, `forward`, `delegation-only`). With `modify`, the existing table entry is
/// replaced instead of being rejected as a duplicate, and the current view is the
/// source of reuse.
pub(crate) fn configure_zone(
    cfg: &ZoneConfigurer<'_>,
    stanza: &ZoneConfig,
    added: bool,
    modify: bool,
) -> Result<Option<Arc<Zone>>> {
    let view = cfg.view;
    let name = stanza.name.as_str();
    let origin = stanza.origin()?;

    let class = stanza.class_or(view.class())?;
    if class != view.class() {
        return Err(ErrorKind::ClassMismatch {
            zone: name.to_string(),
            view: view.name().to_string(),
        }
        .into());
    }

    if let Some(other) = stanza.in_view() {
        return configure_in_view(cfg, stanza, &origin, other, modify).map(Some);
    }

    let zone_type = stanza
        .zone_type()?
        .ok_or_else(|| ErrorKind::MissingType(name.to_string()))?;

    let delegation_only = ConfigMaps::new([&stanza.options]).bool_or("delegation-only", false)?;
    match zone_type {
        ZoneTypeConfig::Hint => {
            if origin.is_root() {
                if let Some(file) = ConfigMaps::new([&stanza.options]).get_str("file")? {
                    view.set_hints(Some(Hints::File(cfg.directory.join(file))));
                }
                if delegation_only {
                    view.add_delegation_only(&origin);
                }
            } else {
                warn!("view {view}: ignoring non-root hint zone '{name}'");
            }
            return Ok(None);
        }
        ZoneTypeConfig::Forward => {
            if let Some(forwarders) = zone_forwarders(stanza, true)? {
                view.add_forwarders(origin.clone(), forwarders);
            }
            if delegation_only {
                view.add_delegation_only(&origin);
            }
            return Ok(None);
        }
        ZoneTypeConfig::DelegationOnly => {
            view.add_delegation_only(&origin);
            return Ok(None);
        }
        _ => (),
    }

    let Some(kind) = zone_kind(zone_type) else {
        return Ok(None);
    };

    let layers = cfg.layers(&stanza.options);
    let db_args = db_args(&layers.all())?;
    let options = ZoneOptions::from_layers(
        name,
        options_kind(kind, &db_args),
        &layers,
        cfg.acls,
        cfg.directory,
    )?;

    if kind == ZoneKind::Redirect {
        return configure_redirect(cfg, stanza, origin, db_args, options, modify).map(Some);
    }

    if !modify && view.zone(&origin).is_some() {
        return Err(ErrorKind::DuplicateZone(name.to_string()).into());
    }

    let rpz_num = view
        .rpz()
        .filter(|rpz| !rpz.params().dnsrps_enabled)
        .and_then(|rpz| rpz.find(&origin));
    let is_catz = view.catz().is_some_and(|c| c.is_catalog(&origin));

    if rpz_num.is_some() {
        check_rpz_zone(name, kind, &db_args, &options)?;
    }
    let forwarders = zone_forwarders(stanza, false)?;

    let source = if modify { Some(view) } else { cfg.outgoing };
    let candidate = source.and_then(|v| v.zone(&origin));
    let reused = try_reuse("zone", &origin, candidate.as_ref(), |zone| {
        zone_reusable(zone, kind, &db_args, &options, rpz_num, cfg.old_rpz_ok)
    });

    let zone = match reused {
        Some(zone) => zone,
        None => {
            let zone = Zone::new(origin.clone(), class, kind, db_args.clone());
            cfg.zone_manager.manage(&zone);
            if options.inline_signing {
                let raw = Zone::new_raw(&zone);
                cfg.zone_manager.manage(&raw);
                zone.set_raw(Some(raw));
            }
            zone
        }
    };
    zone.set_view(view.id());
    zone.set_rpz_num(rpz_num);
    zone.set_catz(is_catz);

    if let Some(forwarders) = forwarders {
        view.add_forwarders(origin.clone(), forwarders);
    }
    if delegation_only {
        view.add_delegation_only(&origin);
    }
    zone.set_added(added);

    let key_maintenance = options.key_maintenance;
    apply_options(&zone, options);
    zone.set_config(Some(stanza.clone()));

    if modify {
        view.replace_zone(zone.clone());
    } else if let Err(e) = view.add_zone(zone.clone()) {
        zone.view_revert();
        return Err(e);
    }

    if is_catz && zone.is_loaded() {
        zone.request(ZoneOp::CatzRescan);
    }
    if key_maintenance {
        cfg.zone_manager.schedule_rekey(&zone);
    }

    debug!("configured zone {zone} ({})", kind.as_str());
    Ok(Some(zone))
}

fn configure_in_view(
    cfg: &ZoneConfigurer<'_>,
    stanza: &ZoneConfig,
    origin: &Name,
    other: &str,
    modify: bool,
) -> Result<Arc<Zone>> {
    let view = cfg.view;
    let other_view = cfg
        .configured
        .iter()
        .find(|v| v.name() == other && v.class() == view.class())
        .ok_or_else(|| ErrorKind::ViewNotFound(other.to_string()))?;

    let zone = other_view
        .zone(origin)
        .ok_or_else(|| ErrorKind::ZoneNotFoundInView {
            zone: stanza.name.clone(),
            view: other.to_string(),
        })?;

    if let Some(forwarders) = zone_forwarders(stanza, false)? {
        view.add_forwarders(origin.clone(), forwarders);
    }

    if modify {
        view.replace_zone(zone.clone());
    } else if view.zone(origin).is_some() {
        return Err(ErrorKind::DuplicateZone(stanza.name.clone()).into());
    } else {
        view.add_zone(zone.clone())?;
    }

    info!("view {view}: zone '{}' shared with view '{other}'", stanza.name);
    Ok(zone)
}

fn configure_redirect(
    cfg: &ZoneConfigurer<'_>,
    stanza: &ZoneConfig,
    origin: Name,
    db_args: Vec<String>,
    options: ZoneOptions,
    modify: bool,
) -> Result<Arc<Zone>> {
    let view = cfg.view;
    if !origin.is_root() {
        return Err(ConfigError::invalid("type", format_args!("redirect zone '{}' must be called \".\"", stanza.name)).into());
    }
    if !modify && view.redirect().is_some() {
        return Err(ErrorKind::DuplicateZone(stanza.name.clone()).into());
    }

    let source = if modify { Some(view) } else { cfg.outgoing };
    let candidate = source.and_then(View::redirect);
    let zone = try_reuse("redirect zone", &view, candidate.as_ref(), |zone| {
        if zone.db_args() == db_args.as_slice() {
            Ok(())
        } else {
            Err("database changed")
        }
    })
    .unwrap_or_else(|| {
        let zone = Zone::new(origin, view.class(), ZoneKind::Redirect, db_args);
        cfg.zone_manager.manage(&zone);
        zone
    });

    zone.set_view(view.id());
    apply_options(&zone, options);
    zone.set_config(Some(stanza.clone()));
    view.set_redirect(Some(zone.clone()));
    Ok(zone)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use super::*;
    use crate::config::Config;
    use crate::proto::rr::DNSClass;

    struct Fixture {
        defaults: Config,
        named: BTreeMap<String, toml::Value>,
        manager: ZoneManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                defaults: Config::defaults().unwrap(),
                named: BTreeMap::new(),
                manager: ZoneManager::new(),
            }
        }

        fn configure(
            &self,
            view: &View,
            outgoing: Option<&View>,
            configured: &[Arc<View>],
            stanza: &str,
            modify: bool,
        ) -> Result<Option<Arc<Zone>>> {
            let acls = AclContext::new(&self.named);
            let cfg = ZoneConfigurer {
                view,
                view_options: None,
                global: None,
                defaults: &self.defaults.options,
                outgoing,
                configured,
                acls: &acls,
                zone_manager: &self.manager,
                directory: Path::new("/var/named"),
                old_rpz_ok: false,
            };
            let (name, inline) = stanza.split_once(' ').unwrap();
            let (name, class) = match name.split_once('/') {
                Some((name, class)) => (name, Some(class)),
                None => (name, None),
            };
            let config = ZoneConfig::from_inline(name, class, inline).unwrap();
            configure_zone(&cfg, &config, false, modify)
        }
    }

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    #[test]
    fn test_duplicate_zone() {
        let fx = Fixture::new();
        let view = View::new("v", DNSClass::IN);
        let stanza = r#"example.com { type = "primary", file = "a.db" }"#;
        fx.configure(&view, None, &[], stanza, false).unwrap();
        let err = fx.configure(&view, None, &[], stanza, false).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DuplicateZone(_)));
        fx.configure(&view, None, &[], stanza, true).unwrap();
    }

    #[test]
    fn test_reuse_from_outgoing() {
        let fx = Fixture::new();
        let old = View::new("v", DNSClass::IN);
        let first = fx
            .configure(&old, None, &[], r#"example.com { type = "primary", file = "a.db" }"#, false)
            .unwrap()
            .unwrap();
        first.view_commit();

        let new = View::new("v", DNSClass::IN);
        let second = fx
            .configure(&new, Some(&old), &[], r#"example.com { type = "primary", file = "a.db" }"#, false)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.view().as_ref(), Some(new.id()));

        second.view_revert();
        assert_eq!(second.view().as_ref(), Some(old.id()));

        let newer = View::new("v", DNSClass::IN);
        let third = fx
            .configure(&newer, Some(&old), &[], r#"example.com { type = "primary", file = "b.db" }"#, false)
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_pseudo_zones() {
        let fx = Fixture::new();
        let view = View::new("v", DNSClass::IN);

        assert!(fx
            .configure(&view, None, &[], r#". { type = "hint", file = "root.hints" }"#, false)
            .unwrap()
            .is_none());
        assert_eq!(view.hints(), Some(Hints::File("/var/named/root.hints".into())));

        assert!(fx
            .configure(&view, None, &[], r#"example { type = "hint", file = "x" }"#, false)
            .unwrap()
            .is_none());

        fx.configure(
            &view,
            None,
            &[],
            r#"corp.example { type = "forward", forward = "only", forwarders = ["192.0.2.1"] }"#,
            false,
        )
        .unwrap();
        let forwarders = view.forwarders_at(&name("corp.example.")).unwrap();
        assert_eq!(forwarders.policy, ForwardPolicy::Only);

        fx.configure(&view, None, &[], r#"off.example { type = "forward" }"#, false)
            .unwrap();
        assert_eq!(
            view.forwarders_at(&name("off.example.")).unwrap().policy,
            ForwardPolicy::None
        );

        fx.configure(&view, None, &[], r#"com { type = "delegation-only" }"#, false)
            .unwrap();
        assert!(view.is_delegation_only(&name("com.")));
        assert_eq!(view.zone_count(), 0);
    }

    #[test]
    fn test_missing_type_and_class() {
        let fx = Fixture::new();
        let view = View::new("v", DNSClass::IN);
        let err = fx
            .configure(&view, None, &[], r#"example.com { file = "a.db" }"#, false)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MissingType(_)));

        let chaos = View::new("c", DNSClass::CH);
        let err = fx
            .configure(&chaos, None, &[], r#"example.com/IN { type = "primary", file = "a.db" }"#, false)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ClassMismatch { .. }));
    }

    #[test]
    fn test_in_view() {
        let fx = Fixture::new();
        let first = Arc::new(View::new("first", DNSClass::IN));
        let zone = fx
            .configure(&first, None, &[], r#"shared.example { type = "primary", file = "s.db" }"#, false)
            .unwrap()
            .unwrap();

        let second = View::new("second", DNSClass::IN);
        let configured = [first.clone()];
        let shared = fx
            .configure(&second, None, &configured, r#"shared.example { in-view = "first" }"#, false)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&zone, &shared));
        assert_eq!(shared.view().as_ref(), Some(first.id()));

        let err = fx
            .configure(&second, None, &configured, r#"other.example { in-view = "first" }"#, false)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ZoneNotFoundInView { .. }));

        let err = fx
            .configure(&second, None, &configured, r#"other.example { in-view = "nope" }"#, false)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ViewNotFound(_)));
    }

    #[test]
    fn test_redirect_singleton() {
        let fx = Fixture::new();
        let view = View::new("v", DNSClass::IN);
        let err = fx
            .configure(&view, None, &[], r#"example { type = "redirect", file = "r.db" }"#, false)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config(_)));

        let zone = fx
            .configure(&view, None, &[], r#". { type = "redirect", file = "r.db" }"#, false)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&view.redirect().unwrap(), &zone));
        assert_eq!(view.zone_count(), 0);

        let next = View::new("v", DNSClass::IN);
        let again = fx
            .configure(&next, Some(&view), &[], r#". { type = "redirect", file = "r.db" }"#, false)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&zone, &again));
    }

    #[test]
    fn test_inline_signing_companion() {
        let fx = Fixture::new();
        let view = View::new("v", DNSClass::IN);
        let zone = fx
            .configure(
                &view,
                None,
                &[],
                r#"signed.example { type = "primary", file = "s.db", inline-signing = true }"#,
                false,
            )
            .unwrap()
            .unwrap();
        let raw = zone.raw().unwrap();
        assert!(raw.is_raw());
        assert_eq!(raw.view().as_ref(), Some(view.id()));
        assert_eq!(raw.options().file.as_deref(), Some("s.db"));
        assert!(fx.manager.is_managed(&raw));
    }
}
