// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Control-channel commands
//!
//! [`Command::parse`] turns one line of control text into a [`Command`], and
//! [`ServerContext::execute`] runs it, returning the text of the response.

mod args;
mod command;

use std::fmt::Write;
use std::sync::Arc;

use tracing::{info, warn};

pub use self::args::ZoneArgs;
pub use self::command::Command;
use crate::error::{ErrorKind, Result};
use crate::proto::rr::DNSClass;
use crate::server::ServerContext;
use crate::view::View;
use crate::zone::{Zone, ZoneKind, ZoneOp};

impl ServerContext {
    /// Parses and runs one control command
    pub async fn execute(&self, text: &str) -> Result<String> {
        let command = Command::parse(text)?;
        info!("received control channel command '{}'", text.split_whitespace().next().unwrap_or_default());
        self.run_command(command).await
    }

    /// Runs a parsed control command
    pub async fn run_command(&self, command: Command) -> Result<String> {
        match command {
            Command::Reload(None) => {
                self.reload().await?;
                Ok("server reload successful".to_string())
            }
            Command::Reload(Some(args)) => {
                let (_, zone) = self.zone_from_args(&args.name, args.class(), args.view.as_deref())?;
                Ok(self.reload_zone(zone))
            }
            Command::Reconfig => {
                self.reconfig().await?;
                Ok(String::new())
            }
            Command::AddZone { stanza, view } => {
                let zone = self.add_zone(stanza, view.as_deref()).await?;
                Ok(format!("zone '{}' added", zone.origin()))
            }
            Command::ModZone { stanza, view } => {
                let modified = self.modify_zone(stanza, view.as_deref()).await?;
                let mut out = format!("zone '{}' reconfigured.", modified.zone.origin());
                if modified.static_config {
                    out.push_str(
                        "\nzone was configured statically; update the configuration file or the change is lost on the next reconfig",
                    );
                }
                Ok(out)
            }
            Command::DelZone { zone, clean } => {
                let removed = self
                    .delete_zone(&zone.name, zone.class(), zone.view.as_deref(), clean)
                    .await?;
                Ok(format!("zone '{}' scheduled for removal.", removed.origin()))
            }
            Command::ShowZone(args) => self.show_zone(&args.name, args.class(), args.view.as_deref()),
            Command::Freeze(args) => self.freeze_thaw(args, true).await,
            Command::Thaw(args) => self.freeze_thaw(args, false).await,
            Command::Sync { zone, clean } => {
                let zones = self.zones_for(zone.as_ref())?;
                for zone in zones.iter().filter(|z| z.is_dynamic()) {
                    zone.request(ZoneOp::Sync);
                    if clean {
                        if let Some(journal) = &zone.options().journal {
                            if let Err(e) = std::fs::remove_file(journal) {
                                if e.kind() != std::io::ErrorKind::NotFound {
                                    warn!("zone {zone}: removing journal failed: {e}");
                                }
                            }
                        }
                    }
                }
                Ok(String::new())
            }
            Command::Retransfer(args) => {
                let (_, zone) = self.zone_from_args(&args.name, args.class(), args.view.as_deref())?;
                require_secondary(&zone, "retransfer")?;
                zone.request(ZoneOp::Retransfer);
                Ok(String::new())
            }
            Command::Refresh(args) => {
                let (_, zone) = self.zone_from_args(&args.name, args.class(), args.view.as_deref())?;
                require_secondary(&zone, "refresh")?;
                zone.request(ZoneOp::Refresh);
                Ok("zone refresh queued".to_string())
            }
            Command::Notify(args) => {
                let (_, zone) = self.zone_from_args(&args.name, args.class(), args.view.as_deref())?;
                zone.request(ZoneOp::Notify);
                Ok("zone notify queued".to_string())
            }
            Command::Flush(view) => {
                for view in self.views_named(view.as_deref())? {
                    if let Some(cache) = view.cache() {
                        cache.flush();
                    }
                }
                Ok(String::new())
            }
            Command::FlushName(name, view) => {
                for view in self.views_named(view.as_deref())? {
                    if let Some(cache) = view.cache() {
                        cache.flush_name(&name, false);
                    }
                }
                Ok(String::new())
            }
            Command::FlushTree(name, view) => {
                for view in self.views_named(view.as_deref())? {
                    if let Some(cache) = view.cache() {
                        cache.flush_name(&name, true);
                    }
                }
                Ok(String::new())
            }
            Command::Nta {
                name,
                view,
                remove,
                force,
                lifetime,
            } => {
                let mut out = String::new();
                for view in self.views_named(view.as_deref())? {
                    let Some(ntas) = view.ntas() else {
                        continue;
                    };
                    if remove {
                        let removed = ntas.remove(&name);
                        writeln!(
                            out,
                            "Negative trust anchor for {name} {} in view {}",
                            if removed { "removed" } else { "not found" },
                            view.name()
                        ).ok();
                    } else {
                        let expire = ntas.add(&name, lifetime, force);
                        writeln!(out, "Negative trust anchor added: {name}/{}, expires {expire}", view.name()).ok();
                    }
                }
                Ok(out.trim_end().to_string())
            }
            Command::NtaDump(view) => {
                let mut lines = Vec::new();
                for view in self.views_named(view.as_deref())? {
                    if let Some(ntas) = view.ntas() {
                        lines.extend(ntas.dump(view.name()));
                    }
                }
                if lines.is_empty() {
                    return Ok("no negative trust anchors".to_string());
                }
                Ok(lines.join("\n"))
            }
            Command::Status => Ok(self.status()),
        }
    }

    fn reload_zone(&self, zone: Arc<Zone>) -> String {
        if zone.kind().is_secondary() {
            zone.request(ZoneOp::Refresh);
            return "zone refresh queued".to_string();
        }
        if zone.is_frozen() {
            return "zone is frozen; thaw it first".to_string();
        }

        let loader = Arc::clone(self.loader());
        self.tasks().spawn(async move {
            if zone.load(loader.as_ref()).await.is_ok() {
                info!("zone {zone} reloaded");
            }
        });
        "zone reload queued".to_string()
    }

    async fn freeze_thaw(&self, args: Option<ZoneArgs>, freeze: bool) -> Result<String> {
        let zones = self.zones_for(args.as_ref())?;
        let _guard = self.tasks().begin_exclusive().await;
        let single = args.is_some();

        let mut out = String::new();
        for zone in zones {
            if !zone.is_dynamic() {
                if single {
                    return Err(ErrorKind::NotDynamicZone {
                        zone: zone.origin().to_string(),
                        reason: "is not dynamic".to_string(),
                    }
                    .into());
                }
                continue;
            }
            if zone.is_frozen() == freeze {
                if single {
                    out.push_str(if freeze { "The zone was already frozen." } else { "The zone was already thawed." });
                }
                continue;
            }

            zone.set_frozen(freeze);
            if freeze {
                zone.request(ZoneOp::Sync);
                info!("zone {zone} frozen");
            } else {
                match zone.load(self.loader().as_ref()).await {
                    Ok(()) => info!("zone {zone} thawed and reloaded"),
                    Err(e) => warn!("zone {zone} thawed but failed to reload: {e}"),
                }
            }
        }

        if out.is_empty() && single && !freeze {
            out.push_str("The zone reload and thaw was successful.");
        }
        Ok(out)
    }

    /// The zone named by `args`, or every zone of every view
    fn zones_for(&self, args: Option<&ZoneArgs>) -> Result<Vec<Arc<Zone>>> {
        match args {
            Some(args) => {
                let (_, zone) = self.zone_from_args(&args.name, args.class(), args.view.as_deref())?;
                Ok(vec![zone])
            }
            None => Ok(self.views().iter().flat_map(|v| v.zones()).collect()),
        }
    }

    /// The views called `name` in any class, or all views
    fn views_named(&self, name: Option<&str>) -> Result<Vec<Arc<View>>> {
        let views = self.views();
        let matching = views
            .iter()
            .filter(|v| name.map_or(true, |n| v.name() == n))
            .cloned()
            .collect::<Vec<_>>();
        match name {
            Some(name) if matching.is_empty() => Err(ErrorKind::ViewNotFound(name.to_string()).into()),
            _ => Ok(matching),
        }
    }

    fn status(&self) -> String {
        let views = self.views();
        let zones: usize = views.iter().map(|v| v.zone_count()).sum();
        let user_views = views.iter().filter(|v| v.class() == DNSClass::IN).count();

        let mut out = String::new();
        writeln!(out, "version: switchyard {}", crate::version()).ok();
        writeln!(out, "number of views: {} ({user_views} IN)", views.len()).ok();
        writeln!(out, "number of zones: {zones}").ok();
        writeln!(out, "zone manager pool size: {}", self.zone_manager().size()).ok();
        writeln!(out, "caches: {}", self.caches().len()).ok();
        write!(out, "server is up and running").ok();
        out
    }
}

fn require_secondary(zone: &Zone, command: &str) -> Result<()> {
    if zone.kind().is_secondary() || (zone.kind() == ZoneKind::Redirect && !zone.options().primaries.is_empty()) {
        return Ok(());
    }
    Err(ErrorKind::Msg(format!("{command}: zone {} is not a secondary zone", zone.origin())).into())
}
