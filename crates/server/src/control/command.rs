// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::Duration;

use super::args::{class_and_view, parse_name, take_flag, tokenize, ZoneArgs};
use crate::config::maps::parse_ttl;
use crate::config::ZoneConfig;
use crate::error::{ErrorKind, Result};
use crate::proto::rr::Name;

/// A parsed control-channel command
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Command {
    /// `reload [zone [class [view]]]`
    Reload(Option<ZoneArgs>),
    /// `reconfig`
    Reconfig,
    /// `addzone <zone> [class [view]] { ... }`
    AddZone {
        /// The new zone
        stanza: ZoneConfig,
        /// The view to add it to
        view: Option<String>,
    },
    /// `modzone <zone> [class [view]] { ... }`
    ModZone {
        /// The replacement configuration
        stanza: ZoneConfig,
        /// The view of the zone
        view: Option<String>,
    },
    /// `delzone [-clean] <zone> [class [view]]`
    DelZone {
        /// The zone
        zone: ZoneArgs,
        /// Also remove the zone file and journal
        clean: bool,
    },
    /// `showzone <zone> [class [view]]`
    ShowZone(ZoneArgs),
    /// `freeze [zone [class [view]]]`
    Freeze(Option<ZoneArgs>),
    /// `thaw [zone [class [view]]]`
    Thaw(Option<ZoneArgs>),
    /// `sync [-clean] [zone [class [view]]]`
    Sync {
        /// The zone, all zones if absent
        zone: Option<ZoneArgs>,
        /// Remove the journal after writing it out
        clean: bool,
    },
    /// `retransfer <zone> [class [view]]`
    Retransfer(ZoneArgs),
    /// `refresh <zone> [class [view]]`
    Refresh(ZoneArgs),
    /// `notify <zone> [class [view]]`
    Notify(ZoneArgs),
    /// `flush [view]`
    Flush(Option<String>),
    /// `flushname <name> [view]`
    FlushName(Name, Option<String>),
    /// `flushtree <name> [view]`
    FlushTree(Name, Option<String>),
    /// `nta [-remove] [-force] [-lifetime <ttl>] <name> [view]`
    Nta {
        /// The anchor name
        name: Name,
        /// The view, every validating view if absent
        view: Option<String>,
        /// Remove instead of add
        remove: bool,
        /// Keep the anchor even when the name validates again
        force: bool,
        /// Lifetime, the view's `nta-lifetime` if absent
        lifetime: Option<Duration>,
    },
    /// `nta -dump [view]`
    NtaDump(Option<String>),
    /// `status`
    Status,
}

fn zone_stanza(command: &str, text: &str) -> Result<(ZoneConfig, Option<String>)> {
    let brace = text
        .find('{')
        .ok_or_else(|| ErrorKind::Msg(format!("{command}: zone configuration '{{ ... }}' is missing")))?;
    let words = tokenize(&text[..brace])?;
    let inline = text[brace..].trim().trim_end_matches(';').trim_end();

    let (name, rest) = words
        .split_first()
        .ok_or_else(|| ErrorKind::Msg(format!("{command}: a zone name is required")))?;
    let (class, view) = class_and_view(rest).map_err(|e| ErrorKind::Msg(format!("{command}: {e}")))?;
    parse_name(name)?;

    let class = class.map(|c| c.to_string());
    let stanza = ZoneConfig::from_inline(name, class.as_deref(), inline)?;
    Ok((stanza, view))
}

fn name_and_view(command: &str, words: &[String]) -> Result<(Name, Option<String>)> {
    match words {
        [name] => Ok((parse_name(name)?, None)),
        [name, view] => Ok((parse_name(name)?, Some(view.clone()))),
        [] => Err(ErrorKind::Msg(format!("{command}: a name is required")).into()),
        _ => Err(ErrorKind::Msg(format!("{command}: too many arguments")).into()),
    }
}

fn optional_view(command: &str, words: &[String]) -> Result<Option<String>> {
    match words {
        [] => Ok(None),
        [view] => Ok(Some(view.clone())),
        _ => Err(ErrorKind::Msg(format!("{command}: too many arguments")).into()),
    }
}

impl Command {
    /// Parses one command line
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (verb, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let verb = verb.to_ascii_lowercase();

        if verb == "addzone" || verb == "modzone" {
            let (stanza, view) = zone_stanza(&verb, rest)?;
            return Ok(if verb == "addzone" {
                Self::AddZone { stanza, view }
            } else {
                Self::ModZone { stanza, view }
            });
        }

        let mut words = tokenize(rest)?;
        Ok(match verb.as_str() {
            "reload" => Self::Reload(ZoneArgs::parse_optional(&words)?),
            "reconfig" => Self::Reconfig,
            "delzone" => {
                let clean = take_flag(&mut words, "-clean");
                Self::DelZone {
                    zone: ZoneArgs::parse(&words)?,
                    clean,
                }
            }
            "showzone" => Self::ShowZone(ZoneArgs::parse(&words)?),
            "freeze" => Self::Freeze(ZoneArgs::parse_optional(&words)?),
            "thaw" | "unfreeze" => Self::Thaw(ZoneArgs::parse_optional(&words)?),
            "sync" => {
                let clean = take_flag(&mut words, "-clean");
                Self::Sync {
                    zone: ZoneArgs::parse_optional(&words)?,
                    clean,
                }
            }
            "retransfer" => Self::Retransfer(ZoneArgs::parse(&words)?),
            "refresh" => Self::Refresh(ZoneArgs::parse(&words)?),
            "notify" => Self::Notify(ZoneArgs::parse(&words)?),
            "flush" => Self::Flush(optional_view("flush", &words)?),
            "flushname" => {
                let (name, view) = name_and_view("flushname", &words)?;
                Self::FlushName(name, view)
            }
            "flushtree" => {
                let (name, view) = name_and_view("flushtree", &words)?;
                Self::FlushTree(name, view)
            }
            "nta" => {
                if take_flag(&mut words, "-dump") || take_flag(&mut words, "-d") {
                    return Ok(Self::NtaDump(optional_view("nta", &words)?));
                }

                let (mut remove, mut force, mut lifetime) = (false, false, None);
                while words.first().is_some_and(|w| w.starts_with('-')) {
                    match words.remove(0).as_str() {
                        "-remove" | "-r" => remove = true,
                        "-force" | "-f" => force = true,
                        "-lifetime" | "-l" => {
                            if words.is_empty() {
                                return Err(ErrorKind::Msg("nta: -lifetime needs a value".to_string()).into());
                            }
                            let text = words.remove(0);
                            lifetime = Some(parse_ttl(&text).map_err(|e| ErrorKind::Msg(format!("nta: {e}")))?);
                        }
                        other => return Err(ErrorKind::Msg(format!("nta: unknown option '{other}'")).into()),
                    }
                }

                let (name, view) = name_and_view("nta", &words)?;
                Self::Nta {
                    name,
                    view,
                    remove,
                    force,
                    lifetime,
                }
            }
            "status" => Self::Status,
            "" => return Err(ErrorKind::Msg("empty command".to_string()).into()),
            other => return Err(ErrorKind::Msg(format!("unknown command '{other}'")).into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::proto::rr::DNSClass;

    #[test]
    fn test_parse_addzone() {
        let cmd = Command::parse(r#"addzone "dyn.example.com" IN v1 { type = "primary", file = "y" };"#).unwrap();
        let Command::AddZone { stanza, view } = cmd else {
            panic!("wrong command");
        };
        assert_eq!(stanza.name, "dyn.example.com");
        assert_eq!(stanza.class.as_deref(), Some("IN"));
        assert_eq!(view.as_deref(), Some("v1"));
        assert_eq!(stanza.options.get("file").and_then(|v| v.as_str()), Some("y"));

        let cmd = Command::parse(r#"addzone "dyn.example.com" v1 { type = "primary", file = "y" }"#).unwrap();
        let Command::AddZone { stanza, view } = cmd else {
            panic!("wrong command");
        };
        assert_eq!(stanza.class, None);
        assert_eq!(view.as_deref(), Some("v1"));

        assert!(Command::parse("addzone example.com").is_err());
        assert!(Command::parse("modzone { type = \"primary\" }").is_err());
    }

    #[test]
    fn test_parse_delzone() {
        let cmd = Command::parse("delzone -clean example.com CH v").unwrap();
        assert_eq!(
            cmd,
            Command::DelZone {
                zone: ZoneArgs {
                    name: Name::from_str("example.com.").unwrap(),
                    class: Some(DNSClass::CH),
                    view: Some("v".to_string()),
                },
                clean: true,
            }
        );
    }

    #[test]
    fn test_parse_nta() {
        let cmd = Command::parse("nta -lifetime 1h -force bad.example v1").unwrap();
        let Command::Nta {
            name,
            view,
            remove,
            force,
            lifetime,
        } = cmd
        else {
            panic!("wrong command");
        };
        assert_eq!(name, Name::from_str("bad.example.").unwrap());
        assert_eq!(view.as_deref(), Some("v1"));
        assert!(!remove);
        assert!(force);
        assert_eq!(lifetime, Some(Duration::from_secs(3600)));

        assert_eq!(Command::parse("nta -dump").unwrap(), Command::NtaDump(None));
        assert!(Command::parse("nta -bogus x").is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(Command::parse("reload").unwrap(), Command::Reload(None));
        assert_eq!(Command::parse("RECONFIG").unwrap(), Command::Reconfig);
        assert_eq!(Command::parse("flush internal").unwrap(), Command::Flush(Some("internal".to_string())));
        assert!(matches!(Command::parse("sync -clean").unwrap(), Command::Sync { zone: None, clean: true }));
        assert!(Command::parse("frobnicate").is_err());
        assert!(Command::parse("").is_err());
    }
}
