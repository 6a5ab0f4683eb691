// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::str::FromStr;

use crate::config::parse_class;
use crate::error::{ErrorKind, Result};
use crate::proto::rr::{DNSClass, Name};

/// Splits command text into words, honouring double quotes
pub(crate) fn tokenize(text: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut word = String::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => word.extend(chars.next()),
                    Some(c) => word.push(c),
                    None => return Err(ErrorKind::Msg("unterminated quoted string".to_string()).into()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    Ok(words)
}

/// Parses a zone or owner name given on the command line
pub(crate) fn parse_name(text: &str) -> Result<Name> {
    let mut name = Name::from_str(text).map_err(|e| ErrorKind::Msg(format!("'{text}' is not a valid name: {e}")))?;
    name.set_fqdn(true);
    Ok(name)
}

/// The `<zone> [class [view]]` arguments of a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneArgs {
    /// The zone name
    pub name: Name,
    /// The class, `IN` when absent
    pub class: Option<DNSClass>,
    /// The view, any view when absent
    pub view: Option<String>,
}

impl ZoneArgs {
    /// Parses `words` as `<zone> [class [view]]`
    pub fn parse(words: &[String]) -> Result<Self> {
        let (name, rest) = words
            .split_first()
            .ok_or_else(|| ErrorKind::Msg("a zone name is required".to_string()))?;
        if rest.len() > 2 {
            return Err(ErrorKind::Msg(format!("unexpected argument '{}'", rest[2])).into());
        }

        let (class, view) = class_and_view(rest)?;
        Ok(Self {
            name: parse_name(name)?,
            class,
            view,
        })
    }

    /// `None` for empty `words`, otherwise [`Self::parse`]
    pub fn parse_optional(words: &[String]) -> Result<Option<Self>> {
        if words.is_empty() {
            Ok(None)
        } else {
            Self::parse(words).map(Some)
        }
    }

    /// The class, defaulting to `IN`
    pub fn class(&self) -> DNSClass {
        self.class.unwrap_or(DNSClass::IN)
    }
}

/// Splits the words after a zone name into `[class [view]]`.
///
/// A single word that is not a class mnemonic names a view.
pub(crate) fn class_and_view(rest: &[String]) -> Result<(Option<DNSClass>, Option<String>)> {
    match rest {
        [] => Ok((None, None)),
        [word] => match parse_class(word) {
            Ok(class) => Ok((Some(class), None)),
            Err(_) => Ok((None, Some(word.clone()))),
        },
        [class, view] => Ok((Some(parse_class(class)?), Some(view.clone()))),
        [_, _, extra, ..] => Err(ErrorKind::Msg(format!("unexpected argument '{extra}'")).into()),
    }
}

/// Removes a leading `-flag` from `words`, true if it was present
pub(crate) fn take_flag(words: &mut Vec<String>, flag: &str) -> bool {
    match words.first() {
        Some(w) if w == flag => {
            words.remove(0);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        tokenize(text).unwrap()
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(words(r#"showzone "example.com" IN  "my view""#), ["showzone", "example.com", "IN", "my view"]);
        assert!(tokenize(r#"showzone "open"#).is_err());
    }

    #[test]
    fn test_zone_args() {
        let args = ZoneArgs::parse(&words("example.com CH internal")).unwrap();
        assert_eq!(args.name, Name::from_str("example.com.").unwrap());
        assert_eq!(args.class(), DNSClass::CH);
        assert_eq!(args.view.as_deref(), Some("internal"));

        let args = ZoneArgs::parse(&words("example.com")).unwrap();
        assert_eq!(args.class(), DNSClass::IN);
        assert!(args.view.is_none());

        let args = ZoneArgs::parse(&words("example.com internal")).unwrap();
        assert_eq!(args.class, None);
        assert_eq!(args.view.as_deref(), Some("internal"));

        assert!(ZoneArgs::parse(&[]).is_err());
        assert!(ZoneArgs::parse(&words("example.com IN v extra")).is_err());
        assert!(ZoneArgs::parse_optional(&[]).unwrap().is_none());
    }

    #[test]
    fn test_take_flag() {
        let mut args = words("-clean example.com");
        assert!(take_flag(&mut args, "-clean"));
        assert!(!take_flag(&mut args, "-clean"));
        assert_eq!(args, ["example.com"]);
    }
}
