// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::{fmt, io};

use thiserror::Error;

use crate::proto::error::ProtoError;

/// The error kind for configuration errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// A value was present but of the wrong type or out of range
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The option that was looked up
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A required option was not present in any map
    #[error("'{0}' is required")]
    Missing(String),

    /// The zone stanza has no `type`
    #[error("zone '{0}': type not present")]
    MissingType(String),

    /// Unknown zone type
    #[error("zone '{zone}': unknown type '{zone_type}'")]
    UnknownZoneType {
        /// The zone being configured
        zone: String,
        /// The offending type
        zone_type: String,
    },

    /// A named ACL could not be found
    #[error("undefined ACL '{0}'")]
    UndefinedAcl(String),

    /// A control-channel argument could not be understood
    #[error("syntax error: {0}")]
    Syntax(String),

    // foreign
    /// An error got returned from IO
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An error occurred while decoding toml data
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    /// A domain name in the configuration did not parse
    #[error("bad name: {0}")]
    Name(#[from] ProtoError),
}

/// The error type for configuration errors
#[derive(Debug)]
pub struct ConfigError {
    kind: Box<ConfigErrorKind>,
}

impl ConfigError {
    /// Get the kind of the error
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }

    pub(crate) fn invalid(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        ConfigErrorKind::InvalidValue {
            key: key.into(),
            reason: reason.to_string(),
        }
        .into()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.kind))
    }
}

impl std::error::Error for ConfigError {}

impl<E> From<E> for ConfigError
where
    E: Into<ConfigErrorKind>,
{
    fn from(error: E) -> Self {
        Self {
            kind: Box::new(error.into()),
        }
    }
}
