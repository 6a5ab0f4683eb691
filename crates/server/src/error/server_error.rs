// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::{fmt, io};

use thiserror::Error;

use super::{ConfigError, PersistenceError};

/// The error kind for errors that get returned in the crate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A zone of this name is already in the view
    #[error("zone '{0}' already exists")]
    DuplicateZone(String),

    /// The zone's class does not match the class of its view
    #[error("zone '{zone}': wrong class for view '{view}'")]
    ClassMismatch {
        /// The zone being configured
        zone: String,
        /// The view it was destined for
        view: String,
    },

    /// The zone stanza names no type
    #[error("zone '{0}': type not present")]
    MissingType(String),

    /// The zone cannot serve as a response policy zone
    #[error("zone '{zone}' cannot be used for response policy: {reason}")]
    RpzIncompatibleZone {
        /// The policy zone
        zone: String,
        /// Why it was refused
        reason: String,
    },

    /// A response-policy zone was named but never defined
    #[error("'{zone}' is not a master or slave zone in view '{view}'")]
    RpzZoneMissing {
        /// The policy zone origin
        zone: String,
        /// The view that references it
        view: String,
    },

    /// `in-view` referenced a view that is not (yet) configured
    #[error("view '{0}' is not yet defined")]
    ViewNotFound(String),

    /// `in-view` referenced a zone missing from the other view
    #[error("zone '{zone}' not defined in view '{view}'")]
    ZoneNotFoundInView {
        /// The referenced zone
        zone: String,
        /// The view that was searched
        view: String,
    },

    /// Two views want to share one cache with different settings
    #[error("views {0} and {1} can't share the cache due to configuration parameter mismatch")]
    CacheConflict(String, String),

    /// A response-policy zone name did not parse or is not usable
    #[error("invalid response-policy zone name '{0}'")]
    InvalidZoneName(String),

    /// A response-policy action name did not parse
    #[error("invalid response-policy action name '{0}'")]
    InvalidActionName(String),

    /// The response-policy statement lists too many zones
    #[error("too many response policy zones ({0})")]
    TooManyPolicyZones(usize),

    /// The same origin is listed twice in one response-policy table
    #[error("duplicate response-policy zone '{0}'")]
    DuplicateRpzZone(String),

    /// DNSRPS was requested but cannot be used
    #[error("dnsrps: {0}")]
    PolicyServiceUnavailable(String),

    /// addzone of a zone that is already served
    #[error("zone '{0}' already exists")]
    ZoneAlreadyExists(String),

    /// The zone could not be found
    #[error("no matching zone '{0}' found")]
    ZoneNotFound(String),

    /// The zone exists only as an ancestor of the requested name
    #[error("no exact match for zone '{0}'")]
    PartialMatch(String),

    /// The zone name matched in several views and no view was named
    #[error("zone '{0}' was found in multiple views")]
    MultipleViewsMatched(String),

    /// Dynamic operation on a zone that cannot be changed at runtime
    #[error("zone '{zone}' {reason}")]
    NotDynamicZone {
        /// The zone
        zone: String,
        /// Why it cannot be changed
        reason: String,
    },

    /// The view does not accept new zones
    #[error("view '{0}' does not allow new zones (allow-new-zones is not set)")]
    NewZonesNotAllowed(String),

    /// The new-zone store cannot be written
    #[error("unable to write the new-zone store for view '{view}': {source}")]
    PersistenceUnwritable {
        /// The view whose store failed
        view: String,
        /// Underlying failure
        #[source]
        source: PersistenceError,
    },

    /// Zone data failed to load after configuration
    #[error("zone '{zone}' failed to load: {reason}")]
    LoadFailed {
        /// The zone
        zone: String,
        /// Loader error text
        reason: String,
    },

    /// Zone data failed to reload after modzone; the zone is no longer served
    #[error(
        "failed to load zone '{0}'\nThe zone is no longer being served. Use 'addzone' to correct the problem and restore service."
    )]
    ZoneUnmounted(String),

    /// Zone type not valid for a dynamic add or modify
    #[error("zone '{zone}': zones of type '{zone_type}' cannot be added or modified at runtime")]
    UnsupportedZoneType {
        /// The zone
        zone: String,
        /// The rejected type
        zone_type: String,
    },

    /// An attempt to add to a view that is frozen
    #[error("view '{0}' is frozen")]
    ViewFrozen(String),

    /// A named driver is not registered
    #[error("{kind} driver '{name}' not found")]
    DriverNotFound {
        /// "dlz" or "dyndb"
        kind: &'static str,
        /// Driver name from the configuration
        name: String,
    },

    /// An external driver failed to instantiate
    #[error("{kind} instance '{name}' failed: {reason}")]
    DriverFailed {
        /// "dlz" or "dyndb"
        kind: &'static str,
        /// The configured instance name
        name: String,
        /// Driver error text
        reason: String,
    },

    /// A general failure carrying only a message
    #[error("{0}")]
    Msg(String),

    // foreign
    /// A configuration lookup failed
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A new-zone store operation failed
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// An error got returned from IO
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The error type for errors that get returned in the crate
#[derive(Debug)]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    /// Get the kind of the error
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Consume the error, returning its kind
    pub fn into_kind(self) -> ErrorKind {
        *self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(error: E) -> Self {
        Self {
            kind: Box::new(error.into()),
        }
    }
}

impl From<String> for ErrorKind {
    fn from(msg: String) -> Self {
        Self::Msg(msg)
    }
}

impl From<&str> for ErrorKind {
    fn from(msg: &str) -> Self {
        Self::Msg(msg.to_string())
    }
}

impl From<toml::de::Error> for ErrorKind {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.into())
    }
}

impl From<crate::proto::error::ProtoError> for ErrorKind {
    fn from(e: crate::proto::error::ProtoError) -> Self {
        Self::Config(e.into())
    }
}
