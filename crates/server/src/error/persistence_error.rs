// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// The error kind for errors that get returned by the new-zone stores
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceErrorKind {
    /// The backing medium could not be opened
    #[error("new-zone store {path:?} unavailable: {reason}")]
    Unavailable {
        /// Location of the store
        path: PathBuf,
        /// What went wrong while opening it
        reason: String,
    },

    /// The backing medium cannot be written to
    #[error("new-zone store {0:?} is not writable")]
    Unwritable(PathBuf),

    /// A stored zone definition no longer parses
    #[error("corrupt new-zone record for '{zone}': {reason}")]
    Corrupt {
        /// Key of the record
        zone: String,
        /// Parse failure
        reason: String,
    },

    /// The number of changed rows didn't match the expected amount
    #[error("wrong row count: {got} expect: {expect}")]
    WrongRowCount {
        /// The number of rows touched
        got: usize,
        /// The number of rows expected to be touched
        expect: usize,
    },

    /// The store was built without support for the requested backend
    #[error("new-zone store backend '{0}' is not supported by this build")]
    UnsupportedBackend(String),

    // foreign
    /// An error got returned from IO
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An error got returned from the rusqlite crate
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored record did not decode
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
}

/// The error type for errors that get returned by the new-zone stores
#[derive(Debug)]
pub struct PersistenceError {
    kind: Box<PersistenceErrorKind>,
}

impl PersistenceError {
    /// Get the kind of the error
    pub fn kind(&self) -> &PersistenceErrorKind {
        &self.kind
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for PersistenceError {}

impl<E> From<E> for PersistenceError
where
    E: Into<PersistenceErrorKind>,
{
    fn from(error: E) -> Self {
        Self {
            kind: Box::new(error.into()),
        }
    }
}
