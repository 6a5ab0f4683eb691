// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! All defined errors for Switchyard

mod config_error;
mod persistence_error;
mod server_error;

pub use self::config_error::{ConfigError, ConfigErrorKind};
pub use self::persistence_error::{PersistenceError, PersistenceErrorKind};
pub use self::server_error::{Error, ErrorKind};

/// Result of a configuration lookup or parse
pub type ConfigResult<T> = ::std::result::Result<T, ConfigError>;

/// Result of a new-zone store operation
pub type PersistenceResult<T> = ::std::result::Result<T, PersistenceError>;

/// An alias for results returned by functions of this crate
pub type Result<T> = ::std::result::Result<T, Error>;
