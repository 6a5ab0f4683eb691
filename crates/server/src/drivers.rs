// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Pluggable databases: DLZ drivers and dyndb instances
//!
//! Drivers are registered by name on the [`crate::ServerBuilder`]. A configuration
//! referencing an unregistered driver fails to load.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::{DlzConfig, DyndbConfig};
use crate::error::{ErrorKind, Result};
use crate::proto::rr::DNSClass;

/// A database created by a [`DlzDriver`]
pub trait DlzDatabase: Send + Sync + fmt::Debug {
    /// Instance name from the configuration
    fn name(&self) -> &str;

    /// Called once the database is attached to a view
    fn configure(&self, view: &str) -> std::result::Result<(), String> {
        let _ = view;
        Ok(())
    }
}

/// Creates DLZ databases
pub trait DlzDriver: Send + Sync {
    /// Creates the instance `name` with the driver arguments following the driver name
    fn create(&self, name: &str, args: &[String], class: DNSClass) -> std::result::Result<Arc<dyn DlzDatabase>, String>;
}

/// A loaded dyndb instance
pub trait DyndbInstance: Send + Sync + fmt::Debug {
    /// Instance name from the configuration
    fn name(&self) -> &str;
}

/// Loads dyndb instances
pub trait DyndbDriver: Send + Sync {
    /// Loads the instance `name` for `view` with free-form `parameters`
    fn load(&self, name: &str, parameters: &str, view: &str) -> std::result::Result<Arc<dyn DyndbInstance>, String>;
}

/// Registered drivers
#[derive(Clone, Default)]
pub struct DriverRegistry {
    dlz: HashMap<String, Arc<dyn DlzDriver>>,
    dyndb: HashMap<String, Arc<dyn DyndbDriver>>,
}

impl DriverRegistry {
    /// No drivers
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a DLZ driver
    pub fn register_dlz(&mut self, name: impl Into<String>, driver: Arc<dyn DlzDriver>) {
        self.dlz.insert(name.into(), driver);
    }

    /// Registers a dyndb driver
    pub fn register_dyndb(&mut self, name: impl Into<String>, driver: Arc<dyn DyndbDriver>) {
        self.dyndb.insert(name.into(), driver);
    }

    /// Instantiates one `[[dlz]]` entry
    pub fn create_dlz(&self, config: &DlzConfig, class: DNSClass) -> Result<Arc<dyn DlzDatabase>> {
        let mut words = config.database.split_whitespace().map(str::to_string);
        let driver_name = words.next().unwrap_or_default();
        let args = words.collect::<Vec<_>>();

        let driver = self.dlz.get(&driver_name).ok_or_else(|| ErrorKind::DriverNotFound {
            kind: "dlz",
            name: driver_name.clone(),
        })?;
        let db = driver
            .create(&config.name, &args, class)
            .map_err(|reason| ErrorKind::DriverFailed {
                kind: "dlz",
                name: config.name.clone(),
                reason,
            })?;
        info!("dlz '{}' created with driver '{driver_name}'", config.name);
        Ok(db)
    }

    /// Loads one `[[dyndb]]` entry for `view`
    pub fn load_dyndb(&self, config: &DyndbConfig, view: &str) -> Result<Arc<dyn DyndbInstance>> {
        let driver = self.dyndb.get(&config.library).ok_or_else(|| ErrorKind::DriverNotFound {
            kind: "dyndb",
            name: config.library.clone(),
        })?;
        let instance = driver
            .load(&config.name, &config.parameters, view)
            .map_err(|reason| ErrorKind::DriverFailed {
                kind: "dyndb",
                name: config.name.clone(),
                reason,
            })?;
        info!("dyndb '{}' loaded for view '{view}'", config.name);
        Ok(instance)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("dlz", &self.dlz.keys().collect::<Vec<_>>())
            .field("dyndb", &self.dyndb.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Db(String);

    impl DlzDatabase for Db {
        fn name(&self) -> &str {
            &self.0
        }
    }

    struct Driver;

    impl DlzDriver for Driver {
        fn create(&self, name: &str, args: &[String], _class: DNSClass) -> std::result::Result<Arc<dyn DlzDatabase>, String> {
            if args.is_empty() {
                return Err("missing arguments".to_string());
            }
            Ok(Arc::new(Db(name.to_string())))
        }
    }

    #[test]
    fn test_dlz_lookup() {
        let mut registry = DriverRegistry::new();
        registry.register_dlz("filesystem", Arc::new(Driver));

        let ok = DlzConfig {
            name: "fs".to_string(),
            database: "filesystem /var/dlz".to_string(),
            search: true,
        };
        assert_eq!(registry.create_dlz(&ok, DNSClass::IN).unwrap().name(), "fs");

        let no_args = DlzConfig {
            database: "filesystem".to_string(),
            ..ok.clone()
        };
        assert!(matches!(
            registry.create_dlz(&no_args, DNSClass::IN).unwrap_err().kind(),
            ErrorKind::DriverFailed { .. }
        ));

        let unknown = DlzConfig {
            database: "ldap x".to_string(),
            ..ok
        };
        assert!(matches!(
            registry.create_dlz(&unknown, DNSClass::IN).unwrap_err().kind(),
            ErrorKind::DriverNotFound { .. }
        ));
    }
}
