// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Carry-forward of objects from the outgoing configuration

use std::sync::Arc;

use tracing::debug;

/// Why an outgoing object could not be carried forward
pub(crate) type Mismatch = &'static str;

/// Returns the outgoing object if `compatible` accepts it, otherwise `None`.
///
/// The caller builds a fresh object on `None`. Rejections are logged at debug level
/// with the reason returned by `compatible`.
pub(crate) fn try_reuse<T: ?Sized>(
    what: &str,
    name: &dyn std::fmt::Display,
    outgoing: Option<&Arc<T>>,
    compatible: impl FnOnce(&T) -> Result<(), Mismatch>,
) -> Option<Arc<T>> {
    let old = outgoing?;
    match compatible(old) {
        Ok(()) => {
            debug!("reusing existing {what} '{name}'");
            Some(Arc::clone(old))
        }
        Err(reason) => {
            debug!("not reusing {what} '{name}': {reason}");
            None
        }
    }
}
