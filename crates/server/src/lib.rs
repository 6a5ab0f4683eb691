// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// LIBRARY WARNINGS
#![warn(
    clippy::default_trait_access,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::unimplemented,
    clippy::use_self,
    missing_copy_implementations,
    missing_docs,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    unreachable_pub
)]
#![allow(clippy::upper_case_acronyms)]
#![recursion_limit = "2048"]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Switchyard is the configuration and runtime-control engine of a recursive and
//! authoritative DNS server.
//!
//! It turns a parsed configuration document into a live set of views, each with its
//! zones, cache, resolver, access-control lists and policy tables, and atomically swaps
//! that set into production. Objects that did not materially change between two
//! configurations (zones, caches, policy tables) are carried forward instead of being
//! rebuilt.
//!
//! At runtime the [`ServerContext`] also services the control channel: zones can be
//! added, modified, shown and deleted, and those additions survive restarts through a
//! per-view [`store::ZoneStore`].

pub use hickory_proto as proto;

pub mod acl;
pub mod cache;
pub mod catz;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod forward;
pub mod keys;
pub mod resolver;
mod reuse;
pub mod rpz;
pub mod rrl;
pub mod server;
pub mod store;
pub mod task;
pub mod view;
pub mod zone;

pub use self::server::{ServerBuilder, ServerContext};

/// Returns the current version of Switchyard
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
