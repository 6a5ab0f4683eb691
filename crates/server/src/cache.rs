// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Caches and cache sharing between views
//!
//! Views name their cache with `attach-cache` (their own name by default). Views using
//! the same name share one cache object, which requires identical cache-affecting
//! settings. A cache whose view still exists under the same name and whose settings
//! allow it is carried forward across reconfiguration with its contents.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConfigMaps, SizeSpec};
use crate::error::{ErrorKind, Result};
use crate::proto::rr::{DNSClass, Name};
use crate::resolver::Adb;

/// ADB limit for views that share somebody else's cache
pub const MAX_ADB_SIZE_FOR_CACHESHARE: u64 = 8 * 1024 * 1024;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// How the cache treats names that break hostname rules
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckNames {
    /// Accept silently
    #[default]
    Ignore,
    /// Accept and log
    Warn,
    /// Reject
    Fail,
}

impl CheckNames {
    pub(crate) fn from_maps(maps: &ConfigMaps<'_>) -> crate::error::ConfigResult<Self> {
        Ok(match maps.get_str("check-names")? {
            None | Some("ignore") => Self::Ignore,
            Some("warn") => Self::Warn,
            Some("fail") => Self::Fail,
            Some(other) => {
                return Err(crate::error::ConfigError::invalid(
                    "check-names",
                    format_args!("unknown mode '{other}'"),
                ))
            }
        })
    }
}

/// Settings that decide whether caches can be reused or shared
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheParams {
    /// View class
    pub class: DNSClass,
    /// Name checking of cached responses
    pub check_names: CheckNames,
    /// Cache negative answers without SOA with TTL zero
    pub zero_no_soa_ttl: bool,
    /// Accept expired signatures
    pub accept_expired: bool,
    /// DNSSEC validation enabled
    pub enable_validation: bool,
    /// Maximum TTL of positive answers
    pub max_cache_ttl: u32,
    /// Maximum TTL of negative answers
    pub max_ncache_ttl: u32,
    /// Seconds between cleaning runs
    pub cleaning_interval: u32,
    /// How long stale answers are retained
    pub max_stale_ttl: u32,
    /// Memory limit in bytes, zero for unlimited
    pub max_cache_size: u64,
}

impl CacheParams {
    /// True if a cache built with `self` may be carried forward to a view with `new`
    pub fn reusable(&self, new: &Self) -> bool {
        self.class == new.class
            && self.check_names == new.check_names
            && self.zero_no_soa_ttl == new.zero_no_soa_ttl
            && self.accept_expired == new.accept_expired
            && self.enable_validation == new.enable_validation
            && self.max_cache_ttl == new.max_cache_ttl
            && self.max_ncache_ttl == new.max_ncache_ttl
    }

    /// True if a view with `new` may use a cache built with `self` at the same time
    pub fn sharable(&self, new: &Self) -> bool {
        self.cleaning_interval == new.cleaning_interval
            && self.max_cache_size == new.max_cache_size
            && self.max_stale_ttl == new.max_stale_ttl
            && self.reusable(new)
    }
}

/// The cache-affecting settings that may change without replacing the cache
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct CacheSettings {
    max_size: u64,
    cleaning_interval: u32,
    max_stale_ttl: u32,
}

/// A resolver cache
#[derive(Debug)]
pub struct Cache {
    id: u64,
    name: String,
    class: DNSClass,
    params: Mutex<CacheParams>,
    settings: Mutex<CacheSettings>,
    generation: AtomicU64,
    flushed_names: Mutex<Vec<(Name, bool)>>,
    preloaded: AtomicU64,
}

impl Cache {
    /// A new empty cache
    pub fn new(name: impl Into<String>, params: CacheParams) -> Arc<Self> {
        let cache = Arc::new(Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            class: params.class,
            params: Mutex::new(params),
            settings: Mutex::new(CacheSettings::default()),
            generation: AtomicU64::new(0),
            flushed_names: Mutex::new(Vec::new()),
            preloaded: AtomicU64::new(0),
        });
        debug!("created cache '{}' ({})", cache.name, cache.class);
        cache
    }

    /// Unique id of this cache object
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache class
    pub fn class(&self) -> DNSClass {
        self.class
    }

    /// The settings the cache was last configured with
    pub fn params(&self) -> CacheParams {
        self.params.lock().clone()
    }

    pub(crate) fn set_params(&self, params: CacheParams) {
        *self.params.lock() = params;
    }

    /// Memory limit in bytes, zero for unlimited
    pub fn max_size(&self) -> u64 {
        self.settings.lock().max_size
    }

    /// Applies size, cleaning and stale settings
    pub fn configure(&self, max_size: u64, cleaning_interval: u32, max_stale_ttl: u32) {
        let new = CacheSettings {
            max_size,
            cleaning_interval,
            max_stale_ttl,
        };
        let mut settings = self.settings.lock();
        if *settings != new {
            debug!("cache '{}': {new:?}", self.name);
            *settings = new;
        }
    }

    /// Drops all content
    pub fn flush(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.flushed_names.lock().clear();
        info!("cache '{}' flushed (generation {generation})", self.name);
    }

    /// Drops `name`, or with `tree` everything at or below it
    pub fn flush_name(&self, name: &Name, tree: bool) {
        debug!("cache '{}': flushing {name}{}", self.name, if tree { " and below" } else { "" });
        self.flushed_names.lock().push((name.clone(), tree));
    }

    /// Increments on every full flush
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Names flushed since the last full flush
    pub fn flushed_names(&self) -> Vec<(Name, bool)> {
        self.flushed_names.lock().clone()
    }

    /// Reads a cache snapshot, returning the number of entries
    pub fn load_file(&self, path: &Path) -> std::io::Result<usize> {
        let text = std::fs::read_to_string(path)?;
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with(';'))
            .count();
        self.preloaded.store(entries as u64, Ordering::Relaxed);
        info!("cache '{}': loaded {entries} entries from {}", self.name, path.display());
        Ok(entries)
    }

    /// Entries read from the cache file
    pub fn preloaded(&self) -> u64 {
        self.preloaded.load(Ordering::Relaxed)
    }
}

/// A cache as recorded in the registry for one configuration
#[derive(Debug)]
pub struct CacheEntry {
    cache: Arc<Cache>,
    primary_view: String,
    primary_params: CacheParams,
    primary_adb: Mutex<Option<Arc<Adb>>>,
    needs_flush: AtomicBool,
    adb_size_adjusted: AtomicBool,
}

impl CacheEntry {
    /// The cache
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// The view that created or first claimed the cache
    pub fn primary_view(&self) -> &str {
        &self.primary_view
    }

    /// True if the cache must be flushed once the configuration is live
    pub fn needs_flush(&self) -> bool {
        self.needs_flush.load(Ordering::Acquire)
    }

    pub(crate) fn set_needs_flush(&self) {
        self.needs_flush.store(true, Ordering::Release);
    }

    pub(crate) fn set_primary_adb(&self, adb: Arc<Adb>) {
        *self.primary_adb.lock() = Some(adb);
    }

    /// Sizes the ADB of `view` from the cache size, capping non-primary views and,
    /// once, the primary view too
    pub(crate) fn adb_size(&self, view: &str, max_cache_size: u64) -> u64 {
        if max_cache_size == 0 {
            return 0;
        }
        let mut size = (max_cache_size / 8).max(1);
        if view != self.primary_view && size > MAX_ADB_SIZE_FOR_CACHESHARE {
            size = MAX_ADB_SIZE_FOR_CACHESHARE;
            if !self.adb_size_adjusted.swap(true, Ordering::AcqRel) {
                if let Some(adb) = self.primary_adb.lock().as_ref() {
                    adb.set_max_size(MAX_ADB_SIZE_FOR_CACHESHARE);
                }
                info!(
                    "view '{}': ADB size capped at {MAX_ADB_SIZE_FOR_CACHESHARE} bytes for cache sharing",
                    self.primary_view
                );
            }
        }
        size
    }
}

/// The caches of one configuration
#[derive(Debug, Default)]
pub struct CacheRegistry {
    entries: Vec<Arc<CacheEntry>>,
}

impl CacheRegistry {
    /// Constructs an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for the named cache of `class`
    pub fn find(&self, name: &str, class: DNSClass) -> Option<&Arc<CacheEntry>> {
        self.entries
            .iter()
            .find(|e| e.cache.name() == name && e.cache.class() == class)
    }

    /// All entries
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CacheEntry>> {
        self.entries.iter()
    }

    /// Number of caches
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no caches
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The cache a view ended up with
#[derive(Debug)]
pub struct CacheAttachment {
    /// The registry entry
    pub entry: Arc<CacheEntry>,
    /// Another view of this configuration owns the cache
    pub shared: bool,
    /// The cache was carried forward from the outgoing configuration
    pub reused: bool,
}

/// Finds or creates the cache called `cache_name` for `view`.
///
/// `outgoing` is the outgoing view's cache of the same name, if any.
pub fn attach_cache(
    registry: &mut CacheRegistry,
    cache_name: &str,
    view: &str,
    params: &CacheParams,
    outgoing: Option<&Arc<Cache>>,
) -> Result<CacheAttachment> {
    if let Some(entry) = registry.find(cache_name, params.class) {
        if !entry.primary_params.sharable(params) {
            return Err(ErrorKind::CacheConflict(entry.primary_view.clone(), view.to_string()).into());
        }
        debug!("view '{view}' shares cache '{cache_name}' of view '{}'", entry.primary_view);
        return Ok(CacheAttachment {
            entry: entry.clone(),
            shared: true,
            reused: false,
        });
    }

    let reused = outgoing.filter(|old| {
        let ok = old.params().reusable(params);
        if !ok {
            info!("cache cannot be reused for view '{view}' due to configuration parameter mismatch");
        }
        ok
    });

    let (cache, reused) = match reused {
        Some(old) => {
            info!("reusing existing cache for view '{view}'");
            old.set_params(params.clone());
            (Arc::clone(old), true)
        }
        None => (Cache::new(cache_name, params.clone()), false),
    };

    let entry = Arc::new(CacheEntry {
        cache,
        primary_view: view.to_string(),
        primary_params: params.clone(),
        primary_adb: Mutex::new(None),
        needs_flush: AtomicBool::new(false),
        adb_size_adjusted: AtomicBool::new(false),
    });
    registry.entries.push(entry.clone());

    Ok(CacheAttachment {
        entry,
        shared: false,
        reused,
    })
}

/// Converts `max-cache-size` to bytes, zero meaning unlimited
pub fn max_cache_size(configured: SizeSpec, view: &str) -> u64 {
    let percent = match configured {
        SizeSpec::Unlimited => return 0,
        SizeSpec::Bytes(bytes) => return bytes,
        SizeSpec::Default => 90,
        SizeSpec::Percent(p) => p,
    };

    match physical_memory() {
        Some(total) => {
            let size = total / 100 * u64::from(percent);
            debug!("view '{view}': max-cache-size {percent}% of {total} bytes is {size} bytes");
            size
        }
        None => {
            warn!("view '{view}': unable to determine physical memory, setting max-cache-size to unlimited");
            0
        }
    }
}

/// Total physical memory in bytes
pub fn physical_memory() -> Option<u64> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            // SAFETY: sysconf has no preconditions
            let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
            // SAFETY: sysconf has no preconditions
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if pages <= 0 || page_size <= 0 {
                return None;
            }
            u64::try_from(pages).ok()?.checked_mul(u64::try_from(page_size).ok()?)
        } else {
            None
        }
    }
}

/// Where the view's cache file lives, if one is configured
pub(crate) fn cache_file(maps: &ConfigMaps<'_>, directory: &Path) -> crate::error::ConfigResult<Option<PathBuf>> {
    Ok(maps.get_str("cache-file")?.map(|f| directory.join(f)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CacheParams {
        CacheParams {
            class: DNSClass::IN,
            check_names: CheckNames::Ignore,
            zero_no_soa_ttl: false,
            accept_expired: false,
            enable_validation: true,
            max_cache_ttl: 604_800,
            max_ncache_ttl: 10_800,
            cleaning_interval: 0,
            max_stale_ttl: 43_200,
            max_cache_size: 64 * 1024 * 1024,
        }
    }

    #[test]
    fn test_sharable_implies_reusable() {
        let a = params();
        let mut b = params();
        assert!(a.sharable(&b) && a.reusable(&b));

        b.max_cache_size *= 2;
        assert!(!a.sharable(&b));
        assert!(a.reusable(&b));

        b.max_cache_ttl = 1;
        assert!(!a.reusable(&b));
        assert!(!a.sharable(&b));
    }

    #[test]
    fn test_sharing_is_symmetric() {
        let a = params();
        let mut b = params();
        b.max_stale_ttl = 0;
        assert_eq!(a.sharable(&b), b.sharable(&a));
        assert_eq!(a.reusable(&b), b.reusable(&a));
    }

    #[test]
    fn test_attach_shares_and_conflicts() {
        let mut registry = CacheRegistry::new();
        let first = attach_cache(&mut registry, "shared", "v1", &params(), None).unwrap();
        assert!(!first.shared && !first.reused);

        let second = attach_cache(&mut registry, "shared", "v2", &params(), None).unwrap();
        assert!(second.shared);
        assert!(Arc::ptr_eq(first.entry.cache(), second.entry.cache()));

        let mut different = params();
        different.accept_expired = true;
        let err = attach_cache(&mut registry, "shared", "v3", &different, None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CacheConflict(a, b) if a == "v1" && b == "v3"));
    }

    #[test]
    fn test_attach_reuses_outgoing() {
        let old = Cache::new("v1", params());
        let mut registry = CacheRegistry::new();

        let attached = attach_cache(&mut registry, "v1", "v1", &params(), Some(&old)).unwrap();
        assert!(attached.reused);
        assert!(Arc::ptr_eq(attached.entry.cache(), &old));

        let mut changed = params();
        changed.max_ncache_ttl = 5;
        let mut registry = CacheRegistry::new();
        let fresh = attach_cache(&mut registry, "v1", "v1", &changed, Some(&old)).unwrap();
        assert!(!fresh.reused);
        assert!(!Arc::ptr_eq(fresh.entry.cache(), &old));
    }

    #[test]
    fn test_adb_cap_applies_once() {
        let mut registry = CacheRegistry::new();
        let attached = attach_cache(&mut registry, "big", "primary", &params(), None).unwrap();
        let entry = attached.entry;
        let primary_adb = Arc::new(Adb::new(0));
        entry.set_primary_adb(primary_adb.clone());

        let huge = 1024 * 1024 * 1024;
        assert_eq!(entry.adb_size("primary", huge), huge / 8);
        assert_eq!(entry.adb_size("other", huge), MAX_ADB_SIZE_FOR_CACHESHARE);
        assert_eq!(primary_adb.max_size(), MAX_ADB_SIZE_FOR_CACHESHARE);

        primary_adb.set_max_size(1);
        assert_eq!(entry.adb_size("third", huge), MAX_ADB_SIZE_FOR_CACHESHARE);
        assert_eq!(primary_adb.max_size(), 1);

        assert_eq!(entry.adb_size("other", 0), 0);
        assert_eq!(entry.adb_size("other", 4), 1);
    }

    #[test]
    fn test_cache_size_spec() {
        assert_eq!(max_cache_size(SizeSpec::Unlimited, "v"), 0);
        assert_eq!(max_cache_size(SizeSpec::Bytes(4096), "v"), 4096);
        if let Some(total) = physical_memory() {
            assert_eq!(max_cache_size(SizeSpec::Percent(50), "v"), total / 100 * 50);
        }
    }
}
