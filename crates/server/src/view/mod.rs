// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Views
//!
//! A [`View`] is built from scratch on every reconfiguration; the
//! sub-objects it owns (zones, cache, RPZ table, dynamic keyring) may be carried over
//! from the outgoing view of the same name and class. Once built and frozen, only the
//! zone table, forwarding table and hints change, through the runtime control
//! operations.

mod builder;
mod empty;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ipnet::IpNet;
use parking_lot::RwLock;
use tracing::debug;

use crate::acl::{Acl, RecursionAcls};
use crate::cache::{Cache, CacheParams};
use crate::catz::CatalogZones;
use crate::config::OptionMap;
use crate::drivers::{DlzDatabase, DyndbInstance};
use crate::error::{ErrorKind, Result};
use crate::forward::{ForwardTable, Forwarders};
use crate::keys::{KeyTable, Keyring, NtaTable, ValidationMode};
use crate::proto::rr::{DNSClass, LowerName, Name};
use crate::resolver::Resolver;
use crate::rpz::RpzTable;
use crate::rrl::RateLimit;
use crate::store::ZoneStore;
use crate::zone::{Zone, ZoneMatch, ZoneTable};

pub(crate) use self::builder::{ViewBuilder, ViewSource};
pub use self::empty::{EMPTY_ZONES, EmptyZoneSettings};

static NEXT_VIEW_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Identity of one view object
///
/// Two views with the same name and class built by different reconfigurations have
/// different ids.
#[derive(Clone)]
pub struct ViewId {
    serial: u64,
    name: Arc<str>,
    class: DNSClass,
}

impl ViewId {
    /// A fresh id
    pub fn new(name: &str, class: DNSClass) -> Self {
        Self {
            serial: NEXT_VIEW_SERIAL.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            class,
        }
    }

    /// The view name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The view class
    pub fn class(&self) -> DNSClass {
        self.class
    }
}

impl PartialEq for ViewId {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for ViewId {}

impl std::hash::Hash for ViewId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

impl fmt::Debug for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.name, self.class, self.serial)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where root hints come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hints {
    /// The compiled-in root servers
    Builtin,
    /// A hint zone file
    File(PathBuf),
}

/// Access control of a view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewAcls {
    /// Clients this view serves
    pub match_clients: Acl,
    /// Destination addresses this view serves
    pub match_destinations: Acl,
    /// Only serve queries with RD set
    pub match_recursive_only: bool,
    /// `allow-query`
    pub query: Acl,
    /// `allow-query-on`
    pub query_on: Acl,
    /// Cache and recursion ACLs
    pub recursion: RecursionAcls,
    /// `allow-notify`
    pub notify: Acl,
    /// `allow-update`
    pub update: Acl,
    /// `allow-update-forwarding`
    pub update_forwarding: Acl,
    /// `allow-transfer`
    pub transfer: Acl,
}

/// A `server` statement
#[derive(Clone, Debug, PartialEq)]
pub struct Peer {
    /// Addresses the statement applies to
    pub network: IpNet,
    /// Its options
    pub options: OptionMap,
}

/// One `rrset-order` rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderRule {
    /// Owner name the rule applies at and below, all names if `None`
    pub name: Option<Name>,
    /// Record type mnemonic, all types if `None`
    pub rr_type: Option<String>,
    /// `fixed`, `random`, `cyclic` or `none`
    pub order: String,
}

/// How answers are shaped
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnswerPolicy {
    /// Compress names in responses
    pub message_compression: bool,
    /// Omit optional sections
    pub minimal_responses: bool,
    /// EDNS padding block size, zero for none
    pub response_padding: u16,
    /// Ordering of records in RRsets
    pub rrset_order: Vec<OrderRule>,
    /// Addresses never returned in answers
    pub deny_answer_addresses: Vec<IpNet>,
    /// Names whose aliases must not point outside them
    pub deny_answer_aliases: Vec<Name>,
    /// Preferred address ordering by client
    pub sortlist: Option<Acl>,
}

/// DNSSEC settings of a view
#[derive(Debug)]
pub struct DnssecSettings {
    /// Validation mode
    pub validation: ValidationMode,
    /// Accept expired signatures
    pub accept_expired: bool,
    /// Trust anchors and must-be-secure rules
    pub keytable: KeyTable,
    /// Negative trust anchors
    pub ntas: NtaTable,
}

/// A view
pub struct View {
    id: ViewId,
    zones: RwLock<ZoneTable>,
    redirect: RwLock<Option<Arc<Zone>>>,
    managed_keys: Option<Arc<Zone>>,
    forwarders: RwLock<ForwardTable>,
    delegation_only: RwLock<BTreeSet<LowerName>>,
    root_delegation_only: Option<Vec<Name>>,
    hints: RwLock<Option<Hints>>,
    rpz: Option<Arc<RpzTable>>,
    catz: Option<Arc<CatalogZones>>,
    cache: Option<Arc<Cache>>,
    cache_params: Option<CacheParams>,
    cache_shared: bool,
    resolver: Option<Resolver>,
    acls: Option<ViewAcls>,
    keyring: Keyring,
    dnssec: Option<DnssecSettings>,
    peers: Vec<Peer>,
    answers: AnswerPolicy,
    rrl: Option<RateLimit>,
    dns64: Vec<IpNet>,
    dnstap: Vec<String>,
    dlz: Vec<Arc<dyn DlzDatabase>>,
    dyndb: Vec<Arc<dyn DyndbInstance>>,
    store: Option<Arc<dyn ZoneStore>>,
    new_zones_directory: PathBuf,
    allow_new_zones: bool,
    recursion: bool,
    frozen: AtomicBool,
}

impl View {
    /// An empty, thawed view
    pub fn new(name: &str, class: DNSClass) -> Self {
        Self {
            id: ViewId::new(name, class),
            zones: RwLock::new(ZoneTable::new()),
            redirect: RwLock::new(None),
            managed_keys: None,
            forwarders: RwLock::new(ForwardTable::new()),
            delegation_only: RwLock::new(BTreeSet::new()),
            root_delegation_only: None,
            hints: RwLock::new(None),
            rpz: None,
            catz: None,
            cache: None,
            cache_params: None,
            cache_shared: false,
            resolver: None,
            acls: None,
            keyring: Keyring::default(),
            dnssec: None,
            peers: Vec::new(),
            answers: AnswerPolicy::default(),
            rrl: None,
            dns64: Vec::new(),
            dnstap: Vec::new(),
            dlz: Vec::new(),
            dyndb: Vec::new(),
            store: None,
            new_zones_directory: PathBuf::from("."),
            allow_new_zones: false,
            recursion: false,
            frozen: AtomicBool::new(false),
        }
    }

    /// Identity of this view object
    pub fn id(&self) -> &ViewId {
        &self.id
    }

    /// View name
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// View class
    pub fn class(&self) -> DNSClass {
        self.id.class()
    }

    /// Looks up the zone for `name`
    pub fn find_zone(&self, name: &Name) -> ZoneMatch {
        self.zones.read().find(name)
    }

    /// The zone with exactly this origin
    pub fn zone(&self, name: &Name) -> Option<Arc<Zone>> {
        self.zones.read().get(name)
    }

    /// All zones of the table
    pub fn zones(&self) -> Vec<Arc<Zone>> {
        self.zones.read().iter().cloned().collect()
    }

    /// Number of zones in the table
    pub fn zone_count(&self) -> usize {
        self.zones.read().len()
    }

    /// Adds a zone to the table, failing on duplicates or when frozen
    pub fn add_zone(&self, zone: Arc<Zone>) -> Result<()> {
        if self.is_frozen() {
            return Err(ErrorKind::ViewFrozen(self.name().to_string()).into());
        }
        self.zones.write().insert(zone)
    }

    /// Replaces the table entry for the zone's origin
    pub(crate) fn replace_zone(&self, zone: Arc<Zone>) -> Option<Arc<Zone>> {
        self.zones.write().upsert(zone)
    }

    /// Removes a zone from the table
    pub fn remove_zone(&self, name: &Name) -> Option<Arc<Zone>> {
        self.zones.write().remove(name)
    }

    /// The redirect zone
    pub fn redirect(&self) -> Option<Arc<Zone>> {
        self.redirect.read().clone()
    }

    pub(crate) fn set_redirect(&self, zone: Option<Arc<Zone>>) {
        *self.redirect.write() = zone;
    }

    /// The managed-keys zone
    pub fn managed_keys(&self) -> Option<&Arc<Zone>> {
        self.managed_keys.as_ref()
    }

    /// Every zone object this view holds, table zones first
    pub fn all_zones(&self) -> Vec<Arc<Zone>> {
        let mut zones = self.zones();
        zones.extend(self.redirect());
        zones.extend(self.managed_keys.clone());
        zones
    }

    /// The deepest forwarding entry at or above `name`
    pub fn forwarders_for(&self, name: &Name) -> Option<(Name, Forwarders)> {
        self.forwarders
            .read()
            .find(name)
            .map(|(n, f)| (n.clone(), f.clone()))
    }

    /// The forwarding entry at exactly `name`
    pub fn forwarders_at(&self, name: &Name) -> Option<Forwarders> {
        self.forwarders.read().get(name).cloned()
    }

    /// True if forwarding is configured at or below `name`
    pub fn forwards_at_or_below(&self, name: &Name) -> bool {
        self.forwarders.read().forwards_at_or_below(name)
    }

    pub(crate) fn add_forwarders(&self, name: Name, forwarders: Forwarders) {
        self.forwarders.write().insert(name, forwarders);
    }

    /// True if `name` is marked delegation-only
    pub fn is_delegation_only(&self, name: &Name) -> bool {
        if name.is_root() && self.root_delegation_only.is_some() {
            return true;
        }
        self.delegation_only.read().contains(&LowerName::new(name))
    }

    pub(crate) fn add_delegation_only(&self, name: &Name) {
        debug!("view {}: {name} is delegation-only", self.id);
        self.delegation_only.write().insert(LowerName::new(name));
    }

    /// Names excluded from root delegation-only, if that is enabled
    pub fn root_delegation_only(&self) -> Option<&[Name]> {
        self.root_delegation_only.as_deref()
    }

    /// Root hints
    pub fn hints(&self) -> Option<Hints> {
        self.hints.read().clone()
    }

    pub(crate) fn set_hints(&self, hints: Option<Hints>) {
        *self.hints.write() = hints;
    }

    /// The response-policy table
    pub fn rpz(&self) -> Option<&Arc<RpzTable>> {
        self.rpz.as_ref()
    }

    /// Catalog zones
    pub fn catz(&self) -> Option<&Arc<CatalogZones>> {
        self.catz.as_ref()
    }

    /// The cache
    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    /// The settings the cache was chosen with
    pub fn cache_params(&self) -> Option<&CacheParams> {
        self.cache_params.as_ref()
    }

    /// True if another view owns the cache
    pub fn cache_shared(&self) -> bool {
        self.cache_shared
    }

    /// The resolver
    pub fn resolver(&self) -> Option<&Resolver> {
        self.resolver.as_ref()
    }

    /// Access control
    pub fn acls(&self) -> Option<&ViewAcls> {
        self.acls.as_ref()
    }

    /// TSIG keys
    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// DNSSEC settings
    pub fn dnssec(&self) -> Option<&DnssecSettings> {
        self.dnssec.as_ref()
    }

    /// Negative trust anchors
    pub fn ntas(&self) -> Option<&NtaTable> {
        self.dnssec.as_ref().map(|d| &d.ntas)
    }

    /// `server` statements
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// The `server` statement for `addr`, longest prefix wins
    pub fn peer(&self, addr: std::net::IpAddr) -> Option<&Peer> {
        self.peers
            .iter()
            .filter(|p| p.network.contains(&addr))
            .max_by_key(|p| p.network.prefix_len())
    }

    /// Answer shaping
    pub fn answers(&self) -> &AnswerPolicy {
        &self.answers
    }

    /// Response rate limiting
    pub fn rrl(&self) -> Option<&RateLimit> {
        self.rrl.as_ref()
    }

    /// DNS64 prefixes
    pub fn dns64(&self) -> &[IpNet] {
        &self.dns64
    }

    /// dnstap message types
    pub fn dnstap(&self) -> &[String] {
        &self.dnstap
    }

    /// Searchable DLZ databases
    pub fn dlz(&self) -> &[Arc<dyn DlzDatabase>] {
        &self.dlz
    }

    /// dyndb instances
    pub fn dyndb(&self) -> &[Arc<dyn DyndbInstance>] {
        &self.dyndb
    }

    /// The new-zone store
    pub fn store(&self) -> Option<&Arc<dyn ZoneStore>> {
        self.store.as_ref()
    }

    /// Where the new-zone store and other view state files live
    pub fn new_zones_directory(&self) -> &Path {
        &self.new_zones_directory
    }

    /// True if zones may be added at runtime
    pub fn allow_new_zones(&self) -> bool {
        self.allow_new_zones
    }

    /// True if the view recurses
    pub fn recursion(&self) -> bool {
        self.recursion
    }

    /// Prevents ad-hoc zone additions
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Allows zone additions again
    pub fn thaw(&self) {
        self.frozen.store(false, Ordering::Release);
    }

    /// True while frozen
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id)
            .field("zones", &self.zone_count())
            .field("frozen", &self.is_frozen())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name(), self.class())
    }
}

/// The production list of views, in match order
#[derive(Debug, Default)]
pub struct ViewList {
    views: Vec<Arc<View>>,
}

impl ViewList {
    /// A list of `views`
    pub fn new(views: Vec<Arc<View>>) -> Self {
        Self { views }
    }

    /// The view with this name and class
    pub fn find(&self, name: &str, class: DNSClass) -> Option<&Arc<View>> {
        self.views
            .iter()
            .find(|v| v.name() == name && v.class() == class)
    }

    /// All views
    pub fn iter(&self) -> impl Iterator<Item = &Arc<View>> {
        self.views.iter()
    }

    /// All views as a slice
    pub fn as_slice(&self) -> &[Arc<View>] {
        &self.views
    }

    /// Number of views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// True without views
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::zone::ZoneKind;

    #[test]
    fn test_view_ids_differ_per_object() {
        let a = ViewId::new("v", DNSClass::IN);
        let b = ViewId::new("v", DNSClass::IN);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_frozen_view_refuses_zones() {
        let view = View::new("v", DNSClass::IN);
        let zone = Zone::new(Name::from_str("example.").unwrap(), DNSClass::IN, ZoneKind::Primary, vec![]);
        view.freeze();
        let err = view.add_zone(zone.clone()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ViewFrozen(v) if v == "v"));

        view.thaw();
        view.add_zone(zone).unwrap();
        assert_eq!(view.zone_count(), 1);
    }

    #[test]
    fn test_peer_longest_prefix() {
        let mut view = View::new("v", DNSClass::IN);
        view.peers = vec![
            Peer {
                network: "192.0.2.0/24".parse().unwrap(),
                options: OptionMap::new(),
            },
            Peer {
                network: "192.0.2.1/32".parse().unwrap(),
                options: OptionMap::new(),
            },
        ];
        let peer = view.peer("192.0.2.1".parse().unwrap()).unwrap();
        assert_eq!(peer.network.prefix_len(), 32);
        assert!(view.peer("198.51.100.1".parse().unwrap()).is_none());
    }
}
