// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! TSIG keyrings, trust anchors and negative trust anchors

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use data_encoding::{BASE64, HEXLOWER_PERMISSIVE};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use toml::Value;
use tracing::{debug, info, warn};

use crate::config::{AnchorType, ConfigMaps, KeyConfig, TrustAnchorConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::proto::rr::{LowerName, Name};

/// HMAC algorithms accepted for TSIG
const TSIG_ALGORITHMS: &[&str] = &[
    "hmac-md5",
    "hmac-sha1",
    "hmac-sha224",
    "hmac-sha256",
    "hmac-sha384",
    "hmac-sha512",
];

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn decode_base64(key: &str, text: &str) -> ConfigResult<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| ConfigError::invalid(key, format_args!("bad base64: {e}")))
}

/// A TSIG key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TsigKey {
    name: Name,
    algorithm: String,
    secret: Vec<u8>,
}

impl TsigKey {
    /// Constructs a key, checking the algorithm
    pub fn new(name: Name, algorithm: &str, secret: Vec<u8>) -> ConfigResult<Self> {
        let algorithm = algorithm.to_ascii_lowercase();
        if !TSIG_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(ConfigError::invalid(
                "algorithm",
                format_args!("key '{name}': unsupported algorithm '{algorithm}'"),
            ));
        }
        Ok(Self {
            name,
            algorithm,
            secret,
        })
    }

    /// A key from a `[[keys]]` entry
    pub fn from_config(config: &KeyConfig) -> ConfigResult<Self> {
        let name = Name::from_str(&config.name)?;
        let secret = decode_base64("secret", &config.secret)?;
        Self::new(name, &config.algorithm, secret)
    }

    /// A key with a fresh random secret
    pub fn generate(name: Name, algorithm: &str) -> ConfigResult<Self> {
        let mut secret = vec![0_u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(name, algorithm, secret)
    }

    /// Key name
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Algorithm name
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Raw secret
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// The key as a `[[keys]]` entry
    pub fn to_config(&self) -> KeyConfig {
        KeyConfig {
            name: self.name.to_string(),
            algorithm: self.algorithm.clone(),
            secret: BASE64.encode(&self.secret),
        }
    }
}

/// Writes the session key for local dynamic updates
pub fn write_session_key(path: &Path, key: &TsigKey) -> io::Result<()> {
    #[derive(Serialize)]
    struct SessionKeyFile {
        keys: Vec<KeyConfig>,
    }

    let text = toml::to_string(&SessionKeyFile {
        keys: vec![key.to_config()],
    })
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, text)?;
    info!("session key {} written to {}", key.name(), path.display());
    Ok(())
}

/// The static keys of a view
#[derive(Debug, Default)]
pub struct Keyring {
    keys: BTreeMap<LowerName, Arc<TsigKey>>,
    dynamic: Option<Arc<DynamicKeyring>>,
}

impl Keyring {
    /// Builds the keyring from view and global key statements, view keys winning
    pub fn from_config<'a>(
        view_keys: impl IntoIterator<Item = &'a KeyConfig>,
        global_keys: impl IntoIterator<Item = &'a KeyConfig>,
        session_key: Option<&Arc<TsigKey>>,
    ) -> ConfigResult<Self> {
        let mut keyring = Self::default();
        for config in view_keys.into_iter().chain(global_keys) {
            let key = TsigKey::from_config(config)?;
            let name = LowerName::new(key.name());
            if keyring.keys.contains_key(&name) {
                debug!("key {name} already defined, ignoring later definition");
                continue;
            }
            keyring.keys.insert(name, Arc::new(key));
        }
        if let Some(session_key) = session_key {
            keyring
                .keys
                .entry(LowerName::new(session_key.name()))
                .or_insert_with(|| session_key.clone());
        }
        Ok(keyring)
    }

    /// Looks up a key
    pub fn get(&self, name: &Name) -> Option<&Arc<TsigKey>> {
        self.keys.get(&LowerName::new(name))
    }

    /// Number of static keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True without static keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The keyring of keys negotiated at runtime
    pub fn dynamic(&self) -> Option<&Arc<DynamicKeyring>> {
        self.dynamic.as_ref()
    }

    pub(crate) fn set_dynamic(&mut self, dynamic: Arc<DynamicKeyring>) {
        self.dynamic = Some(dynamic);
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct StoredKey {
    name: String,
    algorithm: String,
    secret: String,
    expire: i64,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoredKeys {
    #[serde(default)]
    keys: Vec<StoredKey>,
}

/// Keys negotiated at runtime with TKEY, carried across reconfiguration
#[derive(Debug, Default)]
pub struct DynamicKeyring {
    keys: Mutex<BTreeMap<LowerName, (Arc<TsigKey>, i64)>>,
}

impl DynamicKeyring {
    /// An empty keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key expiring after `lifetime`
    pub fn add(&self, key: TsigKey, lifetime: Duration) {
        let expire = now().saturating_add(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX));
        self.keys
            .lock()
            .insert(LowerName::new(key.name()), (Arc::new(key), expire));
    }

    /// Looks up an unexpired key
    pub fn get(&self, name: &Name) -> Option<Arc<TsigKey>> {
        let keys = self.keys.lock();
        keys.get(&LowerName::new(name))
            .filter(|(_, expire)| *expire > now())
            .map(|(key, _)| key.clone())
    }

    /// Number of keys, expired ones included
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// True without keys
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    /// Writes unexpired keys to `path`
    pub fn save(&self, path: &Path) -> io::Result<usize> {
        let now = now();
        let stored = StoredKeys {
            keys: self
                .keys
                .lock()
                .values()
                .filter(|(_, expire)| *expire > now)
                .map(|(key, expire)| StoredKey {
                    name: key.name().to_string(),
                    algorithm: key.algorithm().to_string(),
                    secret: BASE64.encode(key.secret()),
                    expire: *expire,
                })
                .collect(),
        };

        let text = toml::to_string(&stored).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)?;
        Ok(stored.keys.len())
    }

    /// Reads a keyring written by [`Self::save`], `None` if the file does not exist
    pub fn restore(path: &Path) -> ConfigResult<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredKeys = toml::from_str(&text)?;
        let now = now();
        let keyring = Self::new();
        {
            let mut keys = keyring.keys.lock();
            for entry in stored.keys.into_iter().filter(|k| k.expire > now) {
                let key = TsigKey::new(
                    Name::from_str(&entry.name)?,
                    &entry.algorithm,
                    decode_base64("secret", &entry.secret)?,
                )?;
                keys.insert(LowerName::new(key.name()), (Arc::new(key), entry.expire));
            }
        }
        debug!("restored {} dynamic keys from {}", keyring.len(), path.display());
        Ok(Some(keyring))
    }
}

/// Key material of a trust anchor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnchorData {
    /// A DNSKEY
    Key {
        /// Flags field
        flags: u16,
        /// Protocol field
        protocol: u8,
        /// Public key
        public_key: Vec<u8>,
    },
    /// A DS
    Ds {
        /// Digest type
        digest_type: u8,
        /// Digest bytes
        digest: Vec<u8>,
    },
}

/// A trust anchor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustAnchor {
    /// Owner
    pub name: Name,
    /// DNSSEC algorithm
    pub algorithm: u8,
    /// Key tag of the key, or the tag named by the DS
    pub key_tag: u16,
    /// Key or digest
    pub data: AnchorData,
    /// Maintained with RFC 5011 through the managed-keys zone
    pub managed: bool,
}

/// RFC 4034 appendix B key tag over DNSKEY rdata
pub fn key_tag(flags: u16, protocol: u8, algorithm: u8, public_key: &[u8]) -> u16 {
    let mut rdata = Vec::with_capacity(4 + public_key.len());
    rdata.extend_from_slice(&flags.to_be_bytes());
    rdata.push(protocol);
    rdata.push(algorithm);
    rdata.extend_from_slice(public_key);

    let mut ac: u32 = 0;
    for (i, byte) in rdata.iter().enumerate() {
        ac += if i & 1 == 1 {
            u32::from(*byte)
        } else {
            u32::from(*byte) << 8
        };
    }
    ac += (ac >> 16) & 0xFFFF;
    (ac & 0xFFFF) as u16
}

impl TrustAnchor {
    /// An anchor from a `[[trust-anchors]]` entry
    pub fn from_config(config: &TrustAnchorConfig) -> ConfigResult<Self> {
        let name = Name::from_str(&config.name)?;
        let data = match config.anchor_type {
            AnchorType::StaticKey | AnchorType::InitialKey => {
                let key = config
                    .key
                    .as_deref()
                    .ok_or_else(|| ConfigError::invalid("trust-anchors", format_args!("{name}: key anchor without 'key'")))?;
                AnchorData::Key {
                    flags: config.flags.unwrap_or(257),
                    protocol: config.protocol.unwrap_or(3),
                    public_key: decode_base64("trust-anchors", key)?,
                }
            }
            AnchorType::StaticDs | AnchorType::InitialDs => {
                let digest = config
                    .digest
                    .as_deref()
                    .ok_or_else(|| ConfigError::invalid("trust-anchors", format_args!("{name}: DS anchor without 'digest'")))?;
                AnchorData::Ds {
                    digest_type: config.digest_type.unwrap_or(2),
                    digest: HEXLOWER_PERMISSIVE
                        .decode(digest.as_bytes())
                        .map_err(|e| ConfigError::invalid("trust-anchors", format_args!("{name}: bad digest: {e}")))?,
                }
            }
        };

        let key_tag = match (&data, config.key_tag) {
            (AnchorData::Key { flags, protocol, public_key }, _) => {
                key_tag(*flags, *protocol, config.algorithm, public_key)
            }
            (AnchorData::Ds { .. }, Some(tag)) => tag,
            (AnchorData::Ds { .. }, None) => {
                return Err(ConfigError::invalid(
                    "trust-anchors",
                    format_args!("{name}: DS anchor without 'key-tag'"),
                ))
            }
        };

        Ok(Self {
            name,
            algorithm: config.algorithm,
            key_tag,
            data,
            managed: config.anchor_type.is_managed(),
        })
    }

    /// The root zone KSK-2017 as an initial DS
    pub fn builtin_root() -> Self {
        Self {
            name: Name::root(),
            algorithm: 8,
            key_tag: 20326,
            data: AnchorData::Ds {
                digest_type: 2,
                digest: vec![
                    0xE0, 0x6D, 0x44, 0xB8, 0x0B, 0x8F, 0x1D, 0x39, 0xA9, 0x5C, 0x0B, 0x0D, 0x7C,
                    0x65, 0xD0, 0x84, 0x58, 0xE8, 0x80, 0x40, 0x9B, 0xBC, 0x68, 0x34, 0x57, 0x10,
                    0x42, 0x37, 0xC7, 0xF8, 0xEC, 0x8D,
                ],
            },
            managed: true,
        }
    }
}

/// The `dnssec-validation` setting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// No validation
    Disabled,
    /// Validate with configured anchors only
    Enabled,
    /// Validate, adding the root anchor from the bindkeys file or the builtin one
    Auto,
}

impl ValidationMode {
    /// Reads `dnssec-validation`, which may be a boolean or `yes`/`no`/`auto`
    pub fn from_maps(maps: &ConfigMaps<'_>) -> ConfigResult<Self> {
        match maps.get("dnssec-validation") {
            None => Ok(Self::Auto),
            Some(Value::Boolean(true)) => Ok(Self::Enabled),
            Some(Value::Boolean(false)) => Ok(Self::Disabled),
            Some(Value::String(s)) => match s.as_str() {
                "auto" => Ok(Self::Auto),
                "yes" => Ok(Self::Enabled),
                "no" => Ok(Self::Disabled),
                other => Err(ConfigError::invalid("dnssec-validation", format_args!("'{other}'"))),
            },
            Some(other) => Err(ConfigError::invalid(
                "dnssec-validation",
                format_args!("expected boolean or string, found {}", other.type_str()),
            )),
        }
    }

    /// True unless disabled
    pub fn is_enabled(self) -> bool {
        self != Self::Disabled
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AnchorFile {
    #[serde(default)]
    trust_anchors: Vec<TrustAnchorConfig>,
}

/// Reads the anchors of a bindkeys file, `None` if it does not exist
pub fn read_bindkeys(path: &Path) -> ConfigResult<Option<Vec<TrustAnchorConfig>>> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let file: AnchorFile = toml::from_str(&text)?;
            Ok(Some(file.trust_anchors))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Trust anchors of a view
#[derive(Debug, Default)]
pub struct KeyTable {
    anchors: Vec<TrustAnchor>,
    must_be_secure: BTreeMap<LowerName, bool>,
}

impl KeyTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds anchors, skipping exact duplicates
    pub fn add(&mut self, anchor: TrustAnchor) {
        if self.anchors.contains(&anchor) {
            return;
        }
        debug!("trust anchor {} tag {} alg {}", anchor.name, anchor.key_tag, anchor.algorithm);
        self.anchors.push(anchor);
    }

    /// Loads configured anchors, view ones first, then the auto root anchor
    pub fn load(
        view: &str,
        mode: ValidationMode,
        configured: impl IntoIterator<Item = TrustAnchor>,
        bindkeys: Option<&[TrustAnchorConfig]>,
    ) -> ConfigResult<Self> {
        let mut table = Self::new();
        for anchor in configured {
            table.add(anchor);
        }

        if mode == ValidationMode::Auto && table.anchors_for(&Name::root()).next().is_none() {
            match bindkeys {
                Some(anchors) => {
                    for anchor in anchors.iter().filter(|a| a.name == ".") {
                        table.add(TrustAnchor::from_config(anchor)?);
                    }
                }
                None => {
                    info!("view '{view}': using built-in root key");
                    table.add(TrustAnchor::builtin_root());
                }
            }
        }

        if mode.is_enabled() && table.anchors.is_empty() {
            warn!("view '{view}': dnssec-validation is enabled but there are no trust anchors");
        }
        Ok(table)
    }

    /// All anchors
    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    /// Anchors at exactly `name`
    pub fn anchors_for<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = &'a TrustAnchor> + 'a {
        self.anchors.iter().filter(move |a| &a.name == name)
    }

    /// True if any anchor needs the managed-keys zone
    pub fn has_managed(&self) -> bool {
        self.anchors.iter().any(|a| a.managed)
    }

    /// Applies `dnssec-must-be-secure = [{ domain, secure }]`
    pub fn set_must_be_secure(&mut self, maps: &ConfigMaps<'_>) -> ConfigResult<()> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Clause {
            domain: String,
            secure: bool,
        }

        for clause in maps.get_as::<Vec<Clause>>("dnssec-must-be-secure")?.unwrap_or_default() {
            let name = Name::from_str(&clause.domain)?;
            self.must_be_secure.insert(LowerName::new(&name), clause.secure);
        }
        Ok(())
    }

    /// The must-be-secure setting at `name`, if any
    pub fn must_be_secure(&self, name: &Name) -> Option<bool> {
        self.must_be_secure.get(&LowerName::new(name)).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
struct Nta {
    name: String,
    expire: i64,
    #[serde(default)]
    forced: bool,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoredNtas {
    #[serde(default)]
    nta: Vec<Nta>,
}

/// Negative trust anchors of a view
#[derive(Debug)]
pub struct NtaTable {
    entries: Mutex<BTreeMap<LowerName, (Name, i64, bool)>>,
    lifetime: Duration,
    recheck: Duration,
}

/// Longest lifetime of a negative trust anchor
pub const MAX_NTA_LIFETIME: Duration = Duration::from_secs(604_800);

impl NtaTable {
    /// A table with default lifetime and recheck interval
    pub fn new(lifetime: Duration, recheck: Duration) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            lifetime: lifetime.min(MAX_NTA_LIFETIME),
            recheck,
        }
    }

    /// A table from `nta-lifetime` and `nta-recheck`
    pub fn from_maps(maps: &ConfigMaps<'_>) -> ConfigResult<Self> {
        let lifetime = maps.get_secs("nta-lifetime")?.unwrap_or(3600);
        let recheck = maps.get_secs("nta-recheck")?.unwrap_or(300);
        Ok(Self::new(
            Duration::from_secs(u64::from(lifetime)),
            Duration::from_secs(u64::from(recheck)),
        ))
    }

    /// Default lifetime
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Interval at which validation is retried, zero for never
    pub fn recheck(&self) -> Duration {
        self.recheck
    }

    /// Adds or replaces an anchor, returning its expiry as a unix time
    pub fn add(&self, name: &Name, lifetime: Option<Duration>, forced: bool) -> i64 {
        let lifetime = lifetime.unwrap_or(self.lifetime).min(MAX_NTA_LIFETIME);
        let expire = now() + lifetime.as_secs() as i64;
        self.entries
            .lock()
            .insert(LowerName::new(name), (name.clone(), expire, forced));
        expire
    }

    /// Removes an anchor, true if there was one
    pub fn remove(&self, name: &Name) -> bool {
        self.entries.lock().remove(&LowerName::new(name)).is_some()
    }

    /// True if an unexpired anchor covers `name`
    pub fn covers(&self, name: &Name) -> bool {
        let now = now();
        self.entries
            .lock()
            .values()
            .any(|(nta, expire, _)| *expire > now && nta.zone_of(name))
    }

    /// Number of anchors, expired ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True without anchors
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// One line per anchor for `nta -dump`
    pub fn dump(&self, view: &str) -> Vec<String> {
        let now = now();
        self.entries
            .lock()
            .values()
            .map(|(name, expire, forced)| {
                let when = OffsetDateTime::from_unix_timestamp(*expire)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|_| expire.to_string());
                let state = if *expire > now { "expiry" } else { "expired" };
                let forced = if *forced { ", forced" } else { "" };
                format!("{name}/{view}: {state} {when}{forced}")
            })
            .collect()
    }

    /// Copies the unexpired anchors of `old`, returning how many were copied
    pub fn carry_from(&self, old: &NtaTable) -> usize {
        let now = now();
        let old = old.entries.lock();
        let mut entries = self.entries.lock();
        let mut carried = 0;
        for (key, entry) in old.iter().filter(|(_, (_, expire, _))| *expire > now) {
            entries.insert(key.clone(), entry.clone());
            carried += 1;
        }
        carried
    }

    /// Writes unexpired anchors to `path`
    pub fn save(&self, path: &Path) -> io::Result<usize> {
        let now = now();
        let stored = StoredNtas {
            nta: self
                .entries
                .lock()
                .values()
                .filter(|(_, expire, _)| *expire > now)
                .map(|(name, expire, forced)| Nta {
                    name: name.to_string(),
                    expire: *expire,
                    forced: *forced,
                })
                .collect(),
        };
        let text = toml::to_string(&stored).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)?;
        Ok(stored.nta.len())
    }

    /// Loads unexpired anchors from `path`, returning how many were added
    pub fn restore(&self, path: &Path) -> ConfigResult<usize> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredNtas = toml::from_str(&text)?;
        let now = now();
        let mut entries = self.entries.lock();
        let mut restored = 0;
        for nta in stored.nta.into_iter().filter(|n| n.expire > now) {
            let name = Name::from_str(&nta.name)?;
            entries.insert(LowerName::new(&name), (name, nta.expire, nta.forced));
            restored += 1;
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    #[test]
    fn test_key_tag() {
        // RFC 4034 section 5.4 example key
        let key = BASE64
            .decode(
                b"AQOeiiR0GOMYkDshWoSKz9XzfwJr1AYtsmx3TGkJaNXVbfi/2pHm822aJ5iI9BMzNXxeYCmZDRD99WYwYqUSdjMmmAphXdvxegXd/M5+X7OrzKBaMbCVdFLUUh6DhweJBjEVv5f2wwjM9XzcnOf+EPbtG9DMBmADjFDc2w/rljwvFw==",
            )
            .unwrap();
        assert_eq!(key_tag(256, 3, 5, &key), 60485);
    }

    #[test]
    fn test_tsig_key() {
        let config = KeyConfig {
            name: "rndc-key".to_string(),
            algorithm: "HMAC-SHA256".to_string(),
            secret: "c2VjcmV0".to_string(),
        };
        let key = TsigKey::from_config(&config).unwrap();
        assert_eq!(key.algorithm(), "hmac-sha256");
        assert_eq!(key.secret(), b"secret");

        let bad = KeyConfig {
            algorithm: "hmac-crc32".to_string(),
            ..config
        };
        assert!(TsigKey::from_config(&bad).is_err());
    }

    #[test]
    fn test_keyring_view_wins() {
        let view = [KeyConfig {
            name: "k".to_string(),
            algorithm: "hmac-sha1".to_string(),
            secret: "dmlldw==".to_string(),
        }];
        let global = [KeyConfig {
            name: "K.".to_string(),
            algorithm: "hmac-sha256".to_string(),
            secret: "Z2xvYmFs".to_string(),
        }];
        let keyring = Keyring::from_config(&view, &global, None).unwrap();
        assert_eq!(keyring.len(), 1);
        assert_eq!(keyring.get(&name("k.")).unwrap().secret(), b"view");
    }

    #[test]
    fn test_dynamic_keyring_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.tsigkeys");
        assert!(DynamicKeyring::restore(&path).unwrap().is_none());

        let keyring = DynamicKeyring::new();
        keyring.add(
            TsigKey::generate(name("tkey.example."), "hmac-sha256").unwrap(),
            Duration::from_secs(3600),
        );
        assert_eq!(keyring.save(&path).unwrap(), 1);

        let restored = DynamicKeyring::restore(&path).unwrap().unwrap();
        assert_eq!(
            restored.get(&name("tkey.example.")).unwrap().secret(),
            keyring.get(&name("tkey.example.")).unwrap().secret()
        );
    }

    #[test]
    fn test_auto_root_anchor() {
        let table = KeyTable::load("v", ValidationMode::Auto, [], None).unwrap();
        assert_eq!(table.anchors(), &[TrustAnchor::builtin_root()]);
        assert!(table.has_managed());

        let table = KeyTable::load("v", ValidationMode::Enabled, [], None).unwrap();
        assert!(table.anchors().is_empty());
    }

    #[test]
    fn test_nta_cover_and_persist() {
        let table = NtaTable::new(Duration::from_secs(3600), Duration::from_secs(300));
        table.add(&name("broken.example."), None, false);
        assert!(table.covers(&name("www.broken.example.")));
        assert!(!table.covers(&name("example.")));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.nta");
        assert_eq!(table.save(&path).unwrap(), 1);

        let restored = NtaTable::new(Duration::from_secs(3600), Duration::from_secs(300));
        assert_eq!(restored.restore(&path).unwrap(), 1);
        assert!(restored.covers(&name("broken.example.")));

        assert!(restored.remove(&name("BROKEN.example.")));
        assert!(!restored.covers(&name("broken.example.")));
        assert_eq!(restored.dump("v").len(), 0);
    }

    #[test]
    fn test_session_key_file() {
        #[derive(Deserialize)]
        struct SessionKeyFile {
            keys: Vec<KeyConfig>,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.key");
        let key = TsigKey::generate(name("local-ddns."), "hmac-sha256").unwrap();
        write_session_key(&path, &key).unwrap();

        let file: SessionKeyFile = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(file.keys, vec![key.to_config()]);
        let read = TsigKey::from_config(&file.keys[0]).unwrap();
        assert_eq!(read.name(), key.name());
        assert_eq!(read.secret(), key.secret());
    }

    #[test]
    fn test_nta_carry_skips_expired() {
        let old = NtaTable::new(Duration::from_secs(3600), Duration::from_secs(300));
        old.add(&name("live.example."), None, true);
        old.add(&name("gone.example."), Some(Duration::ZERO), false);

        let new = NtaTable::new(Duration::from_secs(60), Duration::from_secs(0));
        assert_eq!(new.carry_from(&old), 1);
        assert!(new.covers(&name("live.example.")));
        assert_eq!(new.len(), 1);
        assert!(new.dump("v")[0].ends_with(", forced"));
    }
}
