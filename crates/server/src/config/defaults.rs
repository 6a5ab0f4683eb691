// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Compiled-in defaults
///
/// The `[options]` table is the last layer of every lookup. The `_bind` view is the
/// built-in CHAOS view that answers `version.bind` and friends; it is configured after
/// the user's views unless the user declares a CHAOS view of the same name.
pub const DEFAULT_CONFIG: &str = r#"
[options]
directory = "."
port = 53
recursion = true
allow-new-zones = false
new-zone-store = "sqlite"
allow-query = ["any"]
allow-query-on = ["any"]
allow-query-cache = ["localnets", "localhost"]
allow-query-cache-on = ["any"]
allow-recursion = ["localnets", "localhost"]
allow-recursion-on = ["any"]
allow-transfer = ["any"]
allow-update = ["none"]
allow-update-forwarding = ["none"]
allow-notify = ["none"]
match-clients = ["any"]
match-destinations = ["any"]
match-recursive-only = false
notify = "yes"
zone-statistics = "terse"
max-journal-size = "default"
masterfile-format = "text"
database = "rbt"
check-names = "ignore"
zero-no-soa-ttl = true
zero-no-soa-ttl-cache = false
max-cache-size = "90%"
max-cache-ttl = 604800
max-ncache-ttl = 10800
max-stale-ttl = 43200
stale-answer-enable = false
stale-answer-ttl = 30
cleaning-interval = 0
dnssec-validation = "auto"
dnssec-accept-expired = false
bindkeys-file = "bind.keys.toml"
managed-keys-directory = "."
nta-lifetime = 3600
nta-recheck = 300
lame-ttl = 0
servfail-ttl = 1
edns-udp-size = 1232
max-udp-size = 1232
resolver-query-timeout = 10
resolver-retry-interval = 800
resolver-nonbackoff-tries = 3
max-rsa-exponent-size = 0
clients-per-query = 10
max-clients-per-query = 100
max-recursion-depth = 7
max-recursion-queries = 100
fetches-per-zone = 0
fetches-per-zone-response = "drop"
fetches-per-server = 0
fetches-per-server-response = "fail"
query-source = "0.0.0.0 port 0"
query-source-v6 = "::"
forward = "first"
forwarders = []
message-compression = true
minimal-responses = false
session-keyfile = "session.key.toml"
session-keyname = "local-ddns"
session-keyalg = "hmac-sha256"
dnstap = []

[[views]]
name = "_bind"
class = "CH"

[views.options]
recursion = false
notify = false
allow-new-zones = false
max-cache-size = "2M"

[[views.zones]]
name = "version.bind"
type = "primary"
database = "_builtin version"

[[views.zones]]
name = "hostname.bind"
type = "primary"
database = "_builtin hostname"

[[views.zones]]
name = "authors.bind"
type = "primary"
database = "_builtin authors"

[[views.zones]]
name = "id.server"
type = "primary"
database = "_builtin id"
"#;
