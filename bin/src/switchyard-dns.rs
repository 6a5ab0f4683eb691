// Copyright 2015-2025 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `switchyard-dns` binary for running the DNS server engine
//!
//! ```text
//! Usage: switchyard-dns [options]
//!       switchyard-dns (-h | --help | --version)
//!
//! Options:
//!    -q, --quiet             Disable INFO messages, WARN and ERROR will remain
//!    -d, --debug             Turn on DEBUG messages (default is only INFO)
//!    -h, --help              Show this message
//!    -V, --version           Show the version of switchyard-dns
//!    -c FILE, --config=FILE  Path to configuration file, default is /etc/switchyard.toml
//!    --validate              Parse the configuration and count its zones, then exit
//!    --workers=N             Number of runtime worker threads
//! ```
//!
//! `SIGHUP` re-reads the configuration file and reloads every zone; `SIGTERM` and
//! `SIGINT` save dynamic keys and negative trust anchors and stop the server.

// BINARY WARNINGS
#![warn(
    clippy::dbg_macro,
    clippy::unimplemented,
    missing_copy_implementations,
    missing_docs,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    unreachable_pub
)]

use std::{
    env, fmt,
    path::{Path, PathBuf},
};

use clap::Parser;
use time::OffsetDateTime;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::runtime;
use tracing::{Event, Subscriber, error, info};
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use switchyard_server::{
    ServerBuilder, ServerContext,
    config::Config,
    server::count_configured_zones,
};

/// Cli struct for all options managed with clap derive api.
#[derive(Debug, Parser)]
#[clap(name = "Switchyard DNS server", version, about)]
struct Cli {
    /// Disable INFO messages, WARN and ERROR will remain
    #[clap(short = 'q', long = "quiet", conflicts_with = "debug")]
    pub(crate) quiet: bool,

    /// Turn on `DEBUG` messages (default is only `INFO`)
    #[clap(short = 'd', long = "debug", conflicts_with = "quiet")]
    pub(crate) debug: bool,

    /// Path to configuration file of the server
    #[clap(
        short = 'c',
        long = "config",
        default_value = "/etc/switchyard.toml",
        value_name = "FILE",
        value_hint=clap::ValueHint::FilePath,
    )]
    pub(crate) config: PathBuf,

    /// Parse the configuration, report what it declares and exit
    #[clap(long = "validate")]
    pub(crate) validate: bool,

    /// Number of runtime workers, defaults to the number of CPU cores
    #[clap(long = "workers", value_name = "N")]
    pub(crate) workers: Option<usize>,
}

/// Main method for running the server.
fn main() -> Result<(), String> {
    // this is essential for custom formatting the returned error message.
    // the displayed message of termination impl trait is not pretty.
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), String> {
    let args = Cli::parse();
    if args.quiet {
        quiet()?;
    } else if args.debug {
        debug()?;
    } else {
        default()?;
    }

    info!("Switchyard DNS {} starting...", switchyard_server::version());

    let config_path = args.config.as_path();
    info!("loading configuration from: {config_path:?}");
    let config = Config::read_config(config_path)
        .map_err(|err| format!("failed to read config file from {config_path:?}: {err}"))?;

    if args.validate {
        return validate(config_path, &config);
    }

    let mut runtime = runtime::Builder::new_multi_thread();
    runtime.enable_all().thread_name("switchyard-runtime");
    if let Some(workers) = args.workers {
        runtime.worker_threads(workers);
    }
    let runtime = runtime
        .build()
        .map_err(|err| format!("failed to initialize Tokio runtime: {err}"))?;

    let server = ServerBuilder::new()
        .config_path(config_path)
        .build()
        .map_err(|err| format!("failed to initialize server: {err}"))?;

    runtime.block_on(async move {
        server
            .load_configuration(config, true)
            .await
            .map_err(|err| format!("loading configuration failed: {err}"))?;

        info!("server starting up, awaiting signals...");
        serve(&server).await?;

        server
            .shutdown()
            .await
            .map_err(|err| format!("shutdown failed: {err}"))
    })?;

    info!("Switchyard DNS {} stopping", switchyard_server::version());
    Ok(())
}

/// Checks that the views of `config` can be derived and counts the zones they hold
fn validate(config_path: &Path, config: &Config) -> Result<(), String> {
    let defaults = Config::defaults().map_err(|err| format!("built-in defaults: {err}"))?;
    let directory = config
        .directory(&defaults)
        .map_err(|err| format!("{config_path:?}: {err}"))?;
    let zones = count_configured_zones(config, &defaults, &directory)
        .map_err(|err| format!("{config_path:?}: {err}"))?;

    info!("configuration {config_path:?} is valid: {zones} zones");
    Ok(())
}

/// Runs until a termination signal, reloading on `SIGHUP`
#[cfg(unix)]
async fn serve(server: &ServerContext) -> Result<(), String> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| format!("failed to register signal handler: {e}"))?;
    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| format!("failed to register signal handler: {e}"))?;
    let mut hangup = signal(SignalKind::hangup())
        .map_err(|e| format!("failed to register signal handler: {e}"))?;

    loop {
        tokio::select! {
            _ = terminate.recv() => {
                info!("received SIGTERM, shutting down");
                return Ok(());
            }
            _ = interrupt.recv() => {
                info!("received SIGINT, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("received SIGHUP, reloading configuration");
                match server.reload().await {
                    Ok(()) => info!("reloading configuration succeeded"),
                    Err(err) => error!("reloading configuration failed: {err}"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn serve(_server: &ServerContext) -> Result<(), String> {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
    }
    Ok(())
}

struct SwitchyardFormatter;

impl<S, N> FormatEvent<S, N> for SwitchyardFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = OffsetDateTime::now_utc();
        let now_secs = now.unix_timestamp();

        // Format values from the event's's metadata:
        let metadata = event.metadata();
        write!(
            &mut writer,
            "{}:{}:{}",
            now_secs,
            metadata.level(),
            metadata.target()
        )?;

        if let Some(line) = metadata.line() {
            write!(&mut writer, ":{line}")?;
        }

        // Format all the spans in the event's span context.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, ":{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
            }
        }

        // Write fields on the event
        write!(writer, ":")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn get_env() -> String {
    env::var("RUST_LOG").unwrap_or_default()
}

fn all_switchyard(level: impl ToString) -> String {
    format!(
        "switchyard_server={level},switchyard_dns={level},{env}",
        level = level.to_string().to_lowercase(),
        env = get_env()
    )
}

/// appends switchyard debug to RUST_LOG
fn debug() -> Result<(), String> {
    logger(tracing::Level::DEBUG)
}

/// appends switchyard info to RUST_LOG
fn default() -> Result<(), String> {
    logger(tracing::Level::INFO)
}

/// appends switchyard error to RUST_LOG
fn quiet() -> Result<(), String> {
    logger(tracing::Level::ERROR)
}

fn logger(level: tracing::Level) -> Result<(), String> {
    // Setup tracing for logging based on input
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .parse(all_switchyard(level))
        .map_err(|err| format!("failed to configure tracing/logging: {err}"))?;

    let formatter = tracing_subscriber::fmt::layer().event_format(SwitchyardFormatter);

    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();

    Ok(())
}
