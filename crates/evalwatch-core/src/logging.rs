// SPDX-License-Identifier: Apache-2.0

use crate::env::{env_bool, env_string};
use crate::{ENV_EVALWATCH_LOG, ENV_EVALWATCH_LOG_JSON};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub json: bool,
    /// Directive used when `EVALWATCH_LOG` is unset.
    pub default_directive: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            json: env_bool(ENV_EVALWATCH_LOG_JSON, false),
            default_directive: "info".to_string(),
        }
    }
}

impl LogOptions {
    /// Maps a `-v` count onto a directive: 0 keeps the default, 1 is debug, 2+ is trace.
    #[must_use]
    pub fn with_verbosity(mut self, verbose: u8, quiet: bool) -> Self {
        self.default_directive = match (quiet, verbose) {
            (true, _) => "error",
            (false, 0) => self.default_directive.as_str(),
            (false, 1) => "debug",
            (false, _) => "trace",
        }
        .to_string();
        self
    }
}

#[must_use]
pub fn build_filter(default_directive: &str) -> EnvFilter {
    match env_string(ENV_EVALWATCH_LOG) {
        Some(raw) => EnvFilter::try_new(raw).unwrap_or_else(|_| EnvFilter::new(default_directive)),
        None => EnvFilter::new(default_directive),
    }
}

/// Subscriber writing to `writer`, without installing it globally.
pub fn subscriber_with_writer<W>(
    opts: &LogOptions,
    writer: W,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = build_filter(&opts.default_directive);
    if opts.json {
        Box::new(
            Registry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer)),
        )
    } else {
        Box::new(
            Registry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(writer)),
        )
    }
}

/// Installs the process-wide subscriber on stderr.
pub fn init_tracing(opts: &LogOptions) -> Result<(), String> {
    let filter = build_filter(&opts.default_directive);
    let result = if opts.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| format!("tracing init failed: {e}"))
}
