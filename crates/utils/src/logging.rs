//! provides logging helpers

use std::io::Stderr;

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format::DefaultFields;
use tracing_subscriber::fmt::format::Format;
use tracing_subscriber::fmt::format::Full;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Registry;

/// Build the default stderr fmt layer, shared by both daemons.
pub fn get_fmt_layer() -> Layer<Registry, DefaultFields, Format<Full>, fn() -> Stderr> {
    layer()
        .with_writer(std::io::stderr as fn() -> Stderr)
        .with_target(true)
}

/// initiate the global tracing subscriber, filter controlled via `RUST_LOG`
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = get_fmt_layer().with_filter(env_filter);

    registry().with(fmt_layer).init();
}
