use std::sync::LazyLock;

/// Defines the application version.
pub static VERSION: LazyLock<String> =
    LazyLock::new(|| env!("CARGO_PKG_VERSION").to_string());
