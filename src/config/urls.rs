//! Registry URLs

/// Default dependency registry base URL
///
/// Artifacts live at `<registry>/<name>/<version>/<name>-<version>.tar.gz`.
pub const DEFAULT_REGISTRY: &str = "https://registry.raft-build.dev/v1";
