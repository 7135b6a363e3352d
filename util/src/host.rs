//! Host platform utility functions

use std::path::PathBuf;

/// Environment variable pointing at the root of the bridge software checkout. The `params` and
/// `sessions` directories are resolved relative to it.
pub const SW_ROOT_ENV_VAR: &str = "MOCAP_BRIDGE_ROOT";

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Name of the machine we're running on, if the platform reports one.
pub fn get_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}
