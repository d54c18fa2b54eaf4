use std::path::PathBuf;
use std::sync::OnceLock;

static CANOPY_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the canopy home directory (`~/.canopy/`).
/// Supports `$CANOPY_HOME` env override. Cached via `OnceLock`.
pub fn canopy_home() -> &'static PathBuf {
    CANOPY_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("CANOPY_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".canopy")
    })
}

/// `~/.canopy/logs/`
pub fn logs_dir() -> PathBuf {
    canopy_home().join("logs")
}

/// `~/.canopy/session.json`
pub fn session_file() -> PathBuf {
    canopy_home().join("session.json")
}
