// ABOUTME: XDG Base Directory paths for mkclaw config and data storage
// ABOUTME: Resolves the config file location and the default session store directory

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "mkclaw";
const APPLICATION: &str = "mkclaw";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Data directory (e.g., ~/.local/share/mkclaw/), ./data when unavailable
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Default session store location
pub fn session_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Config directory (e.g., ~/.config/mkclaw/), current directory when unavailable
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Expand a leading `~` to the home directory. Paths that can't be expanded
/// are returned unchanged.
pub fn expand_tilde(path: &str) -> String {
    let rest = match path {
        "~" => "",
        _ => match path.strip_prefix("~/") {
            Some(rest) => rest,
            None => return path.to_string(),
        },
    };
    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(rest).to_string_lossy().to_string(),
        None => {
            tracing::warn!(path = %path, "could not determine home directory for tilde expansion");
            path.to_string()
        }
    }
}
