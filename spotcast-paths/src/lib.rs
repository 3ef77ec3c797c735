//! Filesystem locations for spotcast.
//!
//! # Platform Behavior
//!
//! | Platform | Config Directory | Socket Directory |
//! |----------|------------------|------------------|
//! | Linux    | `~/.config/spotcast` | `$XDG_RUNTIME_DIR/spotcast` or data dir |
//! | macOS    | `~/Library/Application Support/spotcast` | Same as data dir |
//! | Windows  | `%APPDATA%/spotcast` | Same as data dir |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine config directory")]
    NoConfigDirectory,

    #[error("Could not determine data directory")]
    NoDataDirectory,
}

const APP_NAME: &str = "spotcast";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Occupancy feed socket file name
const FEED_SOCKET_NAME: &str = "feed.sock";

/// Create `dir` with mode 0o700 if missing
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Application data directory, created on first use.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or(PathError::NoDataDirectory)?
        .join(APP_NAME);
    ensure_private_dir(&data_dir)?;
    Ok(data_dir)
}

/// Configuration directory, created on first use.
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(PathError::NoConfigDirectory)?
        .join(APP_NAME);
    ensure_private_dir(&config_dir)?;
    Ok(config_dir)
}

/// `<config_dir>/config.toml`. The file itself may not exist.
pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Directory for local Unix sockets.
///
/// Linux prefers `$XDG_RUNTIME_DIR/spotcast`; everything else uses the data dir.
pub fn get_socket_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            if runtime_dir.exists() {
                let socket_dir = runtime_dir.join(APP_NAME);
                ensure_private_dir(&socket_dir)?;
                return Ok(socket_dir);
            }
        }
    }

    get_data_dir()
}

/// Path of the local occupancy feed socket
pub fn get_feed_socket_path() -> Result<PathBuf> {
    Ok(get_socket_dir()?.join(FEED_SOCKET_NAME))
}

/// Restrict a socket file to its owner (0o600). No-op if it doesn't exist.
#[cfg(unix)]
pub fn secure_socket_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if socket_path.exists() {
        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600)).with_context(|| {
            format!(
                "Failed to set socket permissions: {}",
                socket_path.display()
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn secure_socket_permissions(_socket_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_path() {
        let path = get_config_file_path().expect("Should get config file path");
        assert!(path.ends_with("spotcast/config.toml"));
        assert!(path.parent().map(Path::exists).unwrap_or(false));
    }

    #[test]
    fn test_feed_socket_path() {
        let path = get_feed_socket_path().expect("Should get feed socket path");
        assert_eq!(path.file_name().unwrap(), "feed.sock");
    }

    #[test]
    fn test_private_dir_creation() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a").join("b");

        ensure_private_dir(&dir).unwrap();
        assert!(dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }

        // Second call is a no-op
        ensure_private_dir(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_secure_socket_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("feed.sock");
        fs::write(&path, b"").unwrap();

        secure_socket_permissions(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        assert!(secure_socket_permissions(&root.path().join("missing.sock")).is_ok());
    }
}
