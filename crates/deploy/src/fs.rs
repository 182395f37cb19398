//! File system utils.

use std::path::Path;

use anyhow::Context;
use sha2::{Digest, Sha256};

pub struct FsHandler;

impl FsHandler {
    /// Create the parent directory of `path` if it doesn't exist.
    pub fn create_parent_dir(path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create directory: {}",
                parent.display()
            ))?;
            tracing::debug!("Ensured directory exists: {}", parent.display());
        }

        Ok(())
    }

    /// Read a local asset (configuration file, script, unit file) to a string.
    pub fn read_asset(path: &Path) -> anyhow::Result<String> {
        std::fs::read_to_string(path)
            .context(format!("Failed to read local file: {}", path.display()))
    }

    /// SHA-256 of a local file, hex encoded. `None` when the file does not exist.
    pub fn digest(path: &Path) -> anyhow::Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let bytes =
            std::fs::read(path).context(format!("Failed to read local file: {}", path.display()))?;
        Ok(Some(hex::encode(Sha256::digest(&bytes))))
    }

    /// Write `contents` to `path` readable by the current user only.
    ///
    /// Used for key material: inline SSH keys and generated JWT secrets.
    pub fn write_private(path: &Path, contents: &str) -> anyhow::Result<()> {
        Self::create_parent_dir(path)?;

        std::fs::write(path, contents)
            .context(format!("Failed to write file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context(format!("Failed to restrict permissions on {}", path.display()))?;
        }

        Ok(())
    }
}
