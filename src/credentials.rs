//! Secrets from the runtime `.env` file, with process-env fallback.
//!
//! Only the Telegram bot token is expected here. The file must be private
//! (`0600`) on unix.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

/// Values loaded from `.env`.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Value from the file only.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value from the file, falling back to the process environment.
    /// Empty values count as missing.
    pub fn resolve(&self, key: &str) -> Option<String> {
        self.resolve_with(key, |k| std::env::var(k).ok())
    }

    /// [`Credentials::resolve`] with a custom env resolver (for testing).
    pub fn resolve_with(&self, key: &str, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        let present = |v: &String| !v.trim().is_empty();
        self.get(key)
            .map(str::to_owned)
            .filter(present)
            .or_else(|| env(key).filter(present))
    }
}

/// Load `.env` at `path`. A missing file yields empty credentials.
///
/// # Errors
///
/// Returns an error if the file is readable by others or cannot be parsed.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        debug!(path = %path.display(), "no credentials file, using process environment");
        return Ok(Credentials::default());
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;
    for item in iter {
        let (key, value) = item
            .with_context(|| format!("failed to parse entry in credentials file {}", path.display()))?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

/// Restrict a file to its owner (`0600`) where supported.
///
/// # Errors
///
/// Returns an error if permissions cannot be updated.
pub fn enforce_private_file_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?
        .permissions()
        .mode()
        & 0o777;
    anyhow::ensure!(
        mode & 0o077 == 0,
        "credentials file {} must be 0600, found {:o}",
        path.display(),
        mode
    );
    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
