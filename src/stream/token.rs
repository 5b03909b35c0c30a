use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::path::Path;

/// Opaque client-generated session token sent when a stream is opened.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// New random 128-bit token, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reuse the token persisted at `path`, or create and persist a new one.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read session token {}", path.display()))?;
            let token = raw.trim();
            if token.is_empty() {
                return Err(anyhow!("session token file {} is empty", path.display()));
            }
            return Ok(Self(token.to_string()));
        }
        let token = Self::generate();
        write_token_file(path, token.as_str())?;
        log::info!("new session token written to {}", path.display());
        Ok(token)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))
        .with_context(|| format!("write session token {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
