use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Login credentials for the single principal and the PDK system it manages.
///
/// Same shape as the `credentials.json` file kept next to the token database:
/// `{"email": "...", "password": "...", "system_id": "..."}`.
#[derive(Clone, Deserialize)]
pub struct AccountCredentials {
    pub email: String,
    pub password: String,
    /// PDK system id; the account id tokens are stored under
    pub system_id: String,
}

impl AccountCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            system_id: system_id.into(),
        }
    }

    /// Read credentials from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials file {}", path.display()))
    }

    /// Read credentials from `PDK_EMAIL`, `PDK_PASSWORD` and `PDK_SYSTEM_ID`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).with_context(|| format!("{} is not set", name));
        Ok(Self {
            email: var("PDK_EMAIL")?,
            password: var("PDK_PASSWORD")?,
            system_id: var("PDK_SYSTEM_ID")?,
        })
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("system_id", &self.system_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"email": "ops@example.com", "password": "hunter2", "system_id": "SYS123"}}"#
        )
        .unwrap();

        let creds = AccountCredentials::from_file(file.path()).unwrap();
        assert_eq!(creds.email, "ops@example.com");
        assert_eq!(creds.password, "hunter2");
        assert_eq!(creds.system_id, "SYS123");
    }

    #[test]
    fn test_from_missing_file() {
        assert!(AccountCredentials::from_file("/nonexistent/credentials.json").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = AccountCredentials::new("ops@example.com", "hunter2", "SYS123");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("ops@example.com"));
        assert!(!printed.contains("hunter2"));
    }
}
