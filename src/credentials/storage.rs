//! SQLite-backed token storage.
//!
//! Stores one [`CredentialSet`] per account id. Token columns are optionally
//! sealed with AES-256-GCM when the store is opened with an encryption key.

use super::{encryption, CredentialSet, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Token storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE tokens (
///     account_id TEXT PRIMARY KEY,
///     id_token TEXT NOT NULL,
///     access_token TEXT,
///     system_token TEXT NOT NULL,
///     refresh_token TEXT,
///     auth_nonce TEXT,
///     id_token_expiry TEXT NOT NULL,      -- RFC 3339
///     system_token_expiry TEXT NOT NULL,  -- RFC 3339
///     refresh_token_expiry TEXT,          -- RFC 3339
///     last_updated TEXT NOT NULL          -- RFC 3339
/// );
/// ```
///
/// Writes are `INSERT ... ON CONFLICT(account_id) DO UPDATE`, so a row is
/// always replaced as a whole and never duplicated.
pub struct TokenStore {
    conn: Mutex<Connection>,
    encryption_key: Option<Vec<u8>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT account_id, id_token, access_token, system_token, refresh_token,
           auth_nonce, id_token_expiry, system_token_expiry,
           refresh_token_expiry, last_updated
    FROM tokens
"#;

impl TokenStore {
    /// Creates or opens a token store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for tests)
    /// * `encryption_key` - Optional base64-encoded 32-byte key; when given,
    ///   token columns are encrypted at rest
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: Option<&str>) -> Result<Self, StoreError> {
        let encryption_key = encryption_key.map(encryption::validate_key).transpose()?;

        let conn = Connection::open(db_path.as_ref()).map_err(|source| StoreError::Database {
            context: "failed to open token database",
            source,
        })?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                account_id TEXT PRIMARY KEY,
                id_token TEXT NOT NULL,
                access_token TEXT,
                system_token TEXT NOT NULL,
                refresh_token TEXT,
                auth_nonce TEXT,
                id_token_expiry TEXT NOT NULL,
                system_token_expiry TEXT NOT NULL,
                refresh_token_expiry TEXT,
                last_updated TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|source| StoreError::Database {
            context: "failed to create tokens table",
            source,
        })?;

        info!(
            path = %db_path.as_ref().display(),
            encrypted = encryption_key.is_some(),
            "Token store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key,
        })
    }

    /// Stores a credential set, replacing any existing row for its account.
    pub fn put(&self, set: &CredentialSet) -> Result<(), StoreError> {
        let id_token = self.seal(&set.id_token)?;
        let access_token = set.access_token.as_deref().map(|t| self.seal(t)).transpose()?;
        let system_token = self.seal(&set.system_token)?;
        let refresh_token = set.refresh_token.as_deref().map(|t| self.seal(t)).transpose()?;

        self.lock()?
            .execute(
                r#"
                INSERT INTO tokens (
                    account_id, id_token, access_token, system_token, refresh_token,
                    auth_nonce, id_token_expiry, system_token_expiry,
                    refresh_token_expiry, last_updated
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(account_id) DO UPDATE SET
                    id_token = excluded.id_token,
                    access_token = excluded.access_token,
                    system_token = excluded.system_token,
                    refresh_token = excluded.refresh_token,
                    auth_nonce = excluded.auth_nonce,
                    id_token_expiry = excluded.id_token_expiry,
                    system_token_expiry = excluded.system_token_expiry,
                    refresh_token_expiry = excluded.refresh_token_expiry,
                    last_updated = excluded.last_updated
                "#,
                params![
                    set.account_id,
                    id_token,
                    access_token,
                    system_token,
                    refresh_token,
                    set.nonce,
                    set.id_token_expiry.to_rfc3339(),
                    set.system_token_expiry.to_rfc3339(),
                    set.refresh_token_expiry.map(|dt| dt.to_rfc3339()),
                    set.last_updated.to_rfc3339(),
                ],
            )
            .map_err(|source| StoreError::Database {
                context: "failed to store tokens",
                source,
            })?;

        debug!(account_id = %set.account_id, "Stored tokens");
        Ok(())
    }

    /// Returns the stored set regardless of expiry.
    pub fn get(&self, account_id: &str) -> Result<Option<CredentialSet>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{} WHERE account_id = ?1", SELECT_COLUMNS),
                params![account_id],
                read_row,
            )
            .optional()
            .map_err(|source| StoreError::Database {
                context: "failed to read tokens",
                source,
            })?;
        drop(conn);

        row.map(|raw| self.decode(raw)).transpose()
    }

    /// Returns the whole set if its system token has not expired.
    pub fn get_if_system_token_valid(&self, account_id: &str) -> Result<Option<CredentialSet>, StoreError> {
        self.get_if_system_token_valid_at(account_id, Utc::now())
    }

    /// Returns the id token if it has not expired.
    pub fn get_if_id_token_valid(&self, account_id: &str) -> Result<Option<String>, StoreError> {
        self.get_if_id_token_valid_at(account_id, Utc::now())
    }

    /// Returns the refresh token if one is stored and has not expired.
    pub fn get_if_refresh_token_valid(&self, account_id: &str) -> Result<Option<String>, StoreError> {
        self.get_if_refresh_token_valid_at(account_id, Utc::now())
    }

    pub fn get_if_system_token_valid_at(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CredentialSet>, StoreError> {
        let set = self.get(account_id)?.filter(|set| set.system_token_valid_at(now));
        debug!(account_id = %account_id, found = set.is_some(), "Checked system token");
        Ok(set)
    }

    pub fn get_if_id_token_valid_at(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let token = self
            .get(account_id)?
            .filter(|set| set.id_token_valid_at(now))
            .map(|set| set.id_token);
        debug!(account_id = %account_id, found = token.is_some(), "Checked id token");
        Ok(token)
    }

    pub fn get_if_refresh_token_valid_at(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let token = self
            .get(account_id)?
            .filter(|set| set.refresh_token_valid_at(now))
            .and_then(|set| set.refresh_token);
        debug!(account_id = %account_id, found = token.is_some(), "Checked refresh token");
        Ok(token)
    }

    /// Lists every account with a stored row.
    pub fn account_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT account_id FROM tokens ORDER BY account_id")
            .map_err(|source| StoreError::Database {
                context: "failed to prepare query",
                source,
            })?;

        let ids = stmt
            .query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<Result<Vec<String>, _>>())
            .map_err(|source| StoreError::Database {
                context: "failed to list accounts",
                source,
            })?;

        Ok(ids)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn seal(&self, token: &str) -> Result<String, StoreError> {
        match &self.encryption_key {
            Some(key) => encryption::seal(token, key),
            None => Ok(token.to_string()),
        }
    }

    fn open(&self, value: &str) -> Result<String, StoreError> {
        encryption::open(value, self.encryption_key.as_deref())
    }

    fn decode(&self, raw: RawRow) -> Result<CredentialSet, StoreError> {
        Ok(CredentialSet {
            account_id: raw.account_id,
            id_token: self.open(&raw.id_token)?,
            access_token: raw.access_token.as_deref().map(|t| self.open(t)).transpose()?,
            system_token: self.open(&raw.system_token)?,
            refresh_token: raw.refresh_token.as_deref().map(|t| self.open(t)).transpose()?,
            nonce: raw.nonce,
            id_token_expiry: parse_timestamp("id_token_expiry", &raw.id_token_expiry)?,
            system_token_expiry: parse_timestamp("system_token_expiry", &raw.system_token_expiry)?,
            refresh_token_expiry: raw
                .refresh_token_expiry
                .as_deref()
                .map(|s| parse_timestamp("refresh_token_expiry", s))
                .transpose()?,
            last_updated: parse_timestamp("last_updated", &raw.last_updated)?,
        })
    }
}

/// Row as stored, before decryption and timestamp parsing.
struct RawRow {
    account_id: String,
    id_token: String,
    access_token: Option<String>,
    system_token: String,
    refresh_token: Option<String>,
    nonce: Option<String>,
    id_token_expiry: String,
    system_token_expiry: String,
    refresh_token_expiry: Option<String>,
    last_updated: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        account_id: row.get(0)?,
        id_token: row.get(1)?,
        access_token: row.get(2)?,
        system_token: row.get(3)?,
        refresh_token: row.get(4)?,
        nonce: row.get(5)?,
        id_token_expiry: row.get(6)?,
        system_token_expiry: row.get(7)?,
        refresh_token_expiry: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| StoreError::Timestamp { column, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{IssuedTokens, TokenTtls};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;

    fn create_test_store() -> TokenStore {
        TokenStore::new(":memory:", None).expect("Failed to create test store")
    }

    fn create_test_set(account_id: &str, system_token: &str, now: DateTime<Utc>) -> CredentialSet {
        CredentialSet::issue(
            account_id,
            IssuedTokens {
                id_token: "id-token-12345".to_string(),
                access_token: Some("access-token-12345".to_string()),
                system_token: system_token.to_string(),
                refresh_token: Some("refresh-token-67890".to_string()),
                nonce: Some("0f8fad5bd9cb469fa16570867728950e".to_string()),
            },
            &TokenTtls::default(),
            now,
        )
    }

    #[test]
    fn test_put_and_get() {
        let store = create_test_store();
        let set = create_test_set("system-1", "sys-1", Utc::now());

        store.put(&set).expect("Failed to store");

        let retrieved = store
            .get("system-1")
            .expect("Failed to get")
            .expect("Tokens not found");
        assert_eq!(retrieved.id_token, set.id_token);
        assert_eq!(retrieved.access_token, set.access_token);
        assert_eq!(retrieved.system_token, set.system_token);
        assert_eq!(retrieved.refresh_token, set.refresh_token);
        assert_eq!(retrieved.nonce, set.nonce);
        assert_eq!(retrieved.system_token_expiry, set.system_token_expiry);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get("system-1").unwrap().is_none());
        assert!(store.get_if_system_token_valid("system-1").unwrap().is_none());
        assert!(store.get_if_id_token_valid("system-1").unwrap().is_none());
        assert!(store.get_if_refresh_token_valid("system-1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_keeps_single_row() {
        let store = create_test_store();
        let now = Utc::now();

        store.put(&create_test_set("system-1", "sys-1", now)).unwrap();
        store.put(&create_test_set("system-1", "sys-2", now)).unwrap();

        assert_eq!(store.account_ids().unwrap(), vec!["system-1".to_string()]);
        let retrieved = store.get("system-1").unwrap().unwrap();
        assert_eq!(retrieved.system_token, "sys-2");
    }

    #[test]
    fn test_upsert_clears_optional_columns() {
        let store = create_test_store();
        let now = Utc::now();
        store.put(&create_test_set("system-1", "sys-1", now)).unwrap();

        let mut replacement = create_test_set("system-1", "sys-2", now);
        replacement.refresh_token = None;
        replacement.refresh_token_expiry = None;
        replacement.access_token = None;
        store.put(&replacement).unwrap();

        let retrieved = store.get("system-1").unwrap().unwrap();
        assert!(retrieved.refresh_token.is_none());
        assert!(retrieved.access_token.is_none());
        assert!(store.get_if_refresh_token_valid("system-1").unwrap().is_none());
    }

    #[test]
    fn test_system_token_expiry_boundary() {
        let store = create_test_store();
        let issued = Utc::now();
        store.put(&create_test_set("system-1", "sys-1", issued)).unwrap();

        let just_before = issued + Duration::minutes(4) + Duration::seconds(59);
        let just_after = issued + Duration::minutes(5) + Duration::seconds(1);

        assert!(store
            .get_if_system_token_valid_at("system-1", just_before)
            .unwrap()
            .is_some());
        assert!(store
            .get_if_system_token_valid_at("system-1", just_after)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tokens_expire_independently() {
        let store = create_test_store();
        let issued = Utc::now();
        let mut set = create_test_set("system-1", "sys-1", issued);
        set.id_token_expiry = issued - Duration::seconds(1);
        store.put(&set).unwrap();

        assert!(store.get_if_system_token_valid_at("system-1", issued).unwrap().is_some());
        assert!(store.get_if_id_token_valid_at("system-1", issued).unwrap().is_none());
        assert_eq!(
            store.get_if_refresh_token_valid_at("system-1", issued).unwrap().as_deref(),
            Some("refresh-token-67890")
        );

        let in_a_month = issued + Duration::days(30) + Duration::seconds(1);
        assert!(store
            .get_if_refresh_token_valid_at("system-1", in_a_month)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_accounts_are_isolated() {
        let store = create_test_store();
        let now = Utc::now();
        store.put(&create_test_set("system-1", "sys-1", now)).unwrap();
        store.put(&create_test_set("system-2", "sys-2", now)).unwrap();

        assert_eq!(store.account_ids().unwrap().len(), 2);
        assert_eq!(store.get("system-2").unwrap().unwrap().system_token, "sys-2");
    }

    #[test]
    fn test_encrypted_store_roundtrip() {
        let key = BASE64.encode([3u8; 32]);
        let store = TokenStore::new(":memory:", Some(key.as_str())).unwrap();
        let set = create_test_set("system-1", "sys-secret", Utc::now());
        store.put(&set).unwrap();

        let raw_system_token: String = store
            .lock()
            .unwrap()
            .query_row("SELECT system_token FROM tokens", [], |row| row.get(0))
            .unwrap();
        assert!(raw_system_token.starts_with("enc:v1:"));

        let retrieved = store.get("system-1").unwrap().unwrap();
        assert_eq!(retrieved.system_token, "sys-secret");
        assert_eq!(retrieved.refresh_token, set.refresh_token);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.db");
        let key = BASE64.encode([9u8; 32]);
        let set = create_test_set("system-1", "sys-1", Utc::now());

        {
            let store = TokenStore::new(&path, Some(key.as_str())).unwrap();
            store.put(&set).unwrap();
        }

        let reopened = TokenStore::new(&path, Some(key.as_str())).unwrap();
        assert_eq!(reopened.get("system-1").unwrap().unwrap().system_token, "sys-1");

        let without_key = TokenStore::new(&path, None).unwrap();
        assert!(matches!(without_key.get("system-1"), Err(StoreError::MissingKey)));
    }

    #[test]
    fn test_invalid_encryption_key() {
        assert!(matches!(
            TokenStore::new(":memory:", Some("short")),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_unreachable_database_fails() {
        let result = TokenStore::new("/nonexistent-dir/sub/token.db", None);
        assert!(matches!(result, Err(StoreError::Database { .. })));
    }
}
