//! User Storage
//! Mission: Store user accounts and verify credentials with SQLite + bcrypt

use crate::auth::errors::CredentialError;
use crate::auth::models::User;
use async_trait::async_trait;
use bcrypt::{hash, verify};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Durable mapping from account identity to credential hash and profile.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, CredentialError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialError>;

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
    ) -> Result<User, CredentialError>;

    /// Returns the user only when the password matches.
    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, CredentialError>;

    /// Look up an externally authenticated account, creating it on first login.
    async fn find_or_create_external(
        &self,
        external_id: &str,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<User, CredentialError>;
}

/// User storage with SQLite backend
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
    bcrypt_cost: u32,
}

impl UserStore {
    /// Open (or create) the database at `db_path`. `":memory:"` is accepted.
    pub fn new(db_path: &str, bcrypt_cost: u32) -> Result<Self, CredentialError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            bcrypt_cost,
        };
        store.init_db()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<(), CredentialError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                name TEXT,
                password_hash TEXT,
                external_id TEXT UNIQUE,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn query_one(&self, sql: &str, arg: &str) -> Result<Option<User>, CredentialError> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(sql, params![arg], user_from_row)
            .optional()?;
        Ok(user)
    }

    fn insert(&self, user: &User) -> Result<(), CredentialError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, email, name, password_hash, external_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.email,
                user.name,
                user.password_hash,
                user.external_id,
                user.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(CredentialError::EmailAlreadyExists {
                    email: user.email.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for UserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, CredentialError> {
        self.query_one(&select_where("id"), &id.to_string())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialError> {
        self.query_one(&select_where("email"), &normalize_email(email))
    }

    async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
    ) -> Result<User, CredentialError> {
        let email = validate_email(email)?;

        let cost = self.bcrypt_cost;
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| CredentialError::Hashing(e.to_string()))??;

        let user = User {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash: Some(password_hash),
            external_id: None,
            created_at: Utc::now().to_rfc3339(),
        };
        self.insert(&user)?;

        info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, CredentialError> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };
        let Some(stored_hash) = user.password_hash.clone() else {
            // External accounts have no password
            return Ok(None);
        };

        let password = password.to_string();
        let valid = tokio::task::spawn_blocking(move || verify(password, &stored_hash))
            .await
            .map_err(|e| CredentialError::Hashing(e.to_string()))??;

        Ok(valid.then_some(user))
    }

    async fn find_or_create_external(
        &self,
        external_id: &str,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<User, CredentialError> {
        if let Some(user) = self.query_one(&select_where("external_id"), external_id)? {
            return Ok(user);
        }

        let email = match email {
            Some(email) => validate_email(&email)?,
            None => format!("meta-{}@external.invalid", external_id.to_lowercase()),
        };

        let user = User {
            // Stable id per external account
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("meta:{}", external_id).as_bytes()),
            email,
            name,
            password_hash: None,
            external_id: Some(external_id.to_string()),
            created_at: Utc::now().to_rfc3339(),
        };

        match self.insert(&user) {
            Ok(()) => {
                debug!(user_id = %user.id, "Created external user");
                Ok(user)
            }
            Err(CredentialError::EmailAlreadyExists { email }) => {
                // A concurrent first login may have created the account
                match self.query_one(&select_where("external_id"), external_id)? {
                    Some(existing) => Ok(existing),
                    None => Err(CredentialError::EmailAlreadyExists { email }),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn select_where(column: &str) -> String {
    format!(
        "SELECT id, email, name, password_hash, external_id, created_at FROM users WHERE {} = ?1",
        column
    )
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(User {
        id,
        email: row.get(1)?,
        name: row.get(2)?,
        password_hash: row.get(3)?,
        external_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<String, CredentialError> {
    let email = normalize_email(email);
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(CredentialError::InvalidEmail { email })
    }
}
