//! User repository

use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Provider tag for locally-registered users
pub const LOCAL_PROVIDER: &str = "local";

/// How a user authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Registered directly with email + password; the hash is bcrypt
    Local { password_hash: String },
    /// Authenticated through an external identity provider (e.g. "google")
    External { provider: String },
}

/// A user
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub identity: Identity,
}

impl User {
    /// Create a new local user with a freshly generated time-sortable id.
    /// The password is expected to already be hashed.
    #[must_use]
    pub fn new_local(email: &str, first_name: &str, last_name: &str, password_hash: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            email: email.to_lowercase(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            identity: Identity::Local {
                password_hash: password_hash.to_string(),
            },
        }
    }

    /// Create a new externally-authenticated user. No password is stored.
    #[must_use]
    pub fn new_external(provider: &str, email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            email: email.to_lowercase(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            identity: Identity::External {
                provider: provider.to_string(),
            },
        }
    }

    /// Provider tag as stored in the database
    #[must_use]
    pub fn provider(&self) -> &str {
        match &self.identity {
            Identity::Local { .. } => LOCAL_PROVIDER,
            Identity::External { provider } => provider,
        }
    }
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

impl UserRepo {
    /// Create a new user repository
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new user
    ///
    /// # Errors
    ///
    /// Returns `UserAlreadyExists` when (email, provider) is taken
    pub fn save(&self, user: &User) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let password_hash = match &user.identity {
            Identity::Local { password_hash } => Some(password_hash.as_str()),
            Identity::External { .. } => None,
        };

        conn.execute(
            "INSERT INTO users (id, email, first_name, last_name, password_hash, provider)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                user.id,
                user.email,
                user.first_name,
                user.last_name,
                password_hash,
                user.provider(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::UserAlreadyExists
            }
            e => Error::Sqlite(e),
        })?;

        Ok(())
    }

    /// Find a user by id
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists
    pub fn find(&self, id: &str) -> Result<User> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.query_row(
            "SELECT id, email, first_name, last_name, password_hash, provider
             FROM users WHERE id = ?1",
            [id],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::UserNotFound,
            e => Error::Sqlite(e),
        })
    }

    /// Find a user by (lowercased) email
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists
    pub fn find_by_email(&self, email: &str) -> Result<User> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.query_row(
            "SELECT id, email, first_name, last_name, password_hash, provider
             FROM users WHERE email = ?1",
            [email.to_lowercase()],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::UserNotFound,
            e => Error::Sqlite(e),
        })
    }
}

/// Construct the identity variant from the stored provider column
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let password_hash: Option<String> = row.get(4)?;
    let provider: String = row.get(5)?;

    let identity = if provider == LOCAL_PROVIDER {
        Identity::Local {
            password_hash: password_hash.unwrap_or_default(),
        }
    } else {
        Identity::External { provider }
    };

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        identity,
    })
}
