//! User Storage
//! Mission: Securely store and manage user accounts with SQLite

use crate::auth::models::User;
use crate::storage::{uuid_column, Database};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Why a registration was refused
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistrationConflict {
    #[error("Username already registered")]
    Username,
    #[error("Email already registered")]
    Email,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_column(row, 0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// User storage over the shared database
pub struct UserStore {
    db: Arc<Database>,
    bcrypt_cost: u32,
}

impl UserStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_cost(db, DEFAULT_COST)
    }

    /// Custom bcrypt work factor (tests use the minimum)
    pub fn with_cost(db: Arc<Database>, bcrypt_cost: u32) -> Self {
        Self { db, bcrypt_cost }
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?1",
        )?;
        Ok(stmt.query_row(params![username], user_from_row).optional()?)
    }

    pub fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![id.to_string()], user_from_row).optional()?)
    }

    /// Verify credentials, returning the user on success
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        match self.get_user_by_username(username)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid.then_some(user))
            }
            None => Ok(None),
        }
    }

    /// Which unique field an account would collide on, if any
    pub fn find_conflict(&self, username: &str, email: &str) -> Result<Option<RegistrationConflict>> {
        let conn = self.db.conn();
        let (by_name, by_email): (i64, i64) = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM users WHERE username = ?1),
                (SELECT COUNT(*) FROM users WHERE email = ?2)",
            params![username, email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(if by_name > 0 {
            Some(RegistrationConflict::Username)
        } else if by_email > 0 {
            Some(RegistrationConflict::Email)
        } else {
            None
        })
    }

    pub fn create_user(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let password_hash = hash(password, self.bcrypt_cost).context("Failed to hash password")?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            created_at: Utc::now(),
        };

        self.db
            .conn()
            .execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    user.password_hash,
                    user.created_at,
                ],
            )
            .context("Failed to insert user")?;

        info!("✅ Created user: {}", user.username);

        Ok(user)
    }
}
