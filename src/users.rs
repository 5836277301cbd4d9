//! User registry: roles and MBA assignments.
//!
//! Only role lookup lives here; there is no authentication.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension as _, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AirError, Result};
use crate::records::FieldMap;

pub const DEFAULT_ADMIN: &str = "admin";
pub const ADMIN_ROLE: &str = "Administrator";

const SCHEMA: &str = r#"
    PRAGMA foreign_keys=ON;

    CREATE TABLE IF NOT EXISTS users(
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      username TEXT NOT NULL UNIQUE,
      firstname TEXT, lastname TEXT, email TEXT,
      role TEXT NOT NULL,
      phone TEXT, description TEXT
    );

    CREATE TABLE IF NOT EXISTS user_mbas(
      user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
      mba_code TEXT NOT NULL CHECK (length(trim(mba_code)) > 0)
    );
"#;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub phone: String,
    pub description: String,
}

impl NewUser {
    /// Keys: `username`, `role` (required); `firstname`, `lastname`,
    /// `email`, `phone`, `description` (optional).
    pub fn from_fields(map: &FieldMap) -> Result<Self> {
        let get = |k: &str| map.get(k).map(|v| v.trim().to_string()).unwrap_or_default();
        let user = Self {
            username: get("username"),
            first_name: get("firstname"),
            last_name: get("lastname"),
            email: get("email"),
            role: get("role"),
            phone: get("phone"),
            description: get("description"),
        };
        for (k, v) in [("username", &user.username), ("role", &user.role)] {
            if v.is_empty() {
                return Err(AirError::Validation(format!("missing required field '{k}'")));
            }
        }
        Ok(user)
    }
}

/// Result of a role lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: i64,
    pub username: String,
    pub role: String,
    pub mbas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
}

pub struct UserDirectory {
    conn: Connection,
    path: PathBuf,
}

impl UserDirectory {
    /// Open (or create) the users database; seeds the default administrator
    /// on first open.
    pub fn open(path: &Path) -> Result<Self> {
        crate::util::validate_path(path, "users db")?;
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        let dir = Self {
            conn,
            path: path.to_path_buf(),
        };
        dir.ensure_default_admin()?;
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_default_admin(&self) -> Result<()> {
        let exists = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![DEFAULT_ADMIN],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !exists {
            self.conn.execute(
                "INSERT INTO users(username, firstname, lastname, role) VALUES (?1, 'System', 'Admin', ?2)",
                params![DEFAULT_ADMIN, ADMIN_ROLE],
            )?;
            info!("default administrator created");
        }
        Ok(())
    }

    /// Insert a user and their MBA links in one transaction.
    pub fn create_user(&mut self, user: &NewUser, mbas: &[String]) -> Result<i64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO users(username, firstname, lastname, email, role, phone, description) \
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                user.username,
                user.first_name,
                user.last_name,
                user.email,
                user.role,
                user.phone,
                user.description,
            ],
        )
        .map_err(|e| AirError::from_write(e, &format!("insert user {}", user.username)))?;
        let user_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare("INSERT INTO user_mbas(user_id, mba_code) VALUES (?1, ?2)")?;
            for mba in mbas {
                stmt.execute(params![user_id, mba])
                    .map_err(|e| AirError::from_write(e, &format!("link MBA '{mba}'")))?;
            }
        }

        tx.commit()?;
        info!(username = %user.username, user_id, mbas = mbas.len(), "user created");
        Ok(user_id)
    }

    /// Role and assigned MBAs for `username`, if the user exists.
    pub fn role_of(&self, username: &str) -> Result<Option<UserRole>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, role FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((user_id, role)) = found else {
            debug!(username, "role lookup: unknown user");
            return Ok(None);
        };
        Ok(Some(UserRole {
            user_id,
            username: username.to_string(),
            role,
            mbas: self.mbas_of(user_id)?,
        }))
    }

    pub fn mbas_of(&self, user_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mba_code FROM user_mbas WHERE user_id = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_users(&self) -> Result<Vec<UserSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, firstname, lastname, email, role FROM users ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                username: row.get(1)?,
                first_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                last_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                email: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                role: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a user together with their MBA links.
    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        let n = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        if n == 0 {
            return Err(AirError::NotFound(format!("user {user_id}")));
        }
        info!(user_id, "user deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::field_map;
    use tempfile::tempdir;

    fn operator(name: &str) -> NewUser {
        NewUser::from_fields(&field_map([("username", name), ("role", "Operator")])).unwrap()
    }

    #[test]
    fn default_admin_exists_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.db");
        let users = UserDirectory::open(&path).unwrap();
        let admin = users.role_of(DEFAULT_ADMIN).unwrap().unwrap();
        assert_eq!(admin.role, ADMIN_ROLE);
        drop(users);

        let users = UserDirectory::open(&path).unwrap();
        assert_eq!(users.list_users().unwrap().len(), 1);
    }

    #[test]
    fn role_lookup_includes_mbas() {
        let dir = tempdir().unwrap();
        let mut users = UserDirectory::open(&dir.path().join("users.db")).unwrap();
        users
            .create_user(&operator("jdoe"), &["MBA-A".into(), "MBA-B".into()])
            .unwrap();
        let role = users.role_of("jdoe").unwrap().unwrap();
        assert_eq!(role.role, "Operator");
        assert_eq!(role.mbas, vec!["MBA-A".to_string(), "MBA-B".to_string()]);
        assert!(users.role_of("nobody").unwrap().is_none());
    }

    #[test]
    fn failed_link_rolls_back_user() {
        let dir = tempdir().unwrap();
        let mut users = UserDirectory::open(&dir.path().join("users.db")).unwrap();
        let err = users
            .create_user(&operator("jdoe"), &["MBA-A".into(), "  ".into()])
            .unwrap_err();
        assert!(matches!(err, AirError::WriteFailed(_)));
        assert!(users.role_of("jdoe").unwrap().is_none());
        assert_eq!(users.list_users().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_username_rejected() {
        let dir = tempdir().unwrap();
        let mut users = UserDirectory::open(&dir.path().join("users.db")).unwrap();
        users.create_user(&operator("jdoe"), &[]).unwrap();
        assert!(matches!(
            users.create_user(&operator("jdoe"), &[]),
            Err(AirError::WriteFailed(_))
        ));
    }

    #[test]
    fn delete_removes_links() {
        let dir = tempdir().unwrap();
        let mut users = UserDirectory::open(&dir.path().join("users.db")).unwrap();
        let id = users.create_user(&operator("jdoe"), &["MBA-A".into()]).unwrap();
        users.delete_user(id).unwrap();
        assert!(users.mbas_of(id).unwrap().is_empty());
        assert!(matches!(users.delete_user(id), Err(AirError::NotFound(_))));
    }

    #[test]
    fn missing_role_is_validation_error() {
        let err = NewUser::from_fields(&field_map([("username", "x")])).unwrap_err();
        assert!(matches!(err, AirError::Validation(_)));
    }
}
