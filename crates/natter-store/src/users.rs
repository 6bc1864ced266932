use rusqlite::{params, OptionalExtension};

use natter_shared::types::UserId;

use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{ProfileChanges, User};

const USER_COLUMNS: &str = "id, email, full_name, bio, profile_pic, password_hash, created_at";

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let res = self.conn().execute(
            "INSERT INTO users (id, email, full_name, bio, profile_pic, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.to_string(),
                user.email.trim(),
                user.full_name,
                user.bio,
                user.profile_pic,
                user.password_hash,
                encode_ts(&user.created_at),
            ],
        );

        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(format!("email {}", user.email.trim())))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Case-insensitive lookup used by login and signup.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Every account except `viewer`, ordered by name (sidebar listing).
    pub fn list_users_except(&self, viewer: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY full_name COLLATE NOCASE, id"
        ))?;

        let rows = stmt.query_map(params![viewer.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn update_profile(&self, id: UserId, changes: &ProfileChanges) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET
                full_name   = COALESCE(?2, full_name),
                bio         = COALESCE(?3, bio),
                profile_pic = COALESCE(?4, profile_pic)
             WHERE id = ?1",
            params![
                id.to_string(),
                changes.full_name,
                changes.bio,
                changes.profile_pic,
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(6)?;

    Ok(User {
        id: UserId(decode_uuid(0, &id_str)?),
        email: row.get(1)?,
        full_name: row.get(2)?,
        bio: row.get(3)?,
        profile_pic: row.get(4)?,
        password_hash: row.get(5)?,
        created_at: decode_ts(6, &ts_str)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::now_micros;

    pub(crate) fn sample_user(db: &Database, name: &str) -> User {
        let user = User {
            id: UserId::new(),
            email: format!("{}@example.com", name.to_lowercase()),
            full_name: name.to_string(),
            bio: format!("{name}'s bio"),
            profile_pic: None,
            password_hash: "$argon2id$placeholder".to_string(),
            created_at: now_micros(),
        };
        db.insert_user(&user).unwrap();
        user
    }

    #[test]
    fn insert_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user(&db, "Alice");

        assert_eq!(db.get_user(alice.id).unwrap(), alice);
        let by_email = db.find_user_by_email("ALICE@example.com").unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(alice.id));
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user(&db, "Alice");

        let mut twin = alice.clone();
        twin.id = UserId::new();
        assert!(matches!(db.insert_user(&twin), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn list_excludes_viewer() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user(&db, "Alice");
        let bob = sample_user(&db, "Bob");
        let carol = sample_user(&db, "Carol");

        let ids: Vec<UserId> = db
            .list_users_except(alice.id)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec![bob.id, carol.id]);
    }

    #[test]
    fn update_keeps_untouched_fields() {
        let db = Database::open_in_memory().unwrap();
        let alice = sample_user(&db, "Alice");

        let updated = db
            .update_profile(
                alice.id,
                &ProfileChanges {
                    bio: Some("new bio".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.bio, "new bio");
        assert_eq!(updated.full_name, alice.full_name);
    }

    #[test]
    fn missing_user_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
        assert!(matches!(
            db.update_profile(UserId::new(), &ProfileChanges::default()),
            Err(StoreError::NotFound)
        ));
    }
}
