//! Demo account created at start-up.

use secrecy::SecretString;
use thiserror::Error;

use devcollab_core::password::{self, PasswordError};
use devcollab_store::boards::BoardRepo;
use devcollab_store::users::UserRepo;
use devcollab_store::{Database, StoreError};

pub const DEMO_EMAIL: &str = "test@example.com";
pub const DEMO_PASSWORD: &str = "password";
pub const DEMO_NAME: &str = "Test User";
pub const DEMO_BOARD_NAME: &str = "My First Board";

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot hash demo password: {0}")]
    Password(#[from] PasswordError),
}

/// Ensure the demo user exists and owns at least one board. Safe to run on
/// every start.
pub fn seed_demo_data(db: &Database) -> Result<(), SeedError> {
    let users = UserRepo::new(db.clone());
    let user = match users.find_by_email(DEMO_EMAIL)? {
        Some(user) => user,
        None => {
            let hash = password::hash_password(&SecretString::from(DEMO_PASSWORD.to_string()))?;
            let user = users.create(DEMO_EMAIL, DEMO_NAME, &hash)?;
            tracing::info!(user_id = %user.id, "Seeded demo user");
            user
        }
    };

    let boards = BoardRepo::new(db.clone());
    if boards.list_by_owner(&user.id)?.is_empty() {
        let board = boards.create(DEMO_BOARD_NAME, None, None, Some(&user.id))?;
        tracing::info!(board_id = %board.id, "Created default board for demo user");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcollab_store::schema;

    #[test]
    fn seeding_is_idempotent() {
        let db = Database::in_memory(schema::BOARD).unwrap();
        seed_demo_data(&db).unwrap();
        seed_demo_data(&db).unwrap();

        let user = UserRepo::new(db.clone()).find_by_email(DEMO_EMAIL).unwrap().unwrap();
        assert!(password::verify_password(
            &SecretString::from(DEMO_PASSWORD.to_string()),
            &user.password_hash
        ));
        let boards = BoardRepo::new(db).list_by_owner(&user.id).unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].name, DEMO_BOARD_NAME);
    }

    #[test]
    fn existing_user_gets_a_board() {
        let db = Database::in_memory(schema::BOARD).unwrap();
        let user = UserRepo::new(db.clone()).create(DEMO_EMAIL, "Someone", "x").unwrap();
        seed_demo_data(&db).unwrap();
        assert_eq!(BoardRepo::new(db).list_by_owner(&user.id).unwrap().len(), 1);
    }
}
