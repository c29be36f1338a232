pub mod boards;
pub mod database;
pub mod error;
pub mod habits;
pub mod pomodoro_logs;
pub mod projects;
pub mod row_helpers;
pub mod schema;
pub mod subtasks;
pub mod tasks;
pub mod time_entries;
pub mod users;

pub use database::Database;
pub use error::StoreError;
