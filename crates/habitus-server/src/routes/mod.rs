pub mod habits;
pub mod users;
