//! Habit tracking service with bearer-token authentication.

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;
pub mod token;

pub use server::{start, HabitusConfig, HabitusHandle};
