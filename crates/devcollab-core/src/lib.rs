pub mod errors;
pub mod events;
pub mod habits;
pub mod ids;
pub mod palette;
pub mod password;
pub mod pomodoro;
pub mod status;
pub mod timer;
