//! Actor-style broadcast rooms.
//!
//! - [`User`] is a per-connection message sink with rendezvous delivery.
//! - [`Room`] serializes membership changes and fan-out through one worker
//!   task; callers talk to it with request/response commands.
//! - [`Manager`] hands out one [`Room`] per id and closes them all on
//!   shutdown.

mod ack;
mod config;
mod error;
mod manager;
mod room;
mod user;

pub use config::RoomConfig;
pub use error::{Error, Result};
pub use manager::Manager;
pub use room::Room;
pub use user::User;
