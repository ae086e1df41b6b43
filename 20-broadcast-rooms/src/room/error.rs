use thiserror::Error;

/// Failures returned by [`Room`](super::Room), [`User`](super::User) and
/// [`Manager`](super::Manager) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("room: room is closed")]
    RoomClosed,
    #[error("room: timeout waiting for the users to close")]
    RoomCloseTimeout,
    #[error("room: user cannot be nil")]
    RoomUserNil,
    #[error("room-user: user is closed")]
    UserClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
