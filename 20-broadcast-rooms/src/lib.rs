//! Broadcast rooms served over a small websocket event protocol.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`room`] holds the room actor, its users and the manager that hands
//!   rooms out by id.
//! - [`socket`] speaks the JSON event protocol (connect, event, ack,
//!   disconnect) over any text-frame [`socket::Transport`].
//! - [`chat`] wires socket events to rooms: join, leave and message.
//! - [`server`] accepts websocket upgrades on `/ws` and runs one chat session
//!   per connection.
//! - [`cli`] parses the command-line flags.
//!
//! Integration tests drive rooms and sockets in-process and the server over a
//! real websocket.

pub mod chat;
pub mod cli;
pub mod room;
pub mod server;
pub mod socket;
