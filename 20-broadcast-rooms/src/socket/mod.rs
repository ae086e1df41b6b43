//! Event protocol over one persistent connection.
//!
//! Every frame is a JSON [`Packet`]. Peers exchange named events with
//! positional arguments; an event may ask for an acknowledgement, which the
//! receiver answers with an `ack` packet carrying the same id. [`Socket`]
//! hides that correlation behind trailing [`Callback`] arguments.
//!
//! Each socket runs two tasks: a reader that owns the subscriber and
//! pending-ack tables and dispatches inbound packets, and a writer that owns
//! the write half of the [`Transport`].

mod args;
mod handle;
mod packet;
mod reader;
mod transport;

pub use args::{Arg, Args, Callback};
pub use handle::{serve, Socket, SocketError};
pub use packet::{DecodeError, Packet};
pub use transport::{BoxError, Peer, Transport};
