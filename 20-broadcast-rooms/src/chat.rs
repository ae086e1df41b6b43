//! Chat rooms on top of the socket protocol.
//!
//! A connection joins at most one room at a time. Events:
//!
//! - `join [room]`: leave the current room, then join `room`.
//! - `leave []`: leave the current room.
//! - `message [text]`: send `text` to everyone else in the current room.
//!
//! Every event is answered through its acknowledgement with `["ok"]` or
//! `["error", reason]`. Room members receive `message [text]` events.

use std::{future::Future, sync::Arc};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    room::{Error as RoomError, Manager, Room, User},
    socket::{Arg, Args, Socket},
};

pub type ChatManager = Manager<String>;

struct Membership {
    room: Arc<Room<String>>,
    user: Arc<User<String>>,
}

struct Session {
    socket: Socket,
    manager: Arc<ChatManager>,
    membership: Mutex<Option<Membership>>,
}

/// Subscribes the chat events on `socket`.
pub fn attach(socket: &Socket, manager: Arc<ChatManager>) {
    let session = Arc::new(Session {
        socket: socket.clone(),
        manager,
        membership: Mutex::new(None),
    });

    subscribe(socket, "join", &session, |session, args| async move {
        session.join(args).await;
    });
    subscribe(socket, "leave", &session, |session, args| async move {
        session.leave().await;
        args.ack(ok_reply());
    });
    subscribe(socket, "message", &session, |session, args| async move {
        session.message(args).await;
    });

    socket.on_disconnect(move || async move {
        session.leave().await;
    });
}

fn subscribe<F, Fut>(socket: &Socket, event: &str, session: &Arc<Session>, handler: F)
where
    F: Fn(Arc<Session>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let session = Arc::clone(session);
    socket.on(event, move |args| handler(Arc::clone(&session), args));
}

impl Session {
    async fn join(&self, args: Args) {
        let Some(name) = args.str(0).map(str::to_owned) else {
            args.ack(error_reply("join expects a room name"));
            return;
        };

        self.leave().await;
        match self.enter(&name).await {
            Ok(()) => args.ack(ok_reply()),
            Err(error) => args.ack(error_reply(&error.to_string())),
        }
    }

    async fn enter(&self, name: &str) -> Result<(), RoomError> {
        let user = Arc::new(User::new(self.socket.id()));

        let mut room = self.manager.load(name, None).await;
        let mut registered = room.register(Arc::clone(&user)).await;
        if registered == Err(RoomError::RoomClosed) {
            // Reaped between load and register.
            room = self.manager.load(name, None).await;
            registered = room.register(Arc::clone(&user)).await;
        }
        registered?;

        self.forward_messages(&user);
        info!(room = %room.id(), user = %user.id(), "joined room");
        *self.membership.lock().await = Some(Membership { room, user });
        Ok(())
    }

    /// Leaves the current room, if any.
    async fn leave(&self) {
        let Some(Membership { room, user }) = self.membership.lock().await.take() else {
            return;
        };
        if let Err(error) = room.unregister(Arc::clone(&user)).await {
            debug!(room = %room.id(), user = %user.id(), %error, "unregister failed");
        }
        let _ = user.close();
        info!(room = %room.id(), user = %user.id(), "left room");
    }

    async fn message(&self, args: Args) {
        let Some(text) = args.str(0).map(str::to_owned) else {
            args.ack(error_reply("message expects text"));
            return;
        };

        let current = self
            .membership
            .lock()
            .await
            .as_ref()
            .map(|membership| (Arc::clone(&membership.room), Arc::clone(&membership.user)));
        let Some((room, user)) = current else {
            args.ack(error_reply("not in a room"));
            return;
        };

        match room.send(Some(&user), text).await {
            Ok(()) => args.ack(ok_reply()),
            Err(error) => args.ack(error_reply(&error.to_string())),
        }
    }

    /// Pumps the user's room messages out to the socket until the user is
    /// closed or the connection is gone.
    fn forward_messages(&self, user: &User<String>) {
        let mut messages = Box::pin(user.messages());
        let socket = self.socket.clone();
        tokio::spawn(async move {
            while let Some(text) = messages.next().await {
                if let Err(error) = socket.emit("message", vec![Arg::from(text)]).await {
                    debug!(socket = %socket.id(), %error, "stopped forwarding room messages");
                    break;
                }
            }
        });
    }
}

fn ok_reply() -> Vec<Value> {
    vec![json!("ok")]
}

fn error_reply(reason: &str) -> Vec<Value> {
    vec![json!("error"), json!(reason)]
}
