use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Context;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::{
    args::{Arg, Args},
    packet::Packet,
    reader::{write_frames, BoxFuture, Control, Handler, Hook, Outbound, Reader},
    transport::{BoxError, Transport},
};

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket: connection is closed")]
    Closed,
    #[error("socket: writing packet: {0}")]
    Write(#[source] BoxError),
    #[error("socket: encoding packet: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Handle to one protocol connection.
///
/// Cloning is cheap; all clones drive the same connection. The subscriber
/// table and pending acknowledgements live in the connection's reader task,
/// and every write goes through its writer task.
#[derive(Clone)]
pub struct Socket {
    id: Arc<str>,
    control: mpsc::UnboundedSender<Control>,
    outbound: mpsc::UnboundedSender<Outbound>,
    next_ack: Arc<AtomicU64>,
    disconnected: watch::Receiver<bool>,
}

impl Socket {
    /// Wraps `transport` and starts reading from it immediately.
    pub fn new(transport: Transport, id: impl Into<String>) -> Self {
        let id: Arc<str> = Arc::from(id.into());
        let (control, control_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (disconnected_tx, disconnected) = watch::channel(false);

        tokio::spawn(write_frames(transport.sink, outbound_rx));
        tokio::spawn(
            Reader {
                id: Arc::clone(&id),
                stream: transport.stream,
                control: control_rx,
                outbound: outbound.clone(),
                disconnected: disconnected_tx,
                subscribers: HashMap::new(),
                pending: HashMap::new(),
                on_connect: None,
                on_disconnect: None,
            }
            .run(),
        );

        Self {
            id,
            control,
            outbound,
            next_ack: Arc::new(AtomicU64::new(1)),
            disconnected,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribes `handler` to `event`. Handlers run one at a time, in
    /// subscription order, on the connection's reader task.
    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| -> BoxFuture { Box::pin(handler(args)) });
        self.control_or_log(Control::Subscribe {
            event: event.into(),
            handler,
        });
    }

    /// Runs `hook` on its own task once the connect handshake completed.
    pub fn on_connect<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Box::new(move || -> BoxFuture { Box::pin(hook()) });
        self.control_or_log(Control::OnConnect(hook));
    }

    /// Runs `hook` on its own task when the connection goes away.
    pub fn on_disconnect<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Box::new(move || -> BoxFuture { Box::pin(hook()) });
        self.control_or_log(Control::OnDisconnect(hook));
    }

    /// Sends `event` to the remote.
    ///
    /// A trailing [`Arg::Callback`] is not sent; it is kept under a fresh
    /// acknowledgement id and invoked with the remote's reply. Callbacks in
    /// any other position are dropped.
    pub async fn emit(&self, event: &str, mut args: Vec<Arg>) -> Result<(), SocketError> {
        let ack_id = match args.pop() {
            Some(Arg::Callback(callback)) => {
                let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
                self.control
                    .send(Control::Pending { id, callback })
                    .map_err(|_| SocketError::Closed)?;
                id
            }
            Some(last) => {
                args.push(last);
                0
            }
            None => 0,
        };

        let args = args.into_iter().filter_map(Arg::into_value).collect();
        let written = self
            .write(&Packet::Event {
                event: event.to_string(),
                args,
                ack_id,
            })
            .await;
        if written.is_err() && ack_id > 0 {
            let _ = self.control.send(Control::Forget { id: ack_id });
        }
        written
    }

    /// Performs the connect handshake, then waits until the connection is
    /// gone.
    pub async fn connect(&self) -> Result<(), SocketError> {
        self.write(&Packet::Connect {
            id: self.id.to_string(),
        })
        .await?;

        let (dispatched, done) = oneshot::channel();
        if self.control.send(Control::Connect { dispatched }).is_ok() {
            let _ = done.await;
        }

        self.disconnected().await;
        Ok(())
    }

    /// Closes the transport from this side. The reader runs the disconnect
    /// sequence once the remote end hangs up in turn.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Resolves once the disconnect sequence finished.
    pub async fn disconnected(&self) {
        let mut disconnected = self.disconnected.clone();
        let _ = disconnected.wait_for(|done| *done).await;
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    async fn write(&self, packet: &Packet) -> Result<(), SocketError> {
        let frame = packet.encode()?;
        let (written, result) = oneshot::channel();
        self.outbound
            .send(Outbound::Frame {
                frame,
                written: Some(written),
            })
            .map_err(|_| SocketError::Closed)?;
        result
            .await
            .map_err(|_| SocketError::Closed)?
            .map_err(SocketError::Write)
    }

    fn control_or_log(&self, control: Control) {
        if self.control.send(control).is_err() {
            debug!(socket = %self.id, "reader already stopped");
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Builds a [`Socket`] over `transport`, lets `setup` subscribe to it, then
/// runs the connect handshake and waits for the connection to end.
pub async fn serve<F>(transport: Transport, id: impl Into<String>, setup: F) -> anyhow::Result<()>
where
    F: FnOnce(&Socket) -> anyhow::Result<()>,
{
    let socket = Socket::new(transport, id);
    if let Err(error) = setup(&socket) {
        socket.close();
        return Err(error.context("socket: handling socket"));
    }
    socket
        .connect()
        .await
        .context("socket: sending connect packet")
}
