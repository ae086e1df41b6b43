use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::{
    args::{Arg, Args, Callback},
    packet::Packet,
    transport::{BoxError, FrameSink, FrameStream},
};

pub(super) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub(super) type Handler = Arc<dyn Fn(Args) -> BoxFuture + Send + Sync>;
pub(super) type Hook = Box<dyn FnOnce() -> BoxFuture + Send>;

/// Requests from socket handles to the reader, which owns the tables.
pub(super) enum Control {
    Subscribe { event: String, handler: Handler },
    Pending { id: u64, callback: Callback },
    /// The event carrying this ack id never made it onto the wire.
    Forget { id: u64 },
    OnConnect(Hook),
    OnDisconnect(Hook),
    Connect { dispatched: oneshot::Sender<()> },
}

pub(super) enum Outbound {
    Frame {
        frame: String,
        written: Option<oneshot::Sender<Result<(), BoxError>>>,
    },
    Close,
}

/// Owns the read half, the subscriber table and the pending acknowledgements.
pub(super) struct Reader {
    pub(super) id: Arc<str>,
    pub(super) stream: FrameStream,
    pub(super) control: mpsc::UnboundedReceiver<Control>,
    pub(super) outbound: mpsc::UnboundedSender<Outbound>,
    pub(super) disconnected: watch::Sender<bool>,
    pub(super) subscribers: HashMap<String, Vec<Handler>>,
    pub(super) pending: HashMap<u64, Callback>,
    pub(super) on_connect: Option<Hook>,
    pub(super) on_disconnect: Option<Hook>,
}

impl Reader {
    pub(super) async fn run(mut self) {
        let reason = loop {
            // Drain control requests first so an ack registered by `emit`
            // is in the table before its reply can be read.
            tokio::select! {
                biased;
                Some(control) = self.control.recv() => self.handle_control(control).await,
                frame = self.stream.next() => match frame {
                    Some(Ok(frame)) => match Packet::decode(&frame) {
                        Ok(packet) => self.dispatch(packet).await,
                        Err(error) if !error.is_fatal() => {
                            warn!(socket = %self.id, %error, "skipping packet");
                        }
                        Err(error) => {
                            break format!("socket client disconnected with error: {error}");
                        }
                    },
                    Some(Err(error)) => {
                        break format!("socket client disconnected with error: {error}");
                    }
                    None => break "socket client disconnected".to_string(),
                },
            }
        };
        self.disconnect(reason).await;
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Subscribe { event, handler } => {
                self.subscribers.entry(event).or_default().push(handler);
            }
            Control::Pending { id, callback } => {
                self.pending.insert(id, callback);
            }
            Control::Forget { id } => {
                self.pending.remove(&id);
            }
            Control::OnConnect(hook) => self.on_connect = Some(hook),
            Control::OnDisconnect(hook) => self.on_disconnect = Some(hook),
            Control::Connect { dispatched } => {
                self.emit_local("connect", Args::default()).await;
                if let Some(hook) = self.on_connect.take() {
                    tokio::spawn(hook());
                }
                let _ = dispatched.send(());
            }
        }
    }

    async fn dispatch(&mut self, packet: Packet) {
        match packet {
            Packet::Event {
                event,
                args,
                ack_id,
            } => {
                let mut args: Vec<Arg> = args.into_iter().map(Arg::Value).collect();
                if ack_id > 0 {
                    args.push(Arg::Callback(self.responder(ack_id)));
                }
                self.emit_local(&event, Args::from(args)).await;
            }
            Packet::Ack { id, args } => match self.pending.remove(&id) {
                Some(callback) => callback.call(args),
                None => debug!(socket = %self.id, ack = id, "dropping unmatched ack"),
            },
            Packet::Connect { .. } | Packet::Disconnect { .. } => {
                debug!(socket = %self.id, "ignoring server-bound lifecycle packet");
            }
        }
    }

    /// Runs the subscribers of `event` in registration order.
    async fn emit_local(&mut self, event: &str, args: Args) {
        let Some(handlers) = self.subscribers.get(event).cloned() else {
            debug!(socket = %self.id, event, "no subscribers");
            return;
        };
        for handler in &handlers {
            handler(args.clone()).await;
        }
    }

    /// Callback that answers the remote's event `id` with an ack packet.
    fn responder(&self, id: u64) -> Callback {
        let outbound = self.outbound.clone();
        let socket = Arc::clone(&self.id);
        Callback::new(move |args| match (Packet::Ack { id, args }).encode() {
            Ok(frame) => {
                if outbound
                    .send(Outbound::Frame {
                        frame,
                        written: None,
                    })
                    .is_err()
                {
                    debug!(socket = %socket, ack = id, "connection closed before ack");
                }
            }
            Err(error) => warn!(socket = %socket, ack = id, %error, "failed to encode ack"),
        })
    }

    async fn disconnect(mut self, reason: String) {
        debug!(socket = %self.id, %reason, "disconnecting");

        if let Some(hook) = self.on_disconnect.take() {
            tokio::spawn(hook());
        }

        match (Packet::Disconnect {
            reason: reason.clone(),
        })
        .encode()
        {
            Ok(frame) => {
                let (written, result) = oneshot::channel();
                let queued = self
                    .outbound
                    .send(Outbound::Frame {
                        frame,
                        written: Some(written),
                    })
                    .is_ok();
                if queued {
                    if let Ok(Err(error)) = result.await {
                        debug!(socket = %self.id, %error, "failed to send disconnect packet");
                    }
                }
            }
            Err(error) => warn!(socket = %self.id, %error, "failed to encode disconnect packet"),
        }

        self.emit_local("disconnect", Args::from(vec![Arg::from(reason)]))
            .await;

        if !self.pending.is_empty() {
            debug!(socket = %self.id, pending = self.pending.len(), "dropping unanswered acks");
            self.pending.clear();
        }
        let _ = self.outbound.send(Outbound::Close);
        self.disconnected.send_replace(true);
    }
}

/// Owns the write half; every frame of a connection goes through here.
pub(super) async fn write_frames(mut sink: FrameSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Frame { frame, written } => {
                let result = sink.send(frame).await;
                match written {
                    Some(written) => {
                        let _ = written.send(result);
                    }
                    None => {
                        if let Err(error) = result {
                            debug!(%error, "failed to write frame");
                        }
                    }
                }
            }
            Outbound::Close => {
                if let Err(error) = sink.close().await {
                    debug!(%error, "failed to close transport");
                }
                break;
            }
        }
    }
}
