use std::pin::Pin;

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    Sink, SinkExt, Stream, StreamExt, TryStreamExt,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type FrameSink = Pin<Box<dyn Sink<String, Error = BoxError> + Send>>;
pub(crate) type FrameStream = Pin<Box<dyn Stream<Item = Result<String, BoxError>> + Send>>;

/// A duplex connection carrying one text frame per packet.
///
/// Closing the sink closes the connection.
pub struct Transport {
    pub(crate) sink: FrameSink,
    pub(crate) stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St, E1, E2>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = E1> + Send + 'static,
        St: Stream<Item = Result<String, E2>> + Send + 'static,
        E1: Into<BoxError>,
        E2: Into<BoxError>,
    {
        Self {
            sink: Box::pin(sink.sink_map_err(|err: E1| -> BoxError { err.into() })),
            stream: Box::pin(stream.map_err(|err: E2| -> BoxError { err.into() })),
        }
    }

    /// In-process transport; the returned [`Peer`] plays the remote end.
    pub fn memory() -> (Self, Peer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded();
        let (inbound_tx, inbound_rx) = mpsc::unbounded::<String>();
        let transport = Self::new(outbound_tx, inbound_rx.map(Ok::<_, BoxError>));
        let peer = Peer {
            outbound: outbound_rx,
            inbound: Some(inbound_tx),
        };
        (transport, peer)
    }
}

/// Remote end of [`Transport::memory`].
pub struct Peer {
    outbound: UnboundedReceiver<String>,
    inbound: Option<UnboundedSender<String>>,
}

impl Peer {
    /// Sends a raw frame to the local side. Returns `false` once hung up.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|inbound| inbound.unbounded_send(frame.into()).is_ok())
    }

    /// Next frame written by the local side; `None` once it closed the
    /// transport.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.next().await
    }

    /// Ends the local side's read stream, as a dropped connection would.
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }
}
