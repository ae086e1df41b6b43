use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use futures::{stream, Stream};
use tokio::sync::{mpsc, oneshot, watch};

use super::error::{Error, Result};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

struct Delivery<T> {
    msg: T,
    taken: oneshot::Sender<()>,
}

/// A room participant: one message sink per connection.
///
/// Sending is a rendezvous. [`User::send`] returns only after the consumer
/// of [`User::messages`] pulled the message, so a stalled consumer stalls
/// whoever is sending to it.
pub struct User<T> {
    id: String,
    key: u64,
    closed: watch::Sender<bool>,
    tx: mpsc::Sender<Delivery<T>>,
    rx: Mutex<Option<mpsc::Receiver<Delivery<T>>>>,
}

impl<T> User<T> {
    pub fn new(id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (closed, _) = watch::channel(false);
        Self {
            id: id.into(),
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            closed,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity used for membership and sender exclusion.
    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Delivers `msg` and waits until the consumer takes it.
    ///
    /// Fails with [`Error::UserClosed`] if the user is closed before or while
    /// waiting, or if the message stream was dropped. Dropping the returned
    /// future before it resolves withdraws the message.
    pub async fn send(&self, msg: T) -> Result<()> {
        if self.is_closed() {
            return Err(Error::UserClosed);
        }

        let mut closed = self.closed.subscribe();
        let (taken, took) = oneshot::channel();
        let deliver = async {
            self.tx
                .send(Delivery { msg, taken })
                .await
                .map_err(|_| Error::UserClosed)?;
            took.await.map_err(|_| Error::UserClosed)
        };

        tokio::select! {
            biased;
            _ = until_closed(&mut closed) => Err(Error::UserClosed),
            result = deliver => result,
        }
    }

    /// Marks the user closed and ends its message stream.
    ///
    /// Only the first call has an effect; later calls return
    /// [`Error::UserClosed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.send_replace(true) {
            return Err(Error::UserClosed);
        }
        Ok(())
    }
}

impl<T: Send + 'static> User<T> {
    /// Stream of delivered messages, ending once the user is closed.
    ///
    /// The stream can be taken once; later calls return a stream that is
    /// already finished.
    pub fn messages(&self) -> impl Stream<Item = T> + Send + 'static {
        let rx = self.rx.lock().ok().and_then(|mut slot| slot.take());
        let closed = self.closed.subscribe();

        stream::unfold((rx, closed), |(rx, mut closed)| async move {
            let mut rx = rx?;
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = until_closed(&mut closed) => return None,
                    delivery = rx.recv() => delivery?,
                };
                // A sender that stopped waiting (timed out, dropped) has
                // already reported failure; its message must not surface.
                if delivery.taken.send(()).is_ok() {
                    return Some((delivery.msg, (Some(rx), closed)));
                }
            }
        })
    }
}

impl<T> std::fmt::Debug for User<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn until_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}
