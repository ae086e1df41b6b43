use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

use super::{
    ack::{acknowledgement, Completion},
    config::RoomConfig,
    error::{Error, Result},
    user::User,
};

/// Commands accepted by the room worker. Each carries its completion.
enum Command<T> {
    Register {
        user: Arc<User<T>>,
        ack: Completion,
    },
    Unregister {
        user: Arc<User<T>>,
        ack: Completion,
    },
    Send {
        sender: Option<u64>,
        msg: T,
        /// Complete only after fan-out, rather than on acceptance.
        sync: bool,
        ack: Completion,
    },
}

impl<T> Command<T> {
    fn into_completion(self) -> Completion {
        match self {
            Command::Register { ack, .. }
            | Command::Unregister { ack, .. }
            | Command::Send { ack, .. } => ack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomState {
    Open,
    Closing,
    Closed,
}

/// A named broadcast group.
///
/// The handle only queues commands; membership and fan-out live in a worker
/// task that processes one command at a time, so every broadcast sees the
/// membership committed by the commands queued before it.
pub struct Room<T> {
    id: String,
    config: RoomConfig,
    closed: AtomicBool,
    size: Arc<AtomicUsize>,
    commands: mpsc::Sender<Command<T>>,
    close_tx: mpsc::Sender<Completion>,
}

impl<T> Room<T>
where
    T: Clone + Send + 'static,
{
    /// Creates the room and spawns its worker on the current Tokio runtime.
    pub fn new(id: impl Into<String>, config: RoomConfig) -> Self {
        let id = id.into();
        let (commands, command_rx) = mpsc::channel(config.queue_capacity());
        let (close_tx, close_rx) = mpsc::channel(1);
        let size = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            id: id.clone(),
            state: RoomState::Open,
            users: BTreeMap::new(),
            size: Arc::clone(&size),
            commands: command_rx,
            close_rx,
            config: config.clone(),
        };
        tokio::spawn(worker.run());
        debug!(room = %id, "room opened");

        Self {
            id,
            config,
            closed: AtomicBool::new(false),
            size,
            commands,
            close_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Member count as of the worker's last committed command.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn register(&self, user: impl Into<Option<Arc<User<T>>>>) -> Result<()> {
        let user = user.into().ok_or(Error::RoomUserNil)?;
        self.request(true, |ack| Command::Register { user, ack }).await
    }

    pub async fn unregister(&self, user: impl Into<Option<Arc<User<T>>>>) -> Result<()> {
        let user = user.into().ok_or(Error::RoomUserNil)?;
        self.request(true, |ack| Command::Unregister { user, ack }).await
    }

    /// Hands `msg` to the worker for every member except `sender` and
    /// returns once the worker took the command, before fan-out.
    ///
    /// With a nonzero [`RoomConfig::command_buffer`] this returns as soon as
    /// the command is queued instead.
    pub async fn send(&self, sender: Option<&User<T>>, msg: T) -> Result<()> {
        self.send_with(sender, msg, false).await
    }

    /// Like [`Room::send`], but waits until the worker attempted delivery to
    /// every recipient.
    pub async fn send_sync(&self, sender: Option<&User<T>>, msg: T) -> Result<()> {
        self.send_with(sender, msg, true).await
    }

    pub async fn broadcast(&self, msg: T) -> Result<()> {
        self.send(None, msg).await
    }

    pub async fn broadcast_sync(&self, msg: T) -> Result<()> {
        self.send_sync(None, msg).await
    }

    /// Closes every member, empties the room and stops the worker.
    ///
    /// Waits at most `close_timeout` for the worker to confirm. On
    /// [`Error::RoomCloseTimeout`] the teardown still finishes in the
    /// background once the worker gets to it.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::RoomClosed);
        }

        let (completion, ack) = acknowledgement(true);
        if self.close_tx.try_send(completion).is_err() {
            return Err(Error::RoomClosed);
        }

        match timeout(self.config.close_timeout, ack.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(room = %self.id, timeout = ?self.config.close_timeout, "room close timed out");
                Err(Error::RoomCloseTimeout)
            }
        }
    }

    async fn send_with(&self, sender: Option<&User<T>>, msg: T, sync: bool) -> Result<()> {
        let sender = sender.map(User::key);
        let acknowledged = sync || self.config.command_buffer == 0;
        self.request(acknowledged, |ack| Command::Send {
            sender,
            msg,
            sync,
            ack,
        })
        .await
    }

    async fn request<F>(&self, acknowledged: bool, command: F) -> Result<()>
    where
        F: FnOnce(Completion) -> Command<T>,
    {
        if self.is_closed() {
            return Err(Error::RoomClosed);
        }

        let (completion, mut ack) = acknowledgement(acknowledged);
        if self.commands.send(command(completion)).await.is_err() {
            ack.close();
            return Err(Error::RoomClosed);
        }
        ack.wait().await
    }
}

impl<T> std::fmt::Debug for Room<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("size", &self.size.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Owns the membership of one room. Nothing else writes it.
struct Worker<T> {
    id: String,
    state: RoomState,
    users: BTreeMap<u64, Arc<User<T>>>,
    size: Arc<AtomicUsize>,
    commands: mpsc::Receiver<Command<T>>,
    close_rx: mpsc::Receiver<Completion>,
    config: RoomConfig,
}

impl<T> Worker<T>
where
    T: Clone + Send + 'static,
{
    async fn run(mut self) {
        loop {
            // Commands queued before the close request still run first.
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        self.teardown(None).await;
                        break;
                    }
                },
                Some(done) = self.close_rx.recv() => {
                    self.teardown(Some(done)).await;
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, command: Command<T>) {
        if self.state != RoomState::Open {
            command.into_completion().complete(Err(Error::RoomClosed)).await;
            return;
        }

        match command {
            Command::Register { user, ack } => {
                debug!(room = %self.id, user = %user.id(), "user registered");
                self.users.insert(user.key(), user);
                self.update_size();
                ack.complete(Ok(())).await;
            }
            Command::Unregister { user, ack } => {
                if self.users.remove(&user.key()).is_some() {
                    debug!(room = %self.id, user = %user.id(), "user unregistered");
                }
                self.update_size();
                ack.complete(Ok(())).await;
            }
            Command::Send {
                sender,
                msg,
                sync: true,
                ack,
            } => {
                self.fan_out(sender, msg).await;
                ack.complete(Ok(())).await;
            }
            Command::Send {
                sender,
                msg,
                sync: false,
                ack,
            } => {
                // Accepted: release the caller, then deliver before taking
                // the next command.
                ack.complete(Ok(())).await;
                self.fan_out(sender, msg).await;
            }
        }
    }

    async fn fan_out(&self, sender: Option<u64>, msg: T) {
        for (key, user) in &self.users {
            if sender == Some(*key) {
                continue;
            }
            self.deliver(user, msg.clone()).await;
        }
    }

    async fn deliver(&self, user: &User<T>, msg: T) {
        let result = match self.config.delivery_timeout {
            Some(limit) => match timeout(limit, user.send(msg)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(room = %self.id, user = %user.id(), "member did not drain broadcast in time");
                    return;
                }
            },
            None => user.send(msg).await,
        };
        if let Err(error) = result {
            debug!(room = %self.id, user = %user.id(), %error, "failed to deliver broadcast");
        }
    }

    async fn teardown(&mut self, done: Option<Completion>) {
        self.state = RoomState::Closing;

        for user in self.users.values() {
            let _ = user.close();
        }
        self.users.clear();
        self.update_size();

        self.commands.close();
        self.close_rx.close();
        while let Some(command) = self.commands.recv().await {
            command.into_completion().complete(Err(Error::RoomClosed)).await;
        }

        self.state = RoomState::Closed;
        info!(room = %self.id, "room closed");

        if let Some(done) = done {
            done.complete(Ok(())).await;
        }
    }

    fn update_size(&self) {
        self.size.store(self.users.len(), Ordering::Release);
    }
}
