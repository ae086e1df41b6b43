use std::time::Duration;

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_COMMAND_BUFFER: usize = 0;

/// Tuning knobs for a single [`Room`](super::Room).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// How long `Room::close` waits for the worker to confirm teardown.
    pub close_timeout: Duration,
    /// Commands a fire-and-forget `Room::send` may leave queued without
    /// waiting for the worker. `0` makes every send wait until the worker
    /// takes it.
    pub command_buffer: usize,
    /// Per-member limit for draining one broadcast. `None` waits forever.
    ///
    /// A member that misses the deadline skips that message only; it stays
    /// registered.
    pub delivery_timeout: Option<Duration>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            delivery_timeout: None,
        }
    }
}

impl RoomConfig {
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = Some(delivery_timeout);
        self
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.command_buffer.max(1)
    }
}
