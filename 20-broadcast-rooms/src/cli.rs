use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::room::RoomConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// How long closing a room waits for its members to be released.
    #[arg(long, default_value_t = 5000)]
    pub close_timeout_ms: u64,

    /// Messages a room may queue before senders wait for its worker. 0 makes
    /// every send wait until the room takes it.
    #[arg(long, default_value_t = 0)]
    pub command_buffer: usize,

    /// Skip a member that takes longer than this to accept a message.
    #[arg(long)]
    pub delivery_timeout_ms: Option<u64>,

    /// Close rooms without members every this many seconds.
    #[arg(long)]
    pub reap_interval_secs: Option<u64>,
}

impl Cli {
    pub fn room_config(&self) -> RoomConfig {
        let config = RoomConfig {
            command_buffer: self.command_buffer,
            ..RoomConfig::default()
        }
        .with_close_timeout(Duration::from_millis(self.close_timeout_ms));

        match self.delivery_timeout_ms {
            Some(ms) => config.with_delivery_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }

    /// `None` when reaping is off; zero counts as off.
    pub fn reap_interval(&self) -> Option<Duration> {
        self.reap_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
