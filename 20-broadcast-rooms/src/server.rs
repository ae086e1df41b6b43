use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{future, SinkExt, StreamExt, TryStreamExt};
use nanoid::nanoid;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    chat::{self, ChatManager},
    socket::{self, Transport},
};

pub struct Server {
    listener: TcpListener,
    manager: Arc<ChatManager>,
    reap_interval: Option<Duration>,
}

impl Server {
    pub fn new(listener: TcpListener, manager: Arc<ChatManager>) -> Self {
        Self {
            listener,
            manager,
            reap_interval: None,
        }
    }

    /// Periodically closes and forgets rooms nobody is in.
    pub fn with_reap_interval(mut self, reap_interval: Option<Duration>) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves websocket connections until `shutdown` resolves, then closes
    /// every room.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            manager,
            reap_interval,
        } = self;

        let reaper = reap_interval
            .map(|every| tokio::spawn(reap_idle_rooms(Arc::clone(&manager), every)));

        let served = axum::serve(listener, router(Arc::clone(&manager)))
            .with_graceful_shutdown(shutdown)
            .await
            .context("serving websocket connections");

        if let Some(reaper) = reaper {
            reaper.abort();
        }
        info!("server shutting down");
        manager.close().await;
        served
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Routes `GET /ws` to the chat protocol.
pub fn router(manager: Arc<ChatManager>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn upgrade(ws: WebSocketUpgrade, State(manager): State<Arc<ChatManager>>) -> Response {
    ws.on_upgrade(move |ws| handle_connection(ws, manager))
}

async fn handle_connection(ws: WebSocket, manager: Arc<ChatManager>) {
    let id = nanoid!();
    info!(socket = %id, "connection opened");

    let served = socket::serve(websocket_transport(ws), id.clone(), |socket| {
        chat::attach(socket, manager);
        Ok(())
    })
    .await;

    match served {
        Ok(()) => info!(socket = %id, "connection closed"),
        Err(err) => warn!(socket = %id, error = ?err, "connection closed with error"),
    }
}

/// One text frame per packet. Binary frames are read as UTF-8 text; control
/// frames are left to axum.
fn websocket_transport(ws: WebSocket) -> Transport {
    let (sink, stream) = ws.split();
    let sink = sink.with(|frame: String| future::ready(Ok::<_, axum::Error>(Message::Text(frame))));
    let stream = stream.try_filter_map(|message| {
        let frame = match message {
            Message::Text(text) => Some(text),
            Message::Binary(bytes) => String::from_utf8(bytes).ok(),
            _ => None,
        };
        future::ready(Ok::<_, axum::Error>(frame))
    });
    Transport::new(sink, stream)
}

async fn reap_idle_rooms(manager: Arc<ChatManager>, every: Duration) {
    let mut ticks = tokio::time::interval(every);
    // The first tick completes immediately.
    ticks.tick().await;
    loop {
        ticks.tick().await;
        manager.reap_idle().await;
    }
}
