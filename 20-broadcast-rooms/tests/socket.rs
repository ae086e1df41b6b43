use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use broadcast_rooms::socket::{serve, Arg, Packet, Peer, Socket, Transport};
use serde_json::json;
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(1);

async fn next_packet(peer: &mut Peer) -> Result<Packet> {
    let frame = timeout(WAIT, peer.recv())
        .await?
        .context("transport closed")?;
    Ok(Packet::decode(&frame)?)
}

fn send(peer: &Peer, packet: Packet) -> Result<()> {
    ensure!(peer.send(packet.encode()?), "peer already hung up");
    Ok(())
}

fn event(name: &str, args: Vec<serde_json::Value>, ack_id: u64) -> Packet {
    Packet::Event {
        event: name.to_string(),
        args,
        ack_id,
    }
}

#[tokio::test]
async fn connect_packet_comes_first_and_hang_up_disconnects() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let (connected_tx, connected_rx) = oneshot::channel();
    let (hook_tx, hook_rx) = oneshot::channel();
    let (reason_tx, mut reasons) = mpsc::unbounded_channel();

    let session = tokio::spawn(serve(transport, "sock-1", move |socket| {
        socket.on_connect(move || async move {
            let _ = connected_tx.send(());
        });
        socket.on_disconnect(move || async move {
            let _ = hook_tx.send(());
        });
        socket.on("disconnect", move |args| {
            let _ = reason_tx.send(args.str(0).map(str::to_owned));
            async {}
        });
        Ok(())
    }));

    assert_eq!(
        next_packet(&mut peer).await?,
        Packet::Connect {
            id: "sock-1".into()
        }
    );
    timeout(WAIT, connected_rx).await??;

    peer.hang_up();
    assert_eq!(
        next_packet(&mut peer).await?,
        Packet::Disconnect {
            reason: "socket client disconnected".into()
        }
    );
    timeout(WAIT, session).await???;
    timeout(WAIT, hook_rx).await??;
    assert_eq!(
        reasons.recv().await,
        Some(Some("socket client disconnected".to_string()))
    );
    assert_eq!(timeout(WAIT, peer.recv()).await?, None);
    Ok(())
}

#[tokio::test]
async fn event_ack_is_correlated_by_id() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let (rooms_tx, mut rooms) = mpsc::unbounded_channel();
    let session = tokio::spawn(serve(transport, "sock-1", move |socket| {
        socket.on("join", move |args| {
            let _ = rooms_tx.send(args.str(0).map(str::to_owned));
            args.ack(vec![json!("ok")]);
            async {}
        });
        Ok(())
    }));
    next_packet(&mut peer).await?;

    send(&peer, event("join", vec![json!("alpha")], 7))?;
    let frame = timeout(WAIT, peer.recv())
        .await?
        .context("transport closed")?;
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&frame)?,
        json!({"type": "ack", "data": {"id": 7, "args": ["ok"]}})
    );
    assert_eq!(rooms.recv().await, Some(Some("alpha".to_string())));

    // Without an ack id the handler's ack goes nowhere.
    send(&peer, event("join", vec![json!("beta")], 0))?;
    send(&peer, event("join", vec![json!("gamma")], 8))?;
    assert_eq!(
        next_packet(&mut peer).await?,
        Packet::Ack {
            id: 8,
            args: vec![json!("ok")],
        }
    );
    assert_eq!(rooms.recv().await, Some(Some("beta".to_string())));
    assert_eq!(rooms.recv().await, Some(Some("gamma".to_string())));

    peer.hang_up();
    timeout(WAIT, session).await???;
    Ok(())
}

#[tokio::test]
async fn emit_callback_runs_once_per_ack() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let socket = Socket::new(transport, "sock-1");
    let connection = tokio::spawn({
        let socket = socket.clone();
        async move { socket.connect().await }
    });
    next_packet(&mut peer).await?;

    let (replies_tx, mut replies) = mpsc::unbounded_channel();
    socket
        .emit(
            "ping",
            vec![
                Arg::from("hello"),
                Arg::callback(move |args| {
                    let _ = replies_tx.send(args);
                }),
            ],
        )
        .await?;
    assert_eq!(
        next_packet(&mut peer).await?,
        event("ping", vec![json!("hello")], 1)
    );

    send(
        &peer,
        Packet::Ack {
            id: 1,
            args: vec![json!("pong")],
        },
    )?;
    assert_eq!(
        timeout(WAIT, replies.recv()).await?,
        Some(vec![json!("pong")])
    );

    // A repeated ack finds nothing pending.
    send(
        &peer,
        Packet::Ack {
            id: 1,
            args: vec![json!("again")],
        },
    )?;
    sleep(Duration::from_millis(50)).await;
    assert!(replies.try_recv().is_err());

    // No trailing callback, no ack id.
    socket.emit("note", vec![Arg::from("fyi")]).await?;
    assert_eq!(
        next_packet(&mut peer).await?,
        event("note", vec![json!("fyi")], 0)
    );

    peer.hang_up();
    timeout(WAIT, connection).await???;
    assert!(socket.is_disconnected());
    assert!(socket.emit("late", Vec::new()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn malformed_packets_are_skipped() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let session = tokio::spawn(serve(transport, "sock-1", |socket| {
        socket.on("echo", |args| async move {
            let value = args.get(0).cloned().unwrap_or_default();
            args.ack(vec![value]);
        });
        Ok(())
    }));
    next_packet(&mut peer).await?;

    ensure!(peer.send(r#"{"type":"event","data":{"event":5,"args":[],"ackId":1}}"#));
    ensure!(peer.send(r#"{"type":"mystery","data":{}}"#));
    send(&peer, event("echo", vec![json!(42)], 2))?;

    assert_eq!(
        next_packet(&mut peer).await?,
        Packet::Ack {
            id: 2,
            args: vec![json!(42)],
        }
    );

    peer.hang_up();
    timeout(WAIT, session).await???;
    Ok(())
}

#[tokio::test]
async fn invalid_frame_disconnects_with_error() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let session = tokio::spawn(serve(transport, "sock-1", |_| Ok(())));
    next_packet(&mut peer).await?;

    ensure!(peer.send("not json"));
    match next_packet(&mut peer).await? {
        Packet::Disconnect { reason } => {
            assert!(
                reason.starts_with("socket client disconnected with error:"),
                "unexpected reason: {reason}"
            );
        }
        other => panic!("expected a disconnect packet, got {other:?}"),
    }
    timeout(WAIT, session).await???;
    assert_eq!(timeout(WAIT, peer.recv()).await?, None);
    Ok(())
}

#[tokio::test]
async fn subscribers_run_in_registration_order() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = tokio::spawn(serve(transport, "sock-1", {
        let calls = Arc::clone(&calls);
        move |socket| {
            for name in ["first", "second"] {
                let calls = Arc::clone(&calls);
                socket.on("tick", move |_| {
                    calls.lock().unwrap().push(name);
                    async {}
                });
            }
            socket.on("tick", |args| async move { args.ack(Vec::new()) });
            Ok(())
        }
    }));
    next_packet(&mut peer).await?;

    send(&peer, event("tick", Vec::new(), 3))?;
    assert_eq!(
        next_packet(&mut peer).await?,
        Packet::Ack {
            id: 3,
            args: Vec::new(),
        }
    );
    assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);

    peer.hang_up();
    timeout(WAIT, session).await???;
    Ok(())
}

#[tokio::test]
async fn failed_setup_closes_the_connection() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let result = serve(transport, "sock-1", |_| Err(anyhow::anyhow!("no room for you"))).await;

    let error = result.expect_err("setup failure should surface");
    assert!(format!("{error:#}").contains("no room for you"));
    assert_eq!(timeout(WAIT, peer.recv()).await?, None);
    Ok(())
}

#[tokio::test]
async fn connect_subscribers_run_once_before_the_hook() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (hooked_tx, hooked_rx) = oneshot::channel();

    let session = tokio::spawn(serve(transport, "sock-1", {
        let calls = Arc::clone(&calls);
        move |socket| {
            let subscriber_calls = Arc::clone(&calls);
            socket.on("connect", move |args| {
                assert!(args.is_empty());
                subscriber_calls.lock().unwrap().push("subscriber");
                async {}
            });
            socket.on_connect(move || async move {
                calls.lock().unwrap().push("hook");
                let _ = hooked_tx.send(());
            });
            Ok(())
        }
    }));

    next_packet(&mut peer).await?;
    timeout(WAIT, hooked_rx).await??;
    assert_eq!(*calls.lock().unwrap(), vec!["subscriber", "hook"]);

    peer.hang_up();
    timeout(WAIT, session).await???;
    assert_eq!(*calls.lock().unwrap(), vec!["subscriber", "hook"]);
    Ok(())
}

async fn released(token: &Arc<()>) -> Result<()> {
    timeout(WAIT, async {
        while Arc::strong_count(token) > 1 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn failed_emit_forgets_its_callback() -> Result<()> {
    let (sink, rx) = futures::channel::mpsc::unbounded::<String>();
    drop(rx);
    let stream = futures::stream::pending::<Result<String, std::io::Error>>();
    let socket = Socket::new(Transport::new(sink, stream), "sock-1");

    let token = Arc::new(());
    let held = Arc::clone(&token);
    let emitted = socket
        .emit(
            "ping",
            vec![Arg::callback(move |_| {
                let _held = &held;
            })],
        )
        .await;
    assert!(emitted.is_err());
    released(&token).await
}

#[tokio::test]
async fn disconnect_drops_unanswered_callbacks() -> Result<()> {
    let (transport, mut peer) = Transport::memory();
    let socket = Socket::new(transport, "sock-1");

    let token = Arc::new(());
    let held = Arc::clone(&token);
    socket
        .emit(
            "ping",
            vec![Arg::callback(move |_| {
                let _held = &held;
            })],
        )
        .await?;
    assert_eq!(next_packet(&mut peer).await?, event("ping", Vec::new(), 1));

    peer.hang_up();
    timeout(WAIT, socket.disconnected()).await?;
    assert_eq!(Arc::strong_count(&token), 1);
    Ok(())
}
