//! WebSocket front end: bridges text frames to the plotter.
//!
//! One client is serviced at a time, matching the single-host model; the
//! plotter (and with it the sequence tracker) outlives connections so a
//! reconnecting host can query `M408` and resume.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::io::StepIo;
use crate::plotter::Plotter;

/// Housekeeping cadence for the cooperative loop. Heartbeat and telemetry
/// deadlines are checked at this resolution.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

pub async fn run<IO>(
    listener: TcpListener,
    plotter: Arc<Mutex<Plotter<IO>>>,
) -> std::io::Result<()>
where
    IO: StepIo + Send + 'static,
{
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            conn = listener.accept() => {
                let (stream, peer) = conn?;
                info!(%peer, "client connected");
                plotter.lock().await.on_connect(Instant::now());
                if let Err(e) = handle_client(stream, &plotter).await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
                plotter.lock().await.on_disconnect();
                info!(%peer, "client disconnected");
            }
            _ = tick.tick() => {
                // Queued work keeps executing between connections; replies
                // have no reader and are dropped.
                let _ = plotter.lock().await.tick(Instant::now());
            }
        }
    }
}

async fn handle_client<IO>(
    stream: TcpStream,
    plotter: &Arc<Mutex<Plotter<IO>>>,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    IO: StepIo + Send + 'static,
{
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let mut replies = Vec::new();
                    {
                        let mut plotter = plotter.lock().await;
                        for line in text.lines().filter(|l| !l.trim().is_empty()) {
                            replies.extend(plotter.handle_line(line, Instant::now()));
                        }
                    }
                    for reply in replies {
                        write.send(Message::Text(reply.to_string())).await?;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
            _ = tick.tick() => {
                let replies = plotter.lock().await.tick(Instant::now());
                for reply in replies {
                    write.send(Message::Text(reply.to_string())).await?;
                }
            }
        }
    }
}
