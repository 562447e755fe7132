//! Host-side streaming driver.
//!
//! Owns the WebSocket to the controller and streams a compiled job under the
//! sliding-window protocol: at most `window_size` unacknowledged lines, ack
//! timeouts with bounded retransmission, `busy` back-off, gap-driven
//! resends, and resume-after-disconnect via a status query.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::command::{parse_line, Command, CommandLine};
use crate::errors::StreamError;
use crate::reply::{parse_reply, ErrorKind, Reply, StatusReport};

use super::{PlotterDriverConfig, SendWindow, StreamEvent, StreamProgress, StreamStats};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Streams SSG jobs to a plotter controller.
///
/// Progress, telemetry, and device errors are republished on [`Self::events`]
/// so a UI can watch a job without touching the socket.
pub struct PlotterDriver {
    pub config: PlotterDriverConfig,
    pub events: broadcast::Sender<StreamEvent>,
    socket: Socket,
    cancel: Arc<AtomicBool>,
}

impl PlotterDriver {
    /// Open the WebSocket to the controller.
    pub async fn connect(config: PlotterDriverConfig) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::Config)?;
        let (socket, _) = connect_async(config.url())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            config,
            events,
            socket,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Clone of the cancellation flag. Setting it stops the send loop at the
    /// next iteration; in-flight lines are drained for a bounded interval.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Stream a whole job from its first line.
    ///
    /// A compiled job opens with an out-of-band `N0 G28`, which executes
    /// regardless of where an earlier job left the controller's sequence
    /// tracker and resets it for the numbered lines that follow. Lines are
    /// acknowledged when queued, so wait for the controller's queue to drain
    /// (telemetry `q`) before streaming a follow-up job.
    pub async fn stream(&mut self, lines: &[String]) -> Result<StreamStats, StreamError> {
        self.stream_from(lines, 0).await
    }

    /// Query the controller's last acknowledged sequence and continue a job
    /// from the line after it. Duplicate detection on the controller absorbs
    /// any overlap.
    pub async fn resume(&mut self, lines: &[String]) -> Result<StreamStats, StreamError> {
        let status = self.query_status().await?;
        let start = resume_index(lines, status.last_ack);
        debug!(last_ack = status.last_ack, start, "resuming stream");
        self.stream_from(lines, start).await
    }

    /// Send `N0 M408` and wait for the status reply. Telemetry that arrives
    /// in between is forwarded to the event channel.
    pub async fn query_status(&mut self) -> Result<StatusReport, StreamError> {
        let line = CommandLine::new(0, Command::ReportStatus).to_string();
        self.send_text(&line).await?;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(StreamError::StatusTimeout);
            }
            let msg = tokio::time::timeout(deadline - now, self.socket.next())
                .await
                .map_err(|_| StreamError::StatusTimeout)?;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    for raw in text.lines() {
                        match parse_reply(raw) {
                            Ok(Reply::Status(status)) => return Ok(status),
                            Ok(Reply::Telemetry(frame)) => {
                                let _ = self.events.send(StreamEvent::Telemetry(frame));
                            }
                            Ok(_) => {}
                            Err(e) => debug!(%raw, error = %e, "ignoring reply"),
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(StreamError::Disconnected),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(StreamError::FailedToReceive(e.to_string())),
            }
        }
    }

    /// Out-of-band homing request (`N0 G28`), not tracked by any window.
    pub async fn home(&mut self) -> Result<(), StreamError> {
        self.send_out_of_band(Command::Home).await
    }

    /// Out-of-band pump off, the console-style "stop drawing now".
    pub async fn flow_off(&mut self) -> Result<(), StreamError> {
        self.send_out_of_band(Command::FlowOff).await
    }

    pub async fn request_position(&mut self) -> Result<(), StreamError> {
        self.send_out_of_band(Command::ReportPos).await
    }

    pub async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }

    async fn send_out_of_band(&mut self, command: Command) -> Result<(), StreamError> {
        let line = CommandLine::new(0, command).to_string();
        self.send_text(&line).await
    }

    async fn send_text(&mut self, line: &str) -> Result<(), StreamError> {
        debug!(%line, "send");
        self.socket
            .send(Message::Text(line.to_string()))
            .await
            .map_err(|e| StreamError::FailedToSend(e.to_string()))
    }

    async fn stream_from(
        &mut self,
        lines: &[String],
        start_index: usize,
    ) -> Result<StreamStats, StreamError> {
        let total = lines.len();
        let ack_timeout = Duration::from_millis(self.config.ack_timeout_ms);
        let home_timeout = Duration::from_millis(self.config.home_timeout_ms);
        let busy_backoff = Duration::from_millis(self.config.busy_backoff_ms);
        let drain = Duration::from_millis(self.config.drain_timeout_ms);

        let mut window = SendWindow::new(self.config.window_size);
        let mut progress = StreamProgress {
            total,
            ..Default::default()
        };
        let mut next_index = start_index;
        // Sequence of an in-flight G28. Homing blocks the controller and
        // resets its sequence tracker, so nothing else may be in flight until
        // the homing ack arrives.
        let mut home_barrier: Option<u32> = None;
        let mut paused_until: Option<Instant> = None;
        let mut drain_deadline: Option<Instant> = None;
        let started = Instant::now();

        loop {
            let now = Instant::now();

            if self.cancel.load(Ordering::Relaxed) && drain_deadline.is_none() {
                drain_deadline = Some(now + drain);
            }
            if paused_until.is_some_and(|t| now >= t) {
                paused_until = None;
            }

            let sending_blocked =
                paused_until.is_some() || home_barrier.is_some() || drain_deadline.is_some();

            if !sending_blocked {
                while window.has_room() && next_index < total {
                    let line = &lines[next_index];
                    let (seq, is_home) = job_line_info(next_index, line)?;
                    if is_home && !window.is_empty() {
                        break;
                    }
                    self.send_text(line).await?;
                    window.insert(seq, line.clone(), now);
                    next_index += 1;
                    progress.sent += 1;
                    if is_home {
                        home_barrier = Some(seq);
                        break;
                    }
                }
                let _ = self.events.send(StreamEvent::Progress(progress));
            }

            if window.is_empty() {
                if drain_deadline.is_some() && next_index < total {
                    return Err(StreamError::Cancelled);
                }
                if next_index >= total {
                    break;
                }
            }

            let effective_timeout = if home_barrier.is_some() {
                home_timeout
            } else {
                ack_timeout
            };
            let mut deadline = window.next_deadline(effective_timeout);
            if let Some(p) = paused_until {
                deadline = Some(deadline.map_or(p, |d| d.min(p)));
            }
            if let Some(d) = drain_deadline {
                deadline = Some(deadline.map_or(d, |x| x.min(d)));
            }

            tokio::select! {
                msg = self.socket.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        for raw in text.lines() {
                            self.handle_reply(
                                raw,
                                &mut window,
                                &mut progress,
                                &mut paused_until,
                                &mut home_barrier,
                                busy_backoff,
                            )
                            .await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(StreamError::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(StreamError::FailedToReceive(e.to_string())),
                },
                _ = sleep_until_opt(deadline) => {}
            }

            // Retransmit anything whose ack timed out.
            let now = Instant::now();
            if let Some(d) = drain_deadline {
                if now >= d {
                    return Err(StreamError::Cancelled);
                }
            }
            let effective_timeout = if home_barrier.is_some() {
                home_timeout
            } else {
                ack_timeout
            };
            for seq in window.expired(now, effective_timeout) {
                let entry = window.get(seq).expect("expired entry exists");
                if entry.retries >= self.config.max_retries {
                    warn!(seq, "retries exhausted, failing stream");
                    return Err(StreamError::RetriesExhausted { seq });
                }
                let line = entry.line.clone();
                warn!(seq, retry = entry.retries + 1, "ack timeout, resending");
                self.send_text(&line).await?;
                window.mark_resent(seq, now);
                progress.retries += 1;
            }
        }

        let _ = self.events.send(StreamEvent::Progress(progress));
        Ok(StreamStats {
            sent: progress.sent,
            acked: progress.acked,
            retries: progress.retries,
            elapsed: started.elapsed(),
        })
    }

    async fn handle_reply(
        &mut self,
        raw: &str,
        window: &mut SendWindow,
        progress: &mut StreamProgress,
        paused_until: &mut Option<Instant>,
        home_barrier: &mut Option<u32>,
        busy_backoff: Duration,
    ) -> Result<(), StreamError> {
        let reply = match parse_reply(raw) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(%raw, error = %e, "ignoring unparseable reply");
                return Ok(());
            }
        };

        match reply {
            Reply::Ok { seq } => {
                if window.ack(seq).is_some() {
                    progress.acked += 1;
                }
                if *home_barrier == Some(seq) {
                    *home_barrier = None;
                }
            }
            Reply::Err {
                seq: Some(seq),
                code: ErrorKind::Gap,
            } => {
                // The controller is missing a line below `seq`. Resend every
                // in-flight line at or below it, oldest first; ack order on
                // the controller sorts out the rest.
                let now = Instant::now();
                for s in window.at_or_below(seq) {
                    let line = window.get(s).expect("in-flight entry exists").line.clone();
                    warn!(seq = s, gap_at = seq, "resending for gap");
                    self.send_text(&line).await?;
                    window.touch(s, now);
                    progress.retries += 1;
                }
            }
            Reply::Err {
                seq: Some(seq),
                code,
            } => {
                let _ = self.events.send(StreamEvent::DeviceError {
                    seq: Some(seq),
                    code,
                });
                return Err(StreamError::Rejected { seq, code });
            }
            Reply::Err { seq: None, code } => {
                let _ = self.events.send(StreamEvent::DeviceError { seq: None, code });
                if code.is_fatal_for_job() {
                    return Err(StreamError::Fault(code));
                }
            }
            Reply::Busy { q, .. } => {
                let _ = self.events.send(StreamEvent::Busy { queue_depth: q });
                let now = Instant::now();
                *paused_until = Some(now + busy_backoff);
                // The busy'd line was not lost; give everything a fresh
                // timeout instead of charging retries.
                window.touch_all(now);
            }
            Reply::Telemetry(frame) => {
                let _ = self.events.send(StreamEvent::Telemetry(frame));
            }
            Reply::Pos { .. } | Reply::Status(_) => {}
        }
        Ok(())
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

fn job_line_info(index: usize, line: &str) -> Result<(u32, bool), StreamError> {
    match parse_line(line) {
        Ok(cmd) => {
            let is_home = matches!(cmd.command, Command::Home);
            // The only out-of-band line a job may carry is its homing
            // opener; everything else must be sequenced.
            if cmd.seq == 0 && !is_home {
                return Err(StreamError::MalformedJob {
                    index,
                    line: line.to_string(),
                });
            }
            Ok((cmd.seq, is_home))
        }
        Err(_) => Err(StreamError::MalformedJob {
            index,
            line: line.to_string(),
        }),
    }
}

/// Index of the first line to send when resuming after `last_ack`.
///
/// Compiled jobs lead with an out-of-band `N0 G28` and number from 1 after
/// it, so for a non-zero `last_ack` the match is searched past the homing
/// line.
fn resume_index(lines: &[String], last_ack: u32) -> usize {
    if last_ack == 0 {
        return 0;
    }
    lines
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, line)| {
            parse_line(line)
                .ok()
                .filter(|cmd| cmd.seq == last_ack + 1)
                .map(|_| i)
        })
        .unwrap_or(lines.len())
}
