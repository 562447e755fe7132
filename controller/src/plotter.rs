//! The controller core: protocol engine, state machine, and planner glue.
//!
//! One `Plotter` owns all controller state and is driven from exactly one
//! task: `handle_line` for each incoming frame, `tick` for housekeeping.
//! Every entry point takes `now` explicitly, so the whole machine runs under
//! test with simulated IO and synthetic clocks.

use std::time::{Duration, Instant};

use ssg::command::{parse_line, Command};
use ssg::config::MachineConfig;
use ssg::reply::{ErrorKind, Reply, StatusReport, TelemetryFrame, TelemetryPos};
use ssg::{MachineState, Position};
use tracing::{debug, info, warn};

use crate::io::StepIo;
use crate::motion::{run_homing, MotionEvent, MotionSystem};
use crate::queue::{CommandQueue, QueuedCommand};
use crate::safety::target_within_limits;
use crate::sequence::{SeqDisposition, SequenceTracker};

pub struct Plotter<IO: StepIo> {
    cfg: MachineConfig,
    io: IO,
    state: MachineState,
    seq: SequenceTracker,
    queue: CommandQueue,
    motion: MotionSystem,
    homed: bool,
    /// Where the gantry will be once everything queued has executed. Targets
    /// with omitted coordinates and soft-limit checks resolve against this.
    planned: Position,
    /// Commanded pump state. Survives `M3 S0`: duty zero, flag still on.
    flow_on: bool,
    /// Modal feed: a move without `F` reuses the last commanded one.
    current_feed: f64,
    /// The heartbeat watchdog only arms while a client is attached; a
    /// disconnect has its own safety trigger.
    client_connected: bool,
    last_command: Instant,
    last_telemetry: Instant,
}

impl<IO: StepIo> Plotter<IO> {
    pub fn new(cfg: MachineConfig, io: IO, now: Instant) -> Self {
        let motion = MotionSystem::new(&cfg);
        let queue = CommandQueue::new(cfg.queue_capacity);
        Self {
            cfg,
            io,
            state: MachineState::Idle,
            seq: SequenceTracker::new(),
            queue,
            motion,
            homed: false,
            planned: Position::new(0.0, 0.0),
            flow_on: false,
            current_feed: 600.0,
            client_connected: true,
            last_command: now,
            last_telemetry: now,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn position(&self) -> Position {
        self.motion.position()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn pump_duty(&self) -> u8 {
        self.io.pump_duty()
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    pub fn expected_next(&self) -> u32 {
        self.seq.expected_next()
    }

    pub fn last_acked(&self) -> u32 {
        self.seq.last_acked()
    }

    /// True once the queue is drained and no segment or dwell is running.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.queue.is_empty() && !self.motion.is_busy(now)
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    /// Handle one received line and produce the replies to send back.
    pub fn handle_line(&mut self, raw: &str, now: Instant) -> Vec<Reply> {
        self.last_command = now;

        let line = match parse_line(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(%raw, error = %e, "rejecting unparseable line");
                return vec![Reply::Err {
                    seq: e.seq,
                    code: ErrorKind::Parse,
                }];
            }
        };
        debug!(seq = line.seq, op = line.command.op(), "received");

        if line.seq == 0 {
            // Out-of-band: same gates, no sequence bookkeeping.
            return self.execute(line.command, 0, false);
        }

        match self.seq.classify(line.seq) {
            SeqDisposition::Duplicate => {
                // Retry collision: re-ack idempotently, never re-execute.
                debug!(seq = line.seq, "duplicate, re-acking");
                vec![Reply::Ok { seq: line.seq }]
            }
            SeqDisposition::Gap => {
                warn!(
                    seq = line.seq,
                    expected = self.seq.expected_next(),
                    "sequence gap"
                );
                vec![Reply::Err {
                    seq: Some(line.seq),
                    code: ErrorKind::Gap,
                }]
            }
            SeqDisposition::InOrder => self.execute(line.command, line.seq, true),
        }
    }

    /// Periodic work: advance motion, dequeue, watchdog, telemetry.
    pub fn tick(&mut self, now: Instant) -> Vec<Reply> {
        let mut replies = Vec::new();

        if let Some(event) = self.motion.tick(now, &mut self.io) {
            match event {
                MotionEvent::SegmentDone => {}
                MotionEvent::Fault(code) => {
                    warn!(code = %code, "motion fault");
                    self.enter_error();
                    replies.push(Reply::Err { seq: None, code });
                }
            }
        }

        if !self.motion.is_busy(now) && self.state.accepts_motion() {
            self.dequeue_next(now);
        }

        if self.client_connected
            && self.state == MachineState::Printing
            && now.duration_since(self.last_command)
                > Duration::from_millis(self.cfg.heartbeat_timeout_ms)
        {
            warn!("heartbeat timeout, pausing and cutting flow");
            self.state = MachineState::Paused;
            self.io.set_pump_duty(0);
            self.flow_on = false;
            replies.push(Reply::Err {
                seq: None,
                code: ErrorKind::Heartbeat,
            });
        }

        if now.duration_since(self.last_telemetry)
            >= Duration::from_millis(self.cfg.telemetry_period_ms)
        {
            self.last_telemetry = now;
            replies.push(Reply::Telemetry(self.telemetry_frame()));
        }

        replies
    }

    /// A client attached. Restarts the heartbeat clock so a reconnecting
    /// host is not timed out for the silence of the gap.
    pub fn on_connect(&mut self, now: Instant) {
        self.client_connected = true;
        self.last_command = now;
    }

    /// Transport dropped: the pump must not keep running unattended. The
    /// sequence tracker survives so a reconnecting host can resume.
    pub fn on_disconnect(&mut self) {
        info!("client disconnected, forcing pump off");
        self.io.set_pump_duty(0);
        self.flow_on = false;
        self.client_connected = false;
    }

    pub fn telemetry_frame(&self) -> TelemetryFrame {
        let pos = self.motion.position();
        TelemetryFrame {
            pos: TelemetryPos { x: pos.x, y: pos.y },
            flow: self.io.pump_duty(),
            q: self.queue.len(),
            state: self.state,
            last_ack: self.seq.last_acked(),
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            q: self.queue.len(),
            flow: self.io.pump_duty(),
            sauce_on: self.flow_on,
            last_ack: self.seq.last_acked(),
        }
    }

    fn execute(&mut self, command: Command, seq: u32, tracked: bool) -> Vec<Reply> {
        match command {
            Command::Home => {
                // Printing with nothing queued or moving is Ready in all but
                // name; a follow-up job re-homes from it without an explicit
                // pause. A residual dwell is dropped by the homing cycle.
                let drained_print = self.state == MachineState::Printing
                    && self.queue.is_empty()
                    && !self.motion.is_moving();
                if !(self.state.accepts_home() || drained_print) {
                    return self.reject(seq, tracked, ErrorKind::BusyState);
                }
                // Acked as execution begins; a failure follows as an
                // asynchronous fault.
                let ack = self.accept_ack(seq, tracked);
                let mut replies = vec![ack];
                replies.extend(self.run_homing_cycle());
                replies
            }
            Command::Rapid { x, y, feed } => self.handle_move(seq, tracked, x, y, feed, true),
            Command::Draw { x, y, feed } => self.handle_move(seq, tracked, x, y, feed, false),
            Command::FlowOn { duty } => {
                if !self.homed {
                    return self.reject(seq, tracked, ErrorKind::NotHomed);
                }
                if !self.state.accepts_flow_on() {
                    return self.reject(seq, tracked, ErrorKind::BusyState);
                }
                if self.queue.push(QueuedCommand::FlowOn { duty }).is_err() {
                    return vec![self.busy_reply()];
                }
                vec![self.accept_ack(seq, tracked)]
            }
            Command::FlowOff => match self.state {
                MachineState::Ready | MachineState::Printing => {
                    if self.queue.push(QueuedCommand::FlowOff).is_err() {
                        return vec![self.busy_reply()];
                    }
                    vec![self.accept_ack(seq, tracked)]
                }
                MachineState::Homing | MachineState::Cleaning => {
                    self.reject(seq, tracked, ErrorKind::BusyState)
                }
                // Turning the pump off is always safe; outside a job it
                // takes effect immediately.
                _ => {
                    self.io.set_pump_duty(0);
                    self.flow_on = false;
                    vec![self.accept_ack(seq, tracked)]
                }
            },
            Command::ReportPos => {
                let ack = self.accept_ack(seq, tracked);
                let pos = self.motion.position();
                vec![ack, Reply::Pos { x: pos.x, y: pos.y }]
            }
            Command::ReportStatus => {
                let ack = self.accept_ack(seq, tracked);
                vec![ack, Reply::Status(self.status_report())]
            }
        }
    }

    fn handle_move(
        &mut self,
        seq: u32,
        tracked: bool,
        x: Option<f64>,
        y: Option<f64>,
        feed: Option<f64>,
        rapid: bool,
    ) -> Vec<Reply> {
        if !self.homed {
            return self.reject(seq, tracked, ErrorKind::NotHomed);
        }
        if !self.state.accepts_motion() {
            return self.reject(seq, tracked, ErrorKind::BusyState);
        }

        let target = Position::new(
            x.unwrap_or(self.planned.x),
            y.unwrap_or(self.planned.y),
        );
        if !target_within_limits(&self.cfg.soft_limits(), target) {
            warn!(x = target.x, y = target.y, "target outside soft limits");
            if tracked {
                self.seq.consume();
            }
            self.enter_error();
            return vec![Reply::Err {
                seq: Some(seq),
                code: ErrorKind::Limit,
            }];
        }

        let feed = feed.unwrap_or(self.current_feed);
        let queued = if rapid {
            QueuedCommand::Rapid { target, feed }
        } else {
            QueuedCommand::Draw { target, feed }
        };
        if self.queue.push(queued).is_err() {
            // Not an accept: the sequence number stays unconsumed and the
            // host retries the same line later.
            return vec![self.busy_reply()];
        }

        self.current_feed = feed;
        self.planned = target;
        if self.state == MachineState::Ready {
            self.state = MachineState::Printing;
        }
        vec![self.accept_ack(seq, tracked)]
    }

    fn dequeue_next(&mut self, now: Instant) {
        match self.queue.pop() {
            None => {}
            Some(QueuedCommand::Rapid { target, feed }) => {
                if self.flow_on || self.io.pump_duty() > 0 {
                    // Travel runs dry. Cut the flow, let the off-dwell pass,
                    // then pick the move back up.
                    self.io.set_pump_duty(0);
                    self.flow_on = false;
                    self.motion.dwell(now, self.cfg.flow_off_dwell_ms);
                    self.queue.push_front(QueuedCommand::Rapid { target, feed });
                } else {
                    self.motion.start_move(now, target, feed);
                }
            }
            Some(QueuedCommand::Draw { target, feed }) => {
                self.motion.start_move(now, target, feed);
            }
            Some(QueuedCommand::FlowOn { duty }) => {
                self.io.set_pump_duty(duty);
                self.flow_on = true;
                self.motion.dwell(now, self.cfg.flow_on_dwell_ms);
            }
            Some(QueuedCommand::FlowOff) => {
                self.io.set_pump_duty(0);
                self.flow_on = false;
                self.motion.dwell(now, self.cfg.flow_off_dwell_ms);
            }
        }
    }

    fn run_homing_cycle(&mut self) -> Vec<Reply> {
        self.io.set_pump_duty(0);
        self.flow_on = false;
        self.queue.clear();
        self.state = MachineState::Homing;
        info!("homing");

        match run_homing(&mut self.motion, &mut self.io, &self.cfg) {
            Ok(()) => {
                self.homed = true;
                self.planned = Position::new(0.0, 0.0);
                self.state = MachineState::Ready;
                self.seq.reset();
                info!("homing complete, sequence tracker reset");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "homing failed");
                self.homed = false;
                self.state = MachineState::Error;
                vec![Reply::Err {
                    seq: None,
                    code: ErrorKind::HomingFail,
                }]
            }
        }
    }

    fn enter_error(&mut self) {
        self.io.set_pump_duty(0);
        self.flow_on = false;
        self.motion.abort();
        self.queue.clear();
        self.state = MachineState::Error;
        // Position can no longer be trusted; a successful home re-validates.
        self.homed = false;
    }

    fn reject(&mut self, seq: u32, tracked: bool, code: ErrorKind) -> Vec<Reply> {
        if tracked {
            self.seq.consume();
        }
        vec![Reply::Err {
            seq: Some(seq),
            code,
        }]
    }

    fn accept_ack(&mut self, seq: u32, tracked: bool) -> Reply {
        if tracked {
            self.seq.consume();
            self.seq.record_ack(seq);
        }
        Reply::Ok { seq }
    }

    fn busy_reply(&self) -> Reply {
        Reply::Busy {
            q: self.queue.len(),
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedIo;

    fn homed_plotter(now: Instant) -> Plotter<SimulatedIo> {
        let mut plotter = Plotter::new(MachineConfig::default(), SimulatedIo::new(), now);
        let replies = plotter.handle_line("N1 G28", now);
        assert_eq!(replies, vec![Reply::Ok { seq: 1 }]);
        plotter
    }

    #[test]
    fn motion_before_home_is_rejected() {
        let now = Instant::now();
        let mut plotter = Plotter::new(MachineConfig::default(), SimulatedIo::new(), now);
        let replies = plotter.handle_line("N1 G1 X10 Y0 F600", now);
        assert_eq!(
            replies,
            vec![Reply::Err {
                seq: Some(1),
                code: ErrorKind::NotHomed
            }]
        );
    }

    #[test]
    fn homing_resets_the_sequence() {
        let now = Instant::now();
        let plotter = homed_plotter(now);
        assert_eq!(plotter.state(), MachineState::Ready);
        assert!(plotter.is_homed());
        assert_eq!(plotter.expected_next(), 1);
        assert_eq!(plotter.last_acked(), 0);
    }

    #[test]
    fn motion_ack_is_emitted_when_queued() {
        let now = Instant::now();
        let mut plotter = homed_plotter(now);
        let replies = plotter.handle_line("N1 G1 X10 Y0 F600", now);
        assert_eq!(replies, vec![Reply::Ok { seq: 1 }]);
        // Acked but not yet executed.
        assert_eq!(plotter.queue_depth(), 1);
        assert_eq!(plotter.position(), Position::new(0.0, 0.0));
        assert_eq!(plotter.state(), MachineState::Printing);
    }

    #[test]
    fn queue_overflow_answers_busy_without_consuming_the_sequence() {
        let now = Instant::now();
        let cfg = MachineConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let mut plotter = Plotter::new(cfg, SimulatedIo::new(), now);
        plotter.handle_line("N1 G28", now);
        plotter.handle_line("N1 G1 X1 F600", now);
        plotter.handle_line("N2 G1 X2 F600", now);
        let expected_before = plotter.expected_next();
        let replies = plotter.handle_line("N3 G1 X3 F600", now);
        assert!(matches!(replies[0], Reply::Busy { q: 2, .. }));
        assert_eq!(plotter.expected_next(), expected_before);
        // The host retries the same line once the queue drains.
    }

    #[test]
    fn flow_on_rejected_while_paused() {
        let now = Instant::now();
        let mut plotter = homed_plotter(now);
        plotter.handle_line("N1 G1 X10 F600", now);
        // Starve the heartbeat to force a pause.
        let later = now + Duration::from_millis(3500);
        let mut replies = Vec::new();
        let mut t = now;
        while t < later + Duration::from_secs(8) {
            t += Duration::from_millis(10);
            replies.extend(plotter.tick(t));
            if plotter.state() == MachineState::Paused {
                break;
            }
        }
        assert_eq!(plotter.state(), MachineState::Paused);
        assert!(replies.contains(&Reply::Err {
            seq: None,
            code: ErrorKind::Heartbeat
        }));
        let rejected = plotter.handle_line("N2 M3 S60", t);
        assert_eq!(
            rejected,
            vec![Reply::Err {
                seq: Some(2),
                code: ErrorKind::BusyState
            }]
        );
    }

    #[test]
    fn m3_s0_keeps_the_on_flag() {
        let now = Instant::now();
        let mut plotter = homed_plotter(now);
        plotter.handle_line("N1 M3 S0", now);
        let mut t = now;
        while !plotter.is_idle(t) {
            t += Duration::from_millis(10);
            plotter.tick(t);
        }
        assert_eq!(plotter.pump_duty(), 0);
        assert!(plotter.status_report().sauce_on);
    }

    #[test]
    fn rapid_with_pump_on_forces_flow_off_first() {
        let now = Instant::now();
        let mut plotter = homed_plotter(now);
        plotter.handle_line("N1 M3 S60", now);
        plotter.handle_line("N2 G0 X20 Y20 F3000", now);
        let mut t = now;
        while !plotter.is_idle(t) {
            t += Duration::from_millis(10);
            plotter.tick(t);
            if plotter.position() != Position::new(0.0, 0.0) {
                // The moment the carriage moves, the pump must be dry.
                assert_eq!(plotter.pump_duty(), 0);
            }
        }
        assert_eq!(plotter.position(), Position::new(20.0, 20.0));
        assert!(!plotter.status_report().sauce_on);
    }

    #[test]
    fn disconnect_forces_pump_off_but_keeps_tracker() {
        let now = Instant::now();
        let mut plotter = homed_plotter(now);
        plotter.handle_line("N1 M3 S80", now);
        let mut t = now;
        while !plotter.is_idle(t) {
            t += Duration::from_millis(10);
            plotter.tick(t);
        }
        assert_eq!(plotter.pump_duty(), 80);
        plotter.on_disconnect();
        assert_eq!(plotter.pump_duty(), 0);
        assert_eq!(plotter.last_acked(), 1);
    }
}
