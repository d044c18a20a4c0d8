//! Simulated Galil Controller
//!
//! An in-process model of a multi-axis controller that speaks the same opcode
//! contract as the hardware, so the facade, axis workers and program executor can be
//! exercised without a physical link.
//!
//! # Model
//!
//! - Up to eight axes (A-H), each with a servo flag, a position in counts and a
//!   motion mode (idle, jogging, positioning).
//! - Motion is evaluated lazily from `tokio::time::Instant`, so tests running with a
//!   paused clock advance motion deterministically.
//! - Each axis travels between two hard stops. Jogging into a stop pins the axis there
//!   and reports `TT` equal to the torque limit, which is what torque-triggered
//!   homing looks for.
//! - `BG` is rejected (`?`) when the servo is off or the axis is already in motion.
//! - `JG` writes while jogging change speed on the fly.
//!
//! A [`SimHandle`] shares the state with the test, exposing the command log and knobs
//! for travel limits, inputs and link failures.

use crate::error::LinkError;
use crate::hardware::protocol::{self, AxisLetter};
use crate::hardware::transport::Transport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

const AXIS_COUNT: usize = 8;
const DIGITAL_CHANNELS: usize = 16;
const DEFAULT_TORQUE_LIMIT: f64 = 9.9982;
const DEFAULT_TRAVEL: f64 = 1.0e9;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Jog,
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Idle,
    Jogging { speed: f64 },
    Positioning { target: f64, speed: f64 },
}

#[derive(Debug, Clone)]
struct SimAxis {
    servo: bool,
    position: f64,
    motion: Motion,
    since: Instant,
    lower_stop: f64,
    upper_stop: f64,
    pending: Pending,
    jog: f64,
    speed: f64,
    relative: f64,
    absolute: f64,
    torque_limit: f64,
    params: HashMap<String, f64>,
}

impl SimAxis {
    fn new(now: Instant) -> Self {
        Self {
            servo: false,
            position: 0.0,
            motion: Motion::Idle,
            since: now,
            lower_stop: -DEFAULT_TRAVEL,
            upper_stop: DEFAULT_TRAVEL,
            pending: Pending::Relative,
            jog: 0.0,
            speed: 25_000.0,
            relative: 0.0,
            absolute: 0.0,
            torque_limit: DEFAULT_TORQUE_LIMIT,
            params: HashMap::new(),
        }
    }

    /// Folds elapsed motion into `position` and re-anchors at `now`.
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.since).as_secs_f64();
        self.since = now;
        match self.motion {
            Motion::Idle => {}
            Motion::Jogging { speed } => {
                self.position =
                    (self.position + speed * dt).clamp(self.lower_stop, self.upper_stop);
            }
            Motion::Positioning { target, speed } => {
                let remaining = target - self.position;
                let step = speed * dt;
                if speed <= 0.0 || step >= remaining.abs() {
                    self.position = target;
                    self.motion = Motion::Idle;
                } else {
                    self.position += step * remaining.signum();
                }
            }
        }
    }

    fn at_stop(&self, direction: f64) -> bool {
        (direction < 0.0 && self.position <= self.lower_stop)
            || (direction > 0.0 && self.position >= self.upper_stop)
    }

    fn moving(&self) -> bool {
        !matches!(self.motion, Motion::Idle)
    }

    fn velocity(&self) -> f64 {
        match self.motion {
            Motion::Idle => 0.0,
            Motion::Jogging { speed } if self.at_stop(speed) => 0.0,
            Motion::Jogging { speed } => speed,
            Motion::Positioning { target, speed } => speed * (target - self.position).signum(),
        }
    }

    fn torque(&self) -> f64 {
        match self.motion {
            Motion::Jogging { speed } if self.at_stop(speed) => {
                self.torque_limit * speed.signum()
            }
            _ => 0.0,
        }
    }

    fn begin(&mut self) -> bool {
        if !self.servo || self.moving() {
            return false;
        }
        self.motion = match self.pending {
            Pending::Jog => Motion::Jogging { speed: self.jog },
            Pending::Relative => Motion::Positioning {
                target: (self.position + self.relative).clamp(self.lower_stop, self.upper_stop),
                speed: self.speed.abs(),
            },
            Pending::Absolute => Motion::Positioning {
                target: self.absolute.clamp(self.lower_stop, self.upper_stop),
                speed: self.speed.abs(),
            },
        };
        true
    }

    fn halt(&mut self) {
        self.motion = Motion::Idle;
    }
}

#[derive(Debug)]
struct SimState {
    axes: Vec<SimAxis>,
    inputs: [bool; DIGITAL_CHANNELS],
    outputs: [bool; DIGITAL_CHANNELS],
    log: Vec<String>,
    offline: bool,
    fail_next: usize,
    latency: Duration,
    burned: usize,
}

impl SimState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            axes: (0..AXIS_COUNT).map(|_| SimAxis::new(now)).collect(),
            inputs: [false; DIGITAL_CHANNELS],
            outputs: [false; DIGITAL_CHANNELS],
            log: Vec::new(),
            offline: false,
            fail_next: 0,
            latency: Duration::ZERO,
            burned: 0,
        }
    }

    fn axis(&mut self, letter: AxisLetter, now: Instant) -> &mut SimAxis {
        let axis = &mut self.axes[letter.index()];
        axis.advance(now);
        axis
    }

    fn all(&mut self, now: Instant) -> impl Iterator<Item = &mut SimAxis> + '_ {
        self.axes.iter_mut().map(move |a| {
            a.advance(now);
            a
        })
    }

    fn execute(&mut self, command: &str, now: Instant) -> Result<String, LinkError> {
        let rejected = || LinkError::Rejected {
            command: command.to_string(),
        };
        let cmd = command.trim();

        match cmd {
            "" => return Ok(String::new()),
            "SH" => self.all(now).for_each(|a| a.servo = true),
            "MO" => self.all(now).for_each(|a| {
                a.halt();
                a.servo = false;
            }),
            "ST" => self.all(now).for_each(SimAxis::halt),
            "BG" => {
                let mut ok = true;
                for axis in self.all(now) {
                    if axis.servo {
                        ok &= axis.begin();
                    }
                }
                if !ok {
                    return Err(rejected());
                }
            }
            "BN" | "BP" => self.burned += 1,
            _ => return self.execute_addressed(cmd, now).ok_or_else(rejected),
        }
        Ok(String::new())
    }

    fn execute_addressed(&mut self, cmd: &str, now: Instant) -> Option<String> {
        if let Some(rest) = cmd.strip_prefix("MG") {
            return self.message(rest.trim(), now);
        }
        if let Some(n) = cmd.strip_prefix("SB").and_then(|n| n.parse::<usize>().ok()) {
            *self.outputs.get_mut(n)? = true;
            return Some(String::new());
        }
        if let Some(n) = cmd.strip_prefix("CB").and_then(|n| n.parse::<usize>().ok()) {
            *self.outputs.get_mut(n)? = false;
            return Some(String::new());
        }

        let mnemonic = cmd.get(..2)?;
        let mut rest = cmd[2..].chars();
        let letter = AxisLetter::new(rest.next()?).ok()?;
        let suffix = rest.as_str();
        let axis = self.axis(letter, now);

        match suffix {
            "" => axis_action(axis, mnemonic),
            "=?" => axis_read(axis, mnemonic).map(protocol::format_value),
            _ => {
                let value = suffix.strip_prefix('=')?.trim().parse::<f64>().ok()?;
                axis_write(axis, mnemonic, value)
            }
        }
    }

    fn message(&mut self, expr: &str, now: Instant) -> Option<String> {
        if let Some(letter) = expr.strip_prefix("_BG") {
            let axis = self.axis(letter.parse().ok()?, now);
            return Some(if axis.moving() { "1" } else { "0" }.to_string());
        }
        let bit = |expr: &str, prefix: &str| -> Option<usize> {
            expr.strip_prefix(prefix)?
                .strip_suffix(']')?
                .parse::<usize>()
                .ok()
                .filter(|n| *n < DIGITAL_CHANNELS)
        };
        if let Some(n) = bit(expr, "@IN[") {
            return Some(if self.inputs[n] { "1" } else { "0" }.to_string());
        }
        if let Some(n) = bit(expr, "@OUT[") {
            return Some(if self.outputs[n] { "1" } else { "0" }.to_string());
        }
        None
    }
}

fn axis_action(axis: &mut SimAxis, mnemonic: &str) -> Option<String> {
    match mnemonic {
        "SH" => axis.servo = true,
        "MO" => {
            axis.halt();
            axis.servo = false;
        }
        "ST" => axis.halt(),
        "BG" => {
            if !axis.begin() {
                return None;
            }
        }
        // Bare telemetry form (`TPA`) answers like the `=?` query.
        "TP" | "TV" | "TT" | "TE" => return axis_read(axis, mnemonic).map(protocol::format_value),
        _ => return None,
    }
    Some(String::new())
}

fn axis_read(axis: &SimAxis, mnemonic: &str) -> Option<f64> {
    Some(match mnemonic {
        "TP" => axis.position,
        "TV" => axis.velocity(),
        "TT" => axis.torque(),
        "TE" => 0.0,
        "JG" => axis.jog,
        "SP" => axis.speed,
        "PR" => axis.relative,
        "PA" => axis.absolute,
        "TL" => axis.torque_limit,
        "MC" | "AM" => {
            if axis.moving() {
                0.0
            } else {
                1.0
            }
        }
        "AC" | "DC" | "IP" | "BR" | "IT" | "KP" | "KI" | "KD" | "OF" | "IL" => {
            axis.params.get(mnemonic).copied().unwrap_or(0.0)
        }
        _ => return None,
    })
}

fn axis_write(axis: &mut SimAxis, mnemonic: &str, value: f64) -> Option<String> {
    match mnemonic {
        "JG" => {
            axis.jog = value;
            axis.pending = Pending::Jog;
            if let Motion::Jogging { .. } = axis.motion {
                axis.motion = Motion::Jogging { speed: value };
            }
        }
        "SP" => axis.speed = value,
        "PR" => {
            axis.relative = value;
            axis.pending = Pending::Relative;
        }
        "PA" => {
            axis.absolute = value;
            axis.pending = Pending::Absolute;
        }
        "DP" => {
            if axis.moving() {
                return None;
            }
            let shift = axis.position - value;
            axis.position = value;
            axis.lower_stop -= shift;
            axis.upper_stop -= shift;
        }
        "TL" => axis.torque_limit = value,
        "AC" | "DC" | "IP" | "BR" | "IT" | "KP" | "KI" | "KD" | "OF" | "IL" => {
            axis.params.insert(mnemonic.to_string(), value);
        }
        _ => return None,
    }
    Some(String::new())
}

// =============================================================================
// Transport + handle
// =============================================================================

/// In-process controller implementing [`Transport`].
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedController {
    /// A controller with every axis idle at position 0 and servos off.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Handle for inspecting and steering the simulation from tests.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for SimulatedController {
    async fn transact(&mut self, command: &str) -> Result<String, LinkError> {
        let latency = {
            let mut state = lock(&self.state);
            if state.offline {
                return Err(LinkError::Io(std::io::ErrorKind::NotConnected.into()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(LinkError::Timeout(command.to_string()));
            }
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = lock(&self.state);
        state.log.push(command.to_string());
        state.execute(command, Instant::now())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "sim://galil".to_string()
    }
}

/// Shared view of a [`SimulatedController`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).log.clone()
    }

    /// Commands received so far that start with `prefix`.
    pub fn commands_matching(&self, prefix: &str) -> Vec<String> {
        lock(&self.state)
            .log
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Commands addressed to one axis (e.g. `JGA=10`, `BGA`, `MG _BGA`).
    pub fn commands_for(&self, axis: AxisLetter) -> Vec<String> {
        let letter = axis.as_char();
        lock(&self.state)
            .log
            .iter()
            .filter(|c| {
                let c = c.strip_prefix("MG _").unwrap_or(c);
                c.len() >= 3 && c[2..].starts_with(letter)
            })
            .cloned()
            .collect()
    }

    /// Clears the command log.
    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    /// Position of an axis in counts.
    pub fn position(&self, axis: AxisLetter) -> f64 {
        lock(&self.state).axis(axis, Instant::now()).position
    }

    /// Whether the axis profiler is running.
    pub fn is_moving(&self, axis: AxisLetter) -> bool {
        lock(&self.state).axis(axis, Instant::now()).moving()
    }

    /// Whether the servo of an axis is on.
    pub fn servo(&self, axis: AxisLetter) -> bool {
        lock(&self.state).axes[axis.index()].servo
    }

    /// Places the hard stops of an axis, in counts relative to the current origin.
    pub fn set_travel(&self, axis: AxisLetter, lower: f64, upper: f64) {
        let mut state = lock(&self.state);
        let axis = state.axis(axis, Instant::now());
        axis.lower_stop = lower;
        axis.upper_stop = upper;
        axis.position = axis.position.clamp(lower, upper);
    }

    /// Drives a digital input.
    pub fn set_input(&self, channel: usize, on: bool) {
        if let Some(slot) = lock(&self.state).inputs.get_mut(channel) {
            *slot = on;
        }
    }

    /// Simulates a dropped link: every command fails until cleared.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// The next `count` commands time out.
    pub fn fail_next(&self, count: usize) {
        lock(&self.state).fail_next = count;
    }

    /// Adds a fixed round-trip delay to every command.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// Number of `BN`/`BP` commands received.
    pub fn burn_count(&self) -> usize {
        lock(&self.state).burned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a() -> AxisLetter {
        AxisLetter::new('A').unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn relative_move_completes_after_travel_time() {
        let mut sim = SimulatedController::new();
        let handle = sim.handle();
        sim.transact("SHA").await.unwrap();
        sim.transact("SPA=1000").await.unwrap();
        sim.transact("PRA=500").await.unwrap();
        sim.transact("BGA").await.unwrap();
        assert_eq!(sim.transact("MG _BGA").await.unwrap(), "1");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sim.transact("MG _BGA").await.unwrap(), "0");
        assert_eq!(handle.position(a()), 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn jog_into_stop_reports_torque() {
        let mut sim = SimulatedController::new();
        let handle = sim.handle();
        handle.set_travel(a(), -100.0, 100.0);
        sim.transact("SHA").await.unwrap();
        sim.transact("JGA=-1000").await.unwrap();
        sim.transact("BGA").await.unwrap();
        assert_eq!(sim.transact("TTA=?").await.unwrap(), "0");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let torque: f64 = sim.transact("TTA=?").await.unwrap().parse().unwrap();
        assert!(torque < -9.0);
        assert_eq!(handle.position(a()), -100.0);

        sim.transact("STA").await.unwrap();
        sim.transact("DPA=0").await.unwrap();
        assert_eq!(sim.transact("TPA").await.unwrap(), "0");
    }

    #[tokio::test]
    async fn begin_requires_servo_and_rejects_unknown() {
        let mut sim = SimulatedController::new();
        assert!(matches!(
            sim.transact("BGA").await,
            Err(LinkError::Rejected { .. })
        ));
        assert!(sim.transact("XYZ").await.is_err());
        assert!(sim.transact("TPA=5").await.is_err());
    }

    #[tokio::test]
    async fn io_and_burn_commands() {
        let mut sim = SimulatedController::new();
        let handle = sim.handle();
        handle.set_input(3, true);
        assert_eq!(sim.transact("MG@IN[3]").await.unwrap(), "1");
        sim.transact("SB2").await.unwrap();
        assert_eq!(sim.transact("MG@OUT[2]").await.unwrap(), "1");
        sim.transact("CB2").await.unwrap();
        assert_eq!(sim.transact("MG@OUT[2]").await.unwrap(), "0");
        sim.transact("BN").await.unwrap();
        assert_eq!(handle.burn_count(), 1);
        assert_eq!(handle.commands().len(), 6);
    }

    #[tokio::test]
    async fn offline_and_injected_failures() {
        let mut sim = SimulatedController::new();
        let handle = sim.handle();
        handle.fail_next(1);
        assert!(matches!(
            sim.transact("SHA").await,
            Err(LinkError::Timeout(_))
        ));
        assert!(sim.transact("SHA").await.is_ok());
        handle.set_offline(true);
        assert!(matches!(sim.transact("SHA").await, Err(LinkError::Io(_))));
    }
}
