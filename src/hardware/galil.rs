//! Galil Controller Facade
//!
//! One [`Controller`] owns one physical command link. Every axis bound to the
//! controller sends its commands through [`Controller::command`], which holds the
//! facade's mutex for the full request/response exchange, so traffic from different
//! axes never interleaves on the wire.
//!
//! The facade favours availability over fail-fast:
//!
//! - `open` reports failure as `false` plus an error log
//! - `command` returns `None` on a link failure instead of an error
//! - `motion_complete` treats an unreadable motion status as complete
//!
//! Callers that want the underlying [`LinkError`] use the `try_*` variants.
//!
//! # Example
//!
//! ```no_run
//! use galil_sequencer::hardware::galil::Controller;
//! use galil_sequencer::hardware::protocol::AxisLetter;
//!
//! # async fn demo() {
//! let controller = Controller::new("galil0");
//! if controller.open("192.168.0.100").await {
//!     let axis: AxisLetter = "A".parse().unwrap();
//!     controller.enable_axis(axis).await;
//!     let counts = controller.report(axis, "TP").await;
//!     println!("position: {counts:?}");
//! }
//! # }
//! ```

use crate::error::LinkError;
use crate::hardware::protocol::{self, AxisLetter};
use crate::hardware::transport::{self, Address, Transport, DEFAULT_BAUD};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn, Span};

/// Poll interval and optional deadline for busy-poll waits.
///
/// No timeout is the default: a wait that never sees its condition blocks until it
/// is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Give up after this long, `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl WaitPolicy {
    /// Policy polling every `poll_interval` with no timeout.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
        }
    }

    /// Adds a deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a wait that started at `started` has run out of time.
    pub fn expired(&self, started: Instant) -> bool {
        self.timeout.is_some_and(|t| started.elapsed() >= t)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

/// How a blocking wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition was observed (or the link failed, which counts as complete).
    Complete,
    /// The interrupt flag was raised.
    Interrupted,
    /// The policy timeout elapsed first.
    TimedOut,
}

/// Engineering units to controller counts.
pub fn to_counts(value: f64, conversion_factor: f64) -> f64 {
    value * conversion_factor
}

/// Controller counts to engineering units.
pub fn from_counts(counts: f64, conversion_factor: f64) -> f64 {
    counts / conversion_factor
}

/// Serialized command facade for one controller.
pub struct Controller {
    name: String,
    link: Mutex<Option<Box<dyn Transport>>>,
    connected: AtomicBool,
    baud: u32,
    command_timeout: Duration,
    span: Span,
}

impl Controller {
    /// Creates a disconnected controller with its own root span.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = tracing::info_span!("controller", controller = %name);
        Self {
            name,
            link: Mutex::new(None),
            connected: AtomicBool::new(false),
            baud: DEFAULT_BAUD,
            command_timeout: Duration::from_secs(1),
            span,
        }
    }

    /// Nests the controller's log context under `parent`.
    pub fn with_span(mut self, parent: &Span) -> Self {
        self.span = tracing::info_span!(parent: parent, "controller", controller = %self.name);
        self
    }

    /// Baud rate used for serial addresses.
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Per-command transport timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Controller name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log context for components bound to this controller.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Whether a link is currently attached.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Opens a link to `address`; logs and returns `false` on failure.
    pub async fn open(&self, address: &str) -> bool {
        match self.try_open(address).await {
            Ok(()) => true,
            Err(e) => {
                error!(parent: &self.span, %address, error = %e, "No response from controller");
                false
            }
        }
    }

    /// Opens a link to `address`, closing any previous link first.
    pub async fn try_open(&self, address: &str) -> Result<(), LinkError> {
        let parsed = Address::parse(address)?;
        self.close().await;
        let link = transport::connect(&parsed, self.baud, self.command_timeout).await?;
        self.attach(link).await;
        Ok(())
    }

    /// Installs an already-open transport, replacing (and closing) any current one.
    pub async fn attach(&self, link: Box<dyn Transport>) {
        let description = link.describe();
        let previous = self.link.lock().await.replace(link);
        if let Some(mut previous) = previous {
            if let Err(e) = previous.close().await {
                warn!(parent: &self.span, error = %e, "Error closing previous link");
            }
        }
        self.connected.store(true, Ordering::Release);
        info!(parent: &self.span, link = %description, "Connected");
    }

    /// Closes the link. Closing a closed controller does nothing.
    pub async fn close(&self) {
        let Some(mut link) = self.link.lock().await.take() else {
            return;
        };
        self.connected.store(false, Ordering::Release);
        if let Err(e) = link.close().await {
            warn!(parent: &self.span, error = %e, "Error while closing link");
        }
        info!(parent: &self.span, "Disconnected");
    }

    /// Description of the active link, `None` when disconnected.
    pub async fn info(&self) -> Option<String> {
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(link) => Some(link.describe()),
            None => {
                error!(parent: &self.span, "No active connection");
                None
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Sends one command, holding the link for the whole exchange.
    pub async fn try_command(&self, command: &str) -> Result<String, LinkError> {
        let mut link = self.link.lock().await;
        let link = link.as_mut().ok_or(LinkError::NotConnected)?;
        let response = link.transact(command).await;
        if let Ok(response) = &response {
            debug!(parent: &self.span, cmd = %command, %response, "->");
        }
        response
    }

    /// Sends one command; a failure is logged and returned as `None`.
    pub async fn command(&self, command: &str) -> Option<String> {
        match self.try_command(command).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!(parent: &self.span, cmd = %command, error = %e, "Command failed");
                None
            }
        }
    }

    async fn send(&self, command: &str) -> bool {
        self.command(command).await.is_some()
    }

    /// Enables every servo (`SH`).
    pub async fn enable(&self) -> bool {
        self.send(protocol::SERVO_HERE).await
    }

    /// Turns every motor off (`MO`).
    pub async fn disable(&self) -> bool {
        self.send(protocol::MOTOR_OFF).await
    }

    /// Begins motion on every axis (`BG`).
    pub async fn begin(&self) -> bool {
        self.send(protocol::BEGIN).await
    }

    /// Stops every axis (`ST`).
    pub async fn stop(&self) -> bool {
        self.send(protocol::STOP).await
    }

    /// Enables one servo.
    pub async fn enable_axis(&self, axis: AxisLetter) -> bool {
        self.send(&protocol::axis_command(protocol::SERVO_HERE, axis))
            .await
    }

    /// Turns one motor off.
    pub async fn disable_axis(&self, axis: AxisLetter) -> bool {
        self.send(&protocol::axis_command(protocol::MOTOR_OFF, axis))
            .await
    }

    /// Begins motion on one axis.
    pub async fn begin_axis(&self, axis: AxisLetter) -> bool {
        self.send(&protocol::axis_command(protocol::BEGIN, axis)).await
    }

    /// Stops one axis.
    pub async fn stop_axis(&self, axis: AxisLetter) -> bool {
        self.send(&protocol::axis_command(protocol::STOP, axis)).await
    }

    /// Redefines the current position of an axis, in counts.
    pub async fn define_position(&self, axis: AxisLetter, counts: f64) -> bool {
        self.set(axis, protocol::DEFINE_POSITION, counts).await
    }

    /// Reads `MN{axis}=?` as a number.
    pub async fn try_get(&self, axis: AxisLetter, mnemonic: &str) -> Result<f64, LinkError> {
        let command = protocol::read(mnemonic, axis);
        let response = self.try_command(&command).await?;
        protocol::parse_number(&command, &response)
    }

    /// Reads a raw value; `None` on failure.
    pub async fn get(&self, axis: AxisLetter, mnemonic: &str) -> Option<f64> {
        match self.try_get(axis, mnemonic).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(parent: &self.span, %axis, mnemonic, error = %e, "Read failed");
                None
            }
        }
    }

    /// Reads a telemetry report (`TPA`, `TTA`, ...), which takes no `=?` suffix.
    pub async fn try_report(&self, axis: AxisLetter, mnemonic: &str) -> Result<f64, LinkError> {
        let command = protocol::axis_command(mnemonic, axis);
        let response = self.try_command(&command).await?;
        protocol::parse_number(&command, &response)
    }

    /// Telemetry report; `None` on failure.
    pub async fn report(&self, axis: AxisLetter, mnemonic: &str) -> Option<f64> {
        match self.try_report(axis, mnemonic).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(parent: &self.span, %axis, mnemonic, error = %e, "Telemetry read failed");
                None
            }
        }
    }

    /// Writes `MN{axis}=value`.
    pub async fn try_set(
        &self,
        axis: AxisLetter,
        mnemonic: &str,
        value: f64,
    ) -> Result<(), LinkError> {
        self.try_command(&protocol::write(mnemonic, axis, value))
            .await
            .map(|_| ())
    }

    /// Writes a raw value; `false` on failure.
    pub async fn set(&self, axis: AxisLetter, mnemonic: &str, value: f64) -> bool {
        match self.try_set(axis, mnemonic, value).await {
            Ok(()) => true,
            Err(e) => {
                error!(parent: &self.span, %axis, mnemonic, value, error = %e, "Write failed");
                false
            }
        }
    }

    /// Reads a value and converts counts to engineering units.
    pub async fn get_scaled(
        &self,
        axis: AxisLetter,
        mnemonic: &str,
        conversion_factor: f64,
    ) -> Option<f64> {
        self.get(axis, mnemonic)
            .await
            .map(|counts| from_counts(counts, conversion_factor))
    }

    /// Converts engineering units to counts and writes them.
    pub async fn set_scaled(
        &self,
        axis: AxisLetter,
        mnemonic: &str,
        value: f64,
        conversion_factor: f64,
    ) -> bool {
        self.set(axis, mnemonic, to_counts(value, conversion_factor))
            .await
    }

    // =========================================================================
    // Blocking waits
    // =========================================================================

    /// Polls until the axis profiler reports motion complete.
    ///
    /// The link is released between polls so other axes keep their access. A failed
    /// status read ends the wait as [`WaitOutcome::Complete`]. The `interrupt` flag is
    /// checked after every poll.
    pub async fn motion_complete(
        &self,
        axis: AxisLetter,
        policy: &WaitPolicy,
        interrupt: &AtomicBool,
    ) -> WaitOutcome {
        let query = protocol::motion_status(axis);
        let started = Instant::now();
        loop {
            let status = self
                .try_command(&query)
                .await
                .and_then(|response| protocol::parse_number(&query, &response));
            match status {
                Ok(running) if running == 0.0 => return WaitOutcome::Complete,
                Ok(_) => {}
                Err(e) => {
                    warn!(parent: &self.span, %axis, error = %e, "Motion status unavailable, treating as complete");
                    return WaitOutcome::Complete;
                }
            }
            if interrupt.load(Ordering::Acquire) {
                return WaitOutcome::Interrupted;
            }
            if policy.expired(started) {
                warn!(parent: &self.span, %axis, "Timed out waiting for motion complete");
                return WaitOutcome::TimedOut;
            }
            sleep(policy.poll_interval).await;
        }
    }

    /// Blocks until the axis stops moving, with the default policy and no interrupt.
    pub async fn wait(&self, axis: AxisLetter) -> WaitOutcome {
        self.motion_complete(axis, &WaitPolicy::default(), &AtomicBool::new(false))
            .await
    }

    // =========================================================================
    // System and IO
    // =========================================================================

    /// Burns controller parameters to flash (`BN`).
    pub async fn burn_parameters(&self) -> bool {
        self.send(protocol::BURN_PARAMETERS).await
    }

    /// Burns the stored program to flash (`BP`).
    pub async fn burn_program(&self) -> bool {
        self.send(protocol::BURN_PROGRAM).await
    }

    async fn read_bit(&self, command: &str) -> Option<bool> {
        let response = self.command(command).await?;
        match protocol::parse_number(command, &response) {
            Ok(value) => Some(value != 0.0),
            Err(e) => {
                error!(parent: &self.span, cmd = %command, error = %e, "Bad IO response");
                None
            }
        }
    }

    /// Digital input state.
    pub async fn get_input(&self, channel: u8) -> Option<bool> {
        self.read_bit(&protocol::input(channel)).await
    }

    /// Digital output state.
    pub async fn get_output(&self, channel: u8) -> Option<bool> {
        self.read_bit(&protocol::output(channel)).await
    }

    /// Sets or clears a digital output.
    pub async fn set_output(&self, channel: u8, on: bool) -> bool {
        self.send(&protocol::set_output(channel, on)).await
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("connected", &self.connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedController;
    use tracing_test::traced_test;

    fn axis(c: char) -> AxisLetter {
        AxisLetter::new(c).unwrap()
    }

    #[tokio::test]
    async fn disconnected_commands_return_sentinels() {
        let controller = Controller::new("idle");
        assert!(!controller.connected());
        assert_eq!(controller.command("SH").await, None);
        assert!(!controller.enable().await);
        assert_eq!(controller.get(axis('A'), "TP").await, None);
        assert!(matches!(
            controller.try_command("SH").await,
            Err(LinkError::NotConnected)
        ));
        assert_eq!(controller.info().await, None);
    }

    #[tokio::test]
    async fn open_rejects_bad_addresses_and_accepts_sim() {
        let controller = Controller::new("galil0");
        assert!(!controller.open("").await);
        assert!(!controller.connected());
        assert!(controller.open("sim").await);
        assert!(controller.connected());
        assert_eq!(controller.info().await.as_deref(), Some("sim://galil"));

        // Reopening replaces the link.
        assert!(controller.open("sim").await);
        assert!(controller.connected());

        controller.close().await;
        controller.close().await;
        assert!(!controller.connected());
    }

    #[tokio::test]
    async fn scaled_values_round_trip() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Controller::new("galil0");
        controller.attach(Box::new(sim)).await;

        for factor in [1.0, 3200.0, 0.25, 12.7] {
            assert!(controller.set_scaled(axis('B'), "SP", 1.5, factor).await);
            let back = controller.get_scaled(axis('B'), "SP", factor).await.unwrap();
            assert!((back - 1.5).abs() < 1e-3, "factor {factor}: {back}");
        }
        assert_eq!(handle.commands()[0], "SPB=1.5");
        assert_eq!(handle.commands()[1], "SPB=?");
        assert_eq!(handle.commands()[2], "SPB=4800");
    }

    #[tokio::test]
    async fn motion_complete_fails_open() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Controller::new("galil0");
        controller.attach(Box::new(sim)).await;
        handle.set_offline(true);
        assert_eq!(controller.wait(axis('A')).await, WaitOutcome::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn motion_complete_observes_interrupt_and_timeout() {
        let sim = SimulatedController::new();
        let controller = Controller::new("galil0");
        controller.attach(Box::new(sim)).await;
        let a = axis('A');
        controller.enable_axis(a).await;
        controller.set(a, "JG", 1000.0).await;
        assert!(controller.begin_axis(a).await);

        let interrupt = AtomicBool::new(true);
        let outcome = controller
            .motion_complete(a, &WaitPolicy::default(), &interrupt)
            .await;
        assert_eq!(outcome, WaitOutcome::Interrupted);

        let policy = WaitPolicy::default().with_timeout(Some(Duration::from_millis(100)));
        let outcome = controller
            .motion_complete(a, &policy, &AtomicBool::new(false))
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);

        controller.stop_axis(a).await;
        assert_eq!(controller.wait(a).await, WaitOutcome::Complete);
    }

    #[tokio::test]
    async fn io_and_burn() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Controller::new("galil0");
        controller.attach(Box::new(sim)).await;

        handle.set_input(1, true);
        assert_eq!(controller.get_input(1).await, Some(true));
        assert_eq!(controller.get_input(2).await, Some(false));
        assert!(controller.set_output(4, true).await);
        assert_eq!(controller.get_output(4).await, Some(true));
        assert!(controller.burn_parameters().await);
        assert!(controller.burn_program().await);
        assert_eq!(handle.burn_count(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn failures_are_logged_with_the_command() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Controller::new("galil0");
        controller.attach(Box::new(sim)).await;

        handle.fail_next(1);
        assert_eq!(controller.get(axis('C'), "SP").await, None);
        assert!(logs_contain("Read failed"));
        assert!(logs_contain("SPC=?"));

        handle.fail_next(1);
        assert!(!controller.set(axis('C'), "SP", 25.0).await);
        assert!(logs_contain("Write failed"));
        assert!(logs_contain("SPC=25"));

        assert!(!controller.begin_axis(axis('C')).await);
        assert!(logs_contain("Command failed"));
        assert!(logs_contain("rejected"));
    }

    #[tokio::test]
    async fn try_set_reports_the_link_error() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Controller::new("galil0");
        controller.attach(Box::new(sim)).await;

        assert!(controller.try_set(axis('D'), "AC", 2048.0).await.is_ok());
        assert_eq!(controller.get(axis('D'), "AC").await, Some(2048.0));

        handle.set_offline(true);
        assert!(controller.try_set(axis('D'), "AC", 1.0).await.is_err());
        controller.close().await;
        assert!(matches!(
            controller.try_set(axis('D'), "AC", 1.0).await,
            Err(LinkError::NotConnected)
        ));
    }
}
