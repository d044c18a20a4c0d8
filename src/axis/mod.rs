//! Axes and their task queues.
//!
//! An [`Axis`] is one actuator channel bound to a [`Controller`] and an axis letter.
//! Each axis owns a FIFO of [`Task`]s and a single long-lived worker that executes
//! them one at a time against the controller. Any number of callers (the program
//! executor, manual controls, the CLI) may enqueue concurrently; the queue is the
//! only path to the hardware, so commands for one axis never race each other.
//!
//! # Shared state
//!
//! `homed`, `limit` and `conversion_factor` are atomics. The worker is the writer
//! during normal operation (homing results arrive as `Set` tasks), external readers
//! take an [`AxisSnapshot`].
//!
//! # Cancellation
//!
//! [`Axis::cancel`] swaps the whole queue for `[Stop, WaitForComplete, Disable]` and
//! raises an interrupt flag that aborts a blocking wait in progress within one poll.

mod property;
mod routines;
mod task;
mod worker;

pub use property::Property;
pub use routines::MAX_PING_PONG_REPEATS;
pub use task::{Call, CallWith, Task, Value};

use crate::error::TaskError;
use crate::hardware::galil::{self, Controller, WaitPolicy};
use crate::hardware::protocol::AxisLetter;
use crate::validation;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, Instrument, Span};

/// Scheduling intervals for an axis worker and its blocking waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisTiming {
    /// Sleep after each executed task.
    pub quantum: Duration,
    /// Sleep while the queue is empty.
    pub idle: Duration,
    /// Motion-complete polling.
    pub motion: WaitPolicy,
    /// Torque predicate polling.
    pub torque: WaitPolicy,
}

impl Default for AxisTiming {
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(10),
            idle: Duration::from_millis(10),
            motion: WaitPolicy::new(Duration::from_millis(20)),
            torque: WaitPolicy::new(Duration::from_millis(100)),
        }
    }
}

/// Point-in-time view of an axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisSnapshot {
    /// Axis name.
    pub name: String,
    /// Controller channel.
    pub letter: AxisLetter,
    /// Counts per engineering unit.
    pub conversion_factor: f64,
    /// Travel measured by homing.
    pub limit: f64,
    /// Whether homing has completed.
    pub homed: bool,
    /// Tasks waiting in the queue.
    pub pending: usize,
    /// Whether the worker is executing a task.
    pub busy: bool,
}

/// Telemetry in engineering units (torque is raw). `None` marks a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Telemetry {
    /// `TP`
    pub position: Option<f64>,
    /// `TV`
    pub velocity: Option<f64>,
    /// `TT`
    pub torque: Option<f64>,
    /// `TE`
    pub error: Option<f64>,
}

#[derive(Debug, Default)]
struct Queue {
    tasks: VecDeque<Task>,
    busy: bool,
}

/// An f64 stored as bits in an `AtomicU64`.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// State shared between an [`Axis`] and its worker.
pub(crate) struct Shared {
    name: String,
    letter: AxisLetter,
    controller: Arc<Controller>,
    conversion_factor: AtomicF64,
    limit: AtomicF64,
    homed: AtomicBool,
    interrupt: AtomicBool,
    shutdown: AtomicBool,
    queue: Mutex<Queue>,
    timing: AxisTiming,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pops the head task, marking the worker busy and clearing a stale interrupt.
    fn pop(&self) -> Option<Task> {
        let mut queue = self.queue();
        let task = queue.tasks.pop_front();
        if task.is_some() {
            queue.busy = true;
            self.interrupt.store(false, Ordering::Release);
        }
        task
    }

    fn finish(&self) {
        self.queue().busy = false;
    }

    fn factor(&self) -> f64 {
        self.conversion_factor.load()
    }

    /// Reads a property in engineering units (`homed` reads as 1 or 0).
    async fn read(&self, property: Property) -> Result<f64, TaskError> {
        let value = match property {
            Property::Limit => Some(self.limit.load()),
            Property::Homed => Some(if self.homed.load(Ordering::Acquire) { 1.0 } else { 0.0 }),
            Property::ConversionFactor => Some(self.factor()),
            p => {
                let Some(mnemonic) = p.mnemonic() else {
                    return Err(TaskError::ReadFailed(p.name()));
                };
                let raw = if p.is_telemetry() {
                    self.controller.report(self.letter, mnemonic).await
                } else {
                    self.controller.get(self.letter, mnemonic).await
                };
                raw.map(|counts| {
                    if p.is_scaled() {
                        galil::from_counts(counts, self.factor())
                    } else {
                        counts
                    }
                })
            }
        };
        value.ok_or(TaskError::ReadFailed(property.name()))
    }

    /// Writes a property in engineering units.
    async fn write(&self, property: Property, value: f64) -> Result<(), TaskError> {
        if property.is_read_only() {
            return Err(TaskError::ReadOnly(property.name()));
        }
        let invalid = || TaskError::InvalidValue {
            property: property.name(),
            value,
        };
        validation::is_finite(value).map_err(|_| invalid())?;
        match property {
            Property::Limit => self.limit.store(value),
            Property::Homed => self.homed.store(value != 0.0, Ordering::Release),
            Property::ConversionFactor => {
                validation::is_positive_factor(value).map_err(|_| invalid())?;
                self.conversion_factor.store(value);
            }
            p => {
                let Some(mnemonic) = p.mnemonic() else {
                    return Err(invalid());
                };
                let ok = if p.is_scaled() {
                    self.controller
                        .set_scaled(self.letter, mnemonic, value, self.factor())
                        .await
                } else {
                    self.controller.set(self.letter, mnemonic, value).await
                };
                if !ok {
                    return Err(TaskError::Command(format!("{mnemonic}{}", self.letter)));
                }
            }
        }
        Ok(())
    }
}

/// A named actuator channel with its own task queue and worker.
pub struct Axis {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl Axis {
    /// Starts building an axis bound to `controller` on channel `letter`.
    pub fn builder(
        name: impl Into<String>,
        letter: AxisLetter,
        controller: Arc<Controller>,
    ) -> AxisBuilder {
        AxisBuilder {
            name: name.into(),
            letter,
            controller,
            conversion_factor: 1.0,
            timing: AxisTiming::default(),
        }
    }

    /// Axis name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Controller channel.
    pub fn letter(&self) -> AxisLetter {
        self.shared.letter
    }

    /// The controller this axis sends commands through.
    pub fn controller(&self) -> &Arc<Controller> {
        &self.shared.controller
    }

    /// Log context of this axis.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Counts per engineering unit.
    pub fn conversion_factor(&self) -> f64 {
        self.shared.factor()
    }

    /// Replaces the conversion factor (configuration edit). Non-positive values are refused.
    pub fn set_conversion_factor(&self, factor: f64) -> bool {
        if validation::is_positive_factor(factor).is_err() {
            return false;
        }
        self.shared.conversion_factor.store(factor);
        true
    }

    /// Whether homing has completed.
    pub fn homed(&self) -> bool {
        self.shared.homed.load(Ordering::Acquire)
    }

    /// Travel measured by homing.
    pub fn limit(&self) -> f64 {
        self.shared.limit.load()
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Appends a task to the tail of the queue.
    pub fn enqueue(&self, task: Task) {
        self.shared.queue().tasks.push_back(task);
    }

    /// Appends tasks contiguously; no other caller's task lands between them.
    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = Task>) {
        self.shared.queue().tasks.extend(tasks);
    }

    /// Discards everything queued and substitutes `[Stop, WaitForComplete, Disable]`.
    pub fn cancel(&self) {
        let discarded = {
            let mut queue = self.shared.queue();
            let discarded = queue.tasks.len();
            queue.tasks.clear();
            queue.tasks.extend(Task::cancel_sequence());
            self.shared.interrupt.store(true, Ordering::Release);
            discarded
        };
        info!(parent: &self.span, discarded, "Cancelled");
    }

    /// Queue empty and no task executing.
    pub fn is_idle(&self) -> bool {
        let queue = self.shared.queue();
        queue.tasks.is_empty() && !queue.busy
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.shared.queue().tasks.len()
    }

    /// Copy of the queued tasks, head first.
    pub fn queued(&self) -> Vec<Task> {
        self.shared.queue().tasks.iter().copied().collect()
    }

    /// Point-in-time view of the axis.
    pub fn snapshot(&self) -> AxisSnapshot {
        let (pending, busy) = {
            let queue = self.shared.queue();
            (queue.tasks.len(), queue.busy)
        };
        AxisSnapshot {
            name: self.shared.name.clone(),
            letter: self.shared.letter,
            conversion_factor: self.shared.factor(),
            limit: self.shared.limit.load(),
            homed: self.shared.homed.load(Ordering::Acquire),
            pending,
            busy,
        }
    }

    // =========================================================================
    // Direct access
    // =========================================================================

    /// Reads a property now, outside the queue. `None` on a failed read.
    pub async fn get(&self, property: Property) -> Option<f64> {
        self.shared.read(property).await.ok()
    }

    /// Writes a property now, outside the queue.
    pub async fn set(&self, property: Property, value: f64) -> Result<(), TaskError> {
        self.shared.write(property, value).await
    }

    /// Reads position, velocity, torque and following error.
    pub async fn telemetry(&self) -> Telemetry {
        Telemetry {
            position: self.get(Property::Position).await,
            velocity: self.get(Property::Velocity).await,
            torque: self.get(Property::Torque).await,
            error: self.get(Property::Error).await,
        }
    }

    /// Stops the worker after its current task. Queued tasks are dropped.
    pub async fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.interrupt.store(true, Ordering::Release);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Axis {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Axis")
            .field("name", &self.shared.name)
            .field("letter", &self.shared.letter)
            .finish()
    }
}

/// Builder for [`Axis`].
pub struct AxisBuilder {
    name: String,
    letter: AxisLetter,
    controller: Arc<Controller>,
    conversion_factor: f64,
    timing: AxisTiming,
}

impl AxisBuilder {
    /// Counts per engineering unit. Default: 1.0
    pub fn conversion_factor(mut self, factor: f64) -> Self {
        self.conversion_factor = factor;
        self
    }

    /// Worker and wait intervals.
    pub fn timing(mut self, timing: AxisTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Creates the axis and spawns its worker on the current tokio runtime.
    pub fn spawn(self) -> Arc<Axis> {
        let span = tracing::info_span!(
            parent: self.controller.span(),
            "axis",
            axis = %self.name,
            letter = %self.letter
        );
        let factor = if validation::is_positive_factor(self.conversion_factor).is_ok() {
            self.conversion_factor
        } else {
            1.0
        };
        let shared = Arc::new(Shared {
            name: self.name,
            letter: self.letter,
            controller: self.controller,
            conversion_factor: AtomicF64::new(factor),
            limit: AtomicF64::new(0.0),
            homed: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            queue: Mutex::new(Queue::default()),
            timing: self.timing,
        });
        let handle = tokio::spawn(worker::run(Arc::clone(&shared)).instrument(span.clone()));
        Arc::new(Axis {
            shared,
            worker: Mutex::new(Some(handle)),
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{SimHandle, SimulatedController};

    async fn axis_on_sim(factor: f64) -> (Arc<Axis>, SimHandle) {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Arc::new(Controller::new("galil0"));
        controller.attach(Box::new(sim)).await;
        let axis = Axis::builder("Vane", AxisLetter::new('B').unwrap(), controller)
            .conversion_factor(factor)
            .spawn();
        (axis, handle)
    }

    #[tokio::test]
    async fn property_round_trip_through_conversion() {
        for factor in [1.0, 3200.0, 0.5, 7.3] {
            let (axis, _) = axis_on_sim(factor).await;
            for property in [Property::Speed, Property::Jog, Property::PositionRelative] {
                axis.set(property, 12.34).await.unwrap();
                let back = axis.get(property).await.unwrap();
                assert!((back - 12.34).abs() < 1e-3, "{property} x{factor}: {back}");
            }
            axis.shutdown().await;
        }
    }

    #[tokio::test]
    async fn local_properties_and_read_only_rules() {
        let (axis, handle) = axis_on_sim(100.0).await;
        axis.set(Property::Limit, 42.0).await.unwrap();
        axis.set(Property::Homed, 1.0).await.unwrap();
        assert_eq!(axis.limit(), 42.0);
        assert!(axis.homed());
        assert!(handle.commands().is_empty());

        assert_eq!(
            axis.set(Property::Position, 1.0).await,
            Err(TaskError::ReadOnly("position"))
        );
        assert!(axis.set(Property::ConversionFactor, 0.0).await.is_err());
        assert!(!axis.set_conversion_factor(-2.0));
        assert_eq!(axis.conversion_factor(), 100.0);
        axis.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_replaces_queue_contents() {
        let (axis, _) = axis_on_sim(1.0).await;
        // Stall the worker so the queue is inspected before draining.
        axis.shutdown().await;
        axis.enqueue_all([
            Task::set(Property::Jog, 5.0),
            Task::Call(Call::Enable),
            Task::Call(Call::Begin),
        ]);
        assert_eq!(axis.pending(), 3);
        axis.cancel();
        assert_eq!(axis.queued(), Task::cancel_sequence().to_vec());
        assert_eq!(axis.snapshot().pending, 3);
    }

    #[tokio::test]
    async fn telemetry_reads_scaled_values() {
        let (axis, handle) = axis_on_sim(10.0).await;
        let t = axis.telemetry().await;
        assert_eq!(t.position, Some(0.0));
        assert_eq!(t.torque, Some(0.0));
        assert_eq!(
            handle.commands(),
            vec!["TPB", "TVB", "TTB", "TEB"]
        );
        handle.set_offline(true);
        assert_eq!(axis.telemetry().await.position, None);
        axis.shutdown().await;
    }
}
