//! Program executor: wall-clock playback of a compiled timeline.
//!
//! The executor runs each playback on its own tokio task. It never blocks on motion
//! itself: events are handed to axis queues and the executor moves on. The only
//! place it waits for the axes is the completion barrier between loop iterations.
//!
//! # Architecture
//!
//! ```text
//! Instructions → compile → Program → playback task → Axis queues → Axis workers → Controller
//!                                          │
//!                                          └─ ExecutorEvent broadcast (started, executed, iteration, finished)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let executor = ProgramExecutor::new(axes);
//! let mut events = executor.subscribe();
//! let run = executor.start(&document.instructions, 3)?;
//! let summary = run.join().await;
//! ```

use super::compiler::{self, Event, Operation, Program};
use super::instruction::Instruction;
use super::state::{ExecutorState, RunOutcome};
use crate::axis::Axis;
use crate::error::{AppResult, MotionError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;

/// Capacity of the notification channel; slow subscribers see `Lagged`.
const NOTIFICATION_CAPACITY: usize = 256;

/// Polling intervals of the playback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorTiming {
    /// Clock poll while waiting for the next event.
    pub playback_poll: Duration,
    /// Idle poll of the inter-iteration completion barrier.
    pub barrier_poll: Duration,
}

impl Default for ExecutorTiming {
    fn default() -> Self {
        Self {
            playback_poll: Duration::from_millis(1),
            barrier_poll: Duration::from_millis(10),
        }
    }
}

/// Notifications emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExecutorEvent {
    /// Playback began.
    RunStarted {
        /// Identifier of the run.
        run_id: Uuid,
    },
    /// An event was dispatched; carries the originating instruction index.
    InstructionExecuted {
        /// Instruction index in authoring order.
        index: usize,
    },
    /// A full pass over the timeline finished and all axes went idle.
    IterationCompleted {
        /// Completed iterations so far, starting at 1.
        iteration: u64,
    },
    /// Playback ended and the axes were cancelled.
    RunFinished {
        /// Identifier of the run.
        run_id: Uuid,
        /// Why it ended.
        outcome: RunOutcome,
        /// Completed iterations.
        iterations: u64,
    },
}

/// Executor status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorStatus {
    /// Current state.
    pub state: ExecutorState,
    /// Identifier of the current or last run.
    pub run_id: Option<Uuid>,
    /// Completed iterations of the current or last run.
    pub iteration: u64,
    /// Index of the next event to dispatch.
    pub cursor: usize,
    /// Requested iterations, 0 for unbounded.
    pub loop_count: u32,
}

impl Default for ExecutorStatus {
    fn default() -> Self {
        Self {
            state: ExecutorState::Idle,
            run_id: None,
            iteration: 0,
            cursor: 0,
            loop_count: 0,
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Why it ended.
    pub outcome: RunOutcome,
    /// Completed iterations.
    pub iterations: u64,
}

/// Handle to an active run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    task: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Identifier of the run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Waits for the run to end. `None` if the playback task panicked.
    pub async fn join(self) -> Option<RunSummary> {
        self.task.await.ok()
    }
}

#[derive(Debug, Default)]
struct Control {
    stop: AtomicBool,
    status: Mutex<ExecutorStatus>,
}

impl Control {
    fn status(&self) -> MutexGuard<'_, ExecutorStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Replays programs against a set of axes.
pub struct ProgramExecutor {
    axes: HashMap<String, Arc<Axis>>,
    timing: ExecutorTiming,
    notifications: broadcast::Sender<ExecutorEvent>,
    control: Arc<Control>,
    span: Span,
}

impl ProgramExecutor {
    /// Creates an executor over `axes`, addressed by name.
    pub fn new(axes: impl IntoIterator<Item = Arc<Axis>>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            axes: axes
                .into_iter()
                .map(|axis| (axis.name().to_string(), axis))
                .collect(),
            timing: ExecutorTiming::default(),
            notifications,
            control: Arc::new(Control::default()),
            span: tracing::info_span!("executor"),
        }
    }

    /// Polling intervals.
    pub fn with_timing(mut self, timing: ExecutorTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Nests run spans under `parent`.
    pub fn with_span(mut self, parent: &Span) -> Self {
        self.span = tracing::info_span!(parent: parent, "executor");
        self
    }

    /// Receives notifications from subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.notifications.subscribe()
    }

    /// Looks up an axis by name.
    pub fn axis(&self, name: &str) -> Option<&Arc<Axis>> {
        self.axes.get(name)
    }

    /// Compiles `instructions` and checks that every referenced axis exists.
    pub fn compile(&self, instructions: &[Instruction]) -> AppResult<Program> {
        let program = compiler::compile(instructions)?;
        if let Some(missing) = program.axes().into_iter().find(|n| !self.axes.contains_key(*n)) {
            return Err(MotionError::UnknownAxis(missing.to_string()));
        }
        Ok(program)
    }

    /// Compiles and starts playback. `loop_count == 0` loops until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// - compile errors and unknown axes
    /// - [`MotionError::AlreadyRunning`] while a previous run is active
    pub fn start(&self, instructions: &[Instruction], loop_count: u32) -> AppResult<RunHandle> {
        let program = self.compile(instructions)?;
        self.start_program(program, loop_count)
    }

    /// Starts playback of an already compiled program.
    pub fn start_program(&self, program: Program, loop_count: u32) -> AppResult<RunHandle> {
        let mut timeline = Vec::with_capacity(program.len());
        for event in program.events() {
            let axis = self
                .axes
                .get(&event.axis)
                .ok_or_else(|| MotionError::UnknownAxis(event.axis.clone()))?;
            timeline.push((event.clone(), Arc::clone(axis)));
        }
        let axes: Vec<Arc<Axis>> = program
            .axes()
            .into_iter()
            .filter_map(|name| self.axes.get(name).cloned())
            .collect();

        let run_id = Uuid::new_v4();
        {
            let mut status = self.control.status();
            if !status.state.can_begin() {
                return Err(MotionError::AlreadyRunning);
            }
            *status = ExecutorStatus {
                state: ExecutorState::Running,
                run_id: Some(run_id),
                iteration: 0,
                cursor: 0,
                loop_count,
            };
            self.control.stop.store(false, Ordering::Release);
        }

        let run = Playback {
            run_id,
            timeline,
            axes,
            loop_count,
            timing: self.timing,
            control: Arc::clone(&self.control),
            notifications: self.notifications.clone(),
        };
        let span = tracing::info_span!(parent: &self.span, "run", run_id = %run_id);
        let task = tokio::spawn(run.play().instrument(span));
        Ok(RunHandle { run_id, task })
    }

    /// Requests the active run to stop. Playback ends within one polling interval and
    /// every axis in the program is cancelled.
    pub fn stop(&self) {
        let running = self.control.status().state == ExecutorState::Running;
        self.control.stop.store(true, Ordering::Release);
        if running {
            info!(parent: &self.span, "Stop requested");
        }
    }

    /// Current status.
    pub fn status(&self) -> ExecutorStatus {
        self.control.status().clone()
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.control.status().state == ExecutorState::Running
    }
}

/// Cancels every axis of the run when playback ends, including by panic, and
/// publishes the final state under the same lock that `start_program` checks.
struct Cleanup<'a> {
    run_id: Uuid,
    axes: &'a [Arc<Axis>],
    control: &'a Control,
    finished: Option<(RunOutcome, u64)>,
}

impl Cleanup<'_> {
    fn finish(mut self, outcome: RunOutcome, iterations: u64) {
        self.finished = Some((outcome, iterations));
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        for axis in self.axes {
            axis.cancel();
        }
        let mut status = self.control.status();
        // A newer run owns the status once this one has released it.
        if status.run_id != Some(self.run_id) || status.state != ExecutorState::Running {
            return;
        }
        match self.finished {
            Some((outcome, iterations)) => {
                status.state = outcome.into();
                status.iteration = iterations;
            }
            None => status.state = ExecutorState::Stopped,
        }
    }
}

struct Playback {
    run_id: Uuid,
    timeline: Vec<(Event, Arc<Axis>)>,
    axes: Vec<Arc<Axis>>,
    loop_count: u32,
    timing: ExecutorTiming,
    control: Arc<Control>,
    notifications: broadcast::Sender<ExecutorEvent>,
}

impl Playback {
    fn notify(&self, event: ExecutorEvent) {
        // No subscribers is fine.
        let _ = self.notifications.send(event);
    }

    async fn play(self) -> RunSummary {
        info!(
            events = self.timeline.len(),
            axes = self.axes.len(),
            loop_count = self.loop_count,
            "Run started"
        );
        self.notify(ExecutorEvent::RunStarted {
            run_id: self.run_id,
        });

        let cleanup = Cleanup {
            run_id: self.run_id,
            axes: &self.axes,
            control: &self.control,
            finished: None,
        };
        let (outcome, iterations) = self.iterate().await;
        cleanup.finish(outcome, iterations);

        info!(?outcome, iterations, "Run finished");
        self.notify(ExecutorEvent::RunFinished {
            run_id: self.run_id,
            outcome,
            iterations,
        });
        RunSummary {
            run_id: self.run_id,
            outcome,
            iterations,
        }
    }

    async fn iterate(&self) -> (RunOutcome, u64) {
        let mut iteration: u64 = 0;
        loop {
            let started = Instant::now();
            for (cursor, (event, axis)) in self.timeline.iter().enumerate() {
                self.control.status().cursor = cursor;
                if !self.wait_until(started + Duration::from_millis(event.time_ms)).await {
                    return (RunOutcome::Stopped, iteration);
                }
                dispatch(axis, event);
                self.notify(ExecutorEvent::InstructionExecuted {
                    index: event.origin_index,
                });
            }
            self.control.status().cursor = self.timeline.len();

            if self.control.stopping() || !self.barrier().await {
                return (RunOutcome::Stopped, iteration);
            }

            iteration += 1;
            self.control.status().iteration = iteration;
            info!(iteration, "Iteration completed");
            self.notify(ExecutorEvent::IterationCompleted { iteration });

            if self.loop_count != 0 && iteration >= u64::from(self.loop_count) {
                return (RunOutcome::Completed, iteration);
            }
        }
    }

    /// Sleeps in `playback_poll` steps until `due`. `false` if stopped first.
    async fn wait_until(&self, due: Instant) -> bool {
        loop {
            if self.control.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            sleep(self.timing.playback_poll.min(due - now)).await;
        }
    }

    /// Waits until every axis of the run is idle. `false` if stopped first.
    ///
    /// The first check happens after one interval, so an iteration that dispatched
    /// nothing still yields to the runtime.
    async fn barrier(&self) -> bool {
        loop {
            sleep(self.timing.barrier_poll).await;
            if self.control.stopping() {
                return false;
            }
            if self.axes.iter().all(|axis| axis.is_idle()) {
                return true;
            }
        }
    }
}

/// Hands one event to its axis queue.
fn dispatch(axis: &Axis, event: &Event) {
    debug!(
        axis = %axis.name(),
        index = event.origin_index,
        time_ms = event.time_ms,
        operation = ?event.operation,
        "Dispatch"
    );
    match event.operation {
        Operation::Range { speed, fraction } => {
            if let Err(e) = axis.range_move(speed, fraction) {
                warn!(axis = %axis.name(), index = event.origin_index, error = %e, "Range event skipped");
            }
        }
        Operation::PingPong {
            speed,
            repeats,
            a,
            b,
        } => axis.ping_pong(speed, repeats, a, b),
        operation => axis.enqueue_all(operation.fixed_tasks().unwrap_or_default()),
    }
}
