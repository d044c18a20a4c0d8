//! The per-axis worker loop.

use super::task::{Call, CallWith, Task, Value};
use super::Shared;
use crate::error::TaskError;
use crate::hardware::galil::WaitOutcome;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Drains the queue one task at a time until shutdown.
///
/// A failed task is logged and the loop continues with the next one.
pub(super) async fn run(shared: Arc<Shared>) {
    debug!("Worker started");
    while !shared.shutdown.load(Ordering::Acquire) {
        let Some(task) = shared.pop() else {
            sleep(shared.timing.idle).await;
            continue;
        };
        debug!(%task, "Executing");
        if let Err(e) = execute(&shared, &task).await {
            match e {
                TaskError::Interrupted => info!(%task, "Task interrupted"),
                e => warn!(%task, error = %e, "Task failed"),
            }
        }
        shared.finish();
        sleep(shared.timing.quantum).await;
    }
    debug!("Worker stopped");
}

/// Executes one task to completion.
pub(super) async fn execute(shared: &Shared, task: &Task) -> Result<(), TaskError> {
    match *task {
        Task::Call(call) => invoke(shared, call).await,
        Task::CallWith(CallWith::BlockUntilTorque { threshold }) => {
            block_until_torque(shared, threshold).await
        }
        Task::Set(property, value) => {
            let value = match value {
                Value::Number(v) => v,
                Value::Flag(flag) => {
                    if flag {
                        1.0
                    } else {
                        0.0
                    }
                }
                Value::Read(source) => shared.read(source).await?,
            };
            shared.write(property, value).await
        }
    }
}

async fn invoke(shared: &Shared, call: Call) -> Result<(), TaskError> {
    let controller = &shared.controller;
    let axis = shared.letter;
    let ok = match call {
        Call::Enable => controller.enable_axis(axis).await,
        Call::Disable => controller.disable_axis(axis).await,
        Call::Begin => controller.begin_axis(axis).await,
        Call::Stop => controller.stop_axis(axis).await,
        Call::DefineHome => controller.define_position(axis, 0.0).await,
        Call::WaitForComplete => {
            return match controller
                .motion_complete(axis, &shared.timing.motion, &shared.interrupt)
                .await
            {
                WaitOutcome::Complete => Ok(()),
                WaitOutcome::Interrupted => Err(TaskError::Interrupted),
                WaitOutcome::TimedOut => Err(TaskError::TimedOut),
            };
        }
    };
    if ok {
        Ok(())
    } else {
        Err(TaskError::Command(format!("{call:?}{axis}")))
    }
}

/// Polls torque until its magnitude reaches `threshold`.
///
/// Failed reads keep the wait going. Without a timeout in the torque policy this
/// only ends when the threshold is met or the axis is cancelled.
async fn block_until_torque(shared: &Shared, threshold: f64) -> Result<(), TaskError> {
    let policy = shared.timing.torque;
    let started = Instant::now();
    loop {
        if let Ok(torque) = shared.read(super::Property::Torque).await {
            if torque.abs() >= threshold {
                debug!(torque, threshold, "Torque threshold reached");
                return Ok(());
            }
        }
        if shared.interrupt.load(Ordering::Acquire) {
            return Err(TaskError::Interrupted);
        }
        if policy.expired(started) {
            return Err(TaskError::TimedOut);
        }
        sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Axis, AxisTiming, Property};
    use super::*;
    use crate::hardware::galil::{Controller, WaitPolicy};
    use crate::hardware::mock::SimulatedController;
    use crate::hardware::protocol::AxisLetter;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tasks_run_in_enqueue_order() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Arc::new(Controller::new("galil0"));
        controller.attach(Box::new(sim)).await;
        let axis = Axis::builder("Vane", AxisLetter::new('A').unwrap(), controller).spawn();

        axis.enqueue_all([
            Task::set(Property::Speed, 100.0),
            Task::Call(Call::Enable),
            Task::set(Property::Acceleration, 2.0),
        ]);
        while !axis.is_idle() {
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.commands(), vec!["SPA=100", "SHA", "ACA=2"]);
        axis.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_task_does_not_stop_the_worker() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Arc::new(Controller::new("galil0"));
        controller.attach(Box::new(sim)).await;
        let axis = Axis::builder("Vane", AxisLetter::new('A').unwrap(), controller).spawn();

        // Begin with the servo off is rejected by the controller.
        axis.enqueue_all([Task::Call(Call::Begin), Task::Call(Call::Enable)]);
        while !axis.is_idle() {
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.commands(), vec!["BGA", "SHA"]);
        assert!(handle.servo(AxisLetter::new('A').unwrap()));
        axis.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn property_reference_is_read_at_execution_time() {
        let sim = SimulatedController::new();
        let handle = sim.handle();
        let controller = Arc::new(Controller::new("galil0"));
        controller.attach(Box::new(sim)).await;
        let a = AxisLetter::new('A').unwrap();
        let axis = Axis::builder("Vane", a, Arc::clone(&controller))
            .conversion_factor(10.0)
            .spawn();

        axis.enqueue_all([
            Task::set(Property::PositionRelative, 25.0),
            Task::set(Property::Speed, 100.0),
            Task::Call(Call::Enable),
            Task::Call(Call::Begin),
            Task::Call(Call::WaitForComplete),
            Task::set(Property::Limit, Value::Read(Property::Position)),
        ]);
        // At enqueue time the position is still 0.
        assert_eq!(axis.limit(), 0.0);
        while !axis.is_idle() {
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.position(a), 250.0);
        assert!((axis.limit() - 25.0).abs() < 1e-9);
        axis.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn torque_wait_honours_timeout() {
        let sim = SimulatedController::new();
        let controller = Arc::new(Controller::new("galil0"));
        controller.attach(Box::new(sim)).await;
        let timing = AxisTiming {
            torque: WaitPolicy::new(Duration::from_millis(50))
                .with_timeout(Some(Duration::from_millis(200))),
            ..AxisTiming::default()
        };
        let axis = Axis::builder("Vane", AxisLetter::new('A').unwrap(), controller)
            .timing(timing)
            .spawn();
        let result = execute(
            &axis.shared,
            &Task::CallWith(CallWith::BlockUntilTorque { threshold: 1.0 }),
        )
        .await;
        assert_eq!(result, Err(TaskError::TimedOut));
        axis.shutdown().await;
    }
}
