//! Composite motion routines.
//!
//! Each routine enqueues its whole task sequence in one step, so a routine never
//! interleaves with tasks enqueued by another caller. All arguments are in
//! engineering units.

use super::{Axis, Call, CallWith, Property, Task, Value};
use crate::error::{AppResult, MotionError};
use tracing::{info, warn};

/// Jog at `speed` until stopped.
pub fn jog_tasks(speed: f64) -> Vec<Task> {
    vec![
        Task::set(Property::Jog, speed),
        Task::Call(Call::Enable),
        Task::Call(Call::Begin),
    ]
}

/// Move `distance` from the current position at `speed`.
pub fn relative_tasks(speed: f64, distance: f64) -> Vec<Task> {
    vec![
        Task::set(Property::PositionRelative, distance),
        Task::set(Property::Speed, speed.abs()),
        Task::Call(Call::Enable),
        Task::Call(Call::Begin),
    ]
}

/// Move to `position` (relative to home) at `speed`.
pub fn absolute_tasks(speed: f64, position: f64) -> Vec<Task> {
    vec![
        Task::set(Property::PositionAbsolute, position),
        Task::set(Property::Speed, speed.abs()),
        Task::Call(Call::Enable),
        Task::Call(Call::Begin),
    ]
}

/// Two-edge homing: find the lower hard stop, zero there, find the upper hard stop
/// and record its position as the travel limit.
pub fn home_tasks(speed: f64, torque_threshold: f64) -> Vec<Task> {
    let speed = speed.abs();
    let until_torque = Task::CallWith(CallWith::BlockUntilTorque {
        threshold: torque_threshold.abs(),
    });
    vec![
        // lower edge
        Task::set(Property::Jog, -speed),
        Task::Call(Call::Enable),
        Task::Call(Call::Begin),
        until_torque,
        Task::Call(Call::Stop),
        Task::Call(Call::WaitForComplete),
        Task::Call(Call::DefineHome),
        // upper edge
        Task::set(Property::Jog, speed),
        Task::Call(Call::Begin),
        until_torque,
        Task::Call(Call::Stop),
        Task::Call(Call::WaitForComplete),
        Task::Call(Call::Disable),
        Task::set(Property::Limit, Value::Read(Property::Position)),
        Task::set(Property::Homed, true),
    ]
}

/// Largest accepted ping-pong repeat count. The routine is queued eagerly, six tasks
/// per round trip.
pub const MAX_PING_PONG_REPEATS: u32 = 10_000;

/// Oscillate between `limit * a` and `limit * b` for `repeats` round trips, at most
/// [`MAX_PING_PONG_REPEATS`].
pub fn ping_pong_tasks(speed: f64, repeats: u32, limit: f64, a: f64, b: f64) -> Vec<Task> {
    let repeats = repeats.min(MAX_PING_PONG_REPEATS);
    let mut tasks = Vec::with_capacity(5 + repeats as usize * 6);
    tasks.push(Task::Call(Call::Enable));
    tasks.push(Task::set(Property::Speed, speed.abs()));
    for _ in 0..repeats {
        for target in [limit * a, limit * b] {
            tasks.push(Task::set(Property::PositionAbsolute, target));
            tasks.push(Task::Call(Call::Begin));
            tasks.push(Task::Call(Call::WaitForComplete));
        }
    }
    tasks.extend(Task::cancel_sequence());
    tasks
}

impl Axis {
    /// Jogs at `speed` until stopped or cancelled.
    pub fn jog_move(&self, speed: f64) {
        self.enqueue_all(jog_tasks(speed));
    }

    /// Moves `distance` at `speed`.
    pub fn relative_move(&self, speed: f64, distance: f64) {
        self.enqueue_all(relative_tasks(speed, distance));
    }

    /// Moves at `speed` for `seconds` (a relative move of `speed * seconds`).
    pub fn timed_move(&self, speed: f64, seconds: f64) {
        self.relative_move(speed, speed * seconds);
    }

    /// Moves to an absolute position. Requires homing.
    pub fn absolute_move(&self, speed: f64, position: f64) -> AppResult<()> {
        self.require_homed()?;
        self.enqueue_all(absolute_tasks(speed, position));
        Ok(())
    }

    /// Moves to `fraction` (0..=1) of the homed travel. Requires homing.
    pub fn range_move(&self, speed: f64, fraction: f64) -> AppResult<()> {
        self.require_homed()?;
        let fraction = fraction.clamp(0.0, 1.0);
        self.enqueue_all(absolute_tasks(speed, self.limit() * fraction));
        Ok(())
    }

    /// Queues the homing sequence. Blocks the queue until both torque edges are seen.
    pub fn home(&self, speed: f64, torque_threshold: f64) {
        info!(parent: self.span(), speed, torque_threshold, "Homing queued");
        self.enqueue_all(home_tasks(speed, torque_threshold));
    }

    /// Bounces between fractions `a` and `b` of the homed travel, then stops and
    /// disables the axis.
    pub fn ping_pong(&self, speed: f64, repeats: u32, a: f64, b: f64) {
        if !self.homed() {
            warn!(parent: self.span(), "Ping-pong on an axis that has not been homed");
        }
        if repeats > MAX_PING_PONG_REPEATS {
            warn!(
                parent: self.span(),
                repeats,
                max = MAX_PING_PONG_REPEATS,
                "Ping-pong repeats clamped"
            );
        }
        self.enqueue_all(ping_pong_tasks(speed, repeats, self.limit(), a, b));
    }

    /// Changes the jog magnitude now, keeping the current jog direction.
    pub async fn set_jog_speed(&self, speed: f64) -> bool {
        let direction = match self.get(Property::Jog).await {
            Some(current) if current < 0.0 => -1.0,
            _ => 1.0,
        };
        self.set(Property::Jog, speed.abs() * direction).await.is_ok()
    }

    fn require_homed(&self) -> AppResult<()> {
        if self.homed() {
            Ok(())
        } else {
            Err(MotionError::NotHomed(self.name().to_string()))
        }
    }
}
