//! Integration tests for program compilation and playback

use galil_sequencer::axis::{Axis, Call, Property, Task};
use galil_sequencer::hardware::{AxisLetter, Controller, SimHandle, SimulatedController};
use galil_sequencer::program::{
    compile, Action, ExecutorEvent, ExecutorState, Instruction, Operation, ProgramExecutor,
    RunOutcome,
};
use galil_sequencer::MotionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

async fn rig(axes: &[(&str, char)]) -> (ProgramExecutor, Vec<Arc<Axis>>, SimHandle) {
    let sim = SimulatedController::new();
    let handle = sim.handle();
    let controller = Arc::new(Controller::new("galil0"));
    controller.attach(Box::new(sim)).await;
    let axes: Vec<Arc<Axis>> = axes
        .iter()
        .map(|(name, letter)| {
            Axis::builder(*name, AxisLetter::new(*letter).unwrap(), Arc::clone(&controller))
                .spawn()
        })
        .collect();
    (ProgramExecutor::new(axes.clone()), axes, handle)
}

/// Collects notifications until the run finishes.
async fn drain(rx: &mut broadcast::Receiver<ExecutorEvent>) -> Vec<ExecutorEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx.recv().await.unwrap();
        let finished = matches!(event, ExecutorEvent::RunFinished { .. });
        events.push(event);
        if finished {
            return events;
        }
    }
}

async fn wait_idle(axis: &Axis) {
    while !axis.is_idle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn a() -> AxisLetter {
    AxisLetter::new('A').unwrap()
}

// =============================================================================
// Compilation
// =============================================================================

#[test]
fn test_single_jog_compiles_to_one_event() {
    let program = compile(&[Instruction::new(0, "A", Action::Jog, vec![10.0])]).unwrap();
    assert_eq!(program.len(), 1);
    let event = &program.events()[0];
    assert_eq!(event.time_ms, 0);
    assert_eq!(event.operation, Operation::Jog { speed: 10.0 });
    assert_eq!(
        event.operation.fixed_tasks().unwrap(),
        vec![
            Task::Call(Call::Enable),
            Task::set(Property::Jog, 10.0),
            Task::Call(Call::Begin),
        ]
    );
}

#[test]
fn test_timed_compiles_to_start_and_stop() {
    let program = compile(&[Instruction::new(0, "A", Action::Timed, vec![10.0, 500.0])]).unwrap();
    let timeline: Vec<(u64, Operation)> = program
        .events()
        .iter()
        .map(|e| (e.time_ms, e.operation))
        .collect();
    assert_eq!(
        timeline,
        vec![(0, Operation::Jog { speed: 10.0 }), (500, Operation::Stop)]
    );
    assert_eq!(
        program.events()[1].operation.fixed_tasks().unwrap(),
        Task::cancel_sequence().to_vec()
    );
    assert_eq!(program.duration_ms(), 500);
}

#[test]
fn test_invalid_instructions_name_their_index() {
    let result = compile(&[
        Instruction::new(0, "A", Action::Jog, vec![1.0]),
        Instruction::new(10, "A", Action::PingPong, vec![1.0, 150.0, 2.0]),
    ]);
    assert!(matches!(
        result,
        Err(MotionError::InvalidInstruction { index: 1, .. })
    ));
}

// =============================================================================
// Playback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_jog_program_dispatches_once() {
    let (executor, axes, handle) = rig(&[("A", 'A')]).await;
    let mut rx = executor.subscribe();
    executor
        .start(&[Instruction::new(0, "A", Action::Jog, vec![10.0])], 1)
        .unwrap();
    let events = drain(&mut rx).await;
    wait_idle(&axes[0]).await;

    let executed = events
        .iter()
        .filter(|e| matches!(e, ExecutorEvent::InstructionExecuted { .. }))
        .count();
    assert_eq!(executed, 1);

    let commands = handle.commands_for(a());
    assert_eq!(&commands[..3], &["SHA", "JGA=10", "BGA"]);
    // The run's end cancels the still-jogging axis.
    assert_eq!(commands[3], "STA");
    assert_eq!(commands.last().map(String::as_str), Some("MOA"));
}

#[tokio::test(start_paused = true)]
async fn test_loop_count_runs_exact_iterations_behind_barrier() {
    let (executor, _axes, handle) = rig(&[("A", 'A'), ("B", 'B')]).await;
    let program = [
        Instruction::new(0, "A", Action::Timed, vec![10.0, 200.0]),
        Instruction::new(50, "B", Action::Timed, vec![-5.0, 300.0]),
    ];
    let mut rx = executor.subscribe();
    let run = executor.start(&program, 3).unwrap();
    let events = drain(&mut rx).await;
    let summary = run.join().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.iterations, 3);
    let iterations: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            ExecutorEvent::IterationCompleted { iteration } => Some(*iteration),
            _ => None,
        })
        .collect();
    assert_eq!(iterations, vec![1, 2, 3]);
    assert_eq!(executor.status().state, ExecutorState::Completed);

    // Every new iteration starts only after both axes were disabled.
    let commands = handle.commands();
    assert_eq!(handle.commands_matching("JGA=10").len(), 3);
    assert_eq!(handle.commands_matching("JGB=-5").len(), 3);
    let mut disabled = (true, true);
    for command in &commands {
        match command.as_str() {
            "JGA=10" => {
                assert!(disabled.0 && disabled.1, "iteration overlap: {commands:?}");
                disabled = (false, false);
            }
            "MOA" => disabled.0 = true,
            "MOB" => disabled.1 = true,
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_loop_runs_until_stopped() {
    let (executor, axes, handle) = rig(&[("A", 'A')]).await;
    let mut rx = executor.subscribe();
    let run = executor
        .start(&[Instruction::new(0, "A", Action::Timed, vec![3.0, 100.0])], 0)
        .unwrap();

    loop {
        if let ExecutorEvent::IterationCompleted { iteration: 4 } = rx.recv().await.unwrap() {
            break;
        }
    }
    assert!(executor.is_running());
    let stopped_at = Instant::now();
    executor.stop();
    let summary = run.join().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert!(summary.iterations >= 4);
    assert!(stopped_at.elapsed() < Duration::from_millis(100));
    assert_eq!(executor.status().state, ExecutorState::Stopped);

    wait_idle(&axes[0]).await;
    assert!(!handle.servo(a()));
}

#[tokio::test(start_paused = true)]
async fn test_range_on_unhomed_axis_is_skipped() {
    let (executor, axes, handle) = rig(&[("A", 'A')]).await;
    let run = executor
        .start(&[Instruction::new(0, "A", Action::Range, vec![5.0, 50.0])], 1)
        .unwrap();
    let summary = run.join().await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert!(!axes[0].homed());
    assert!(handle.commands_matching("PAA").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_range_on_homed_axis_moves_to_fraction() {
    let (executor, axes, handle) = rig(&[("A", 'A')]).await;
    axes[0].set(Property::Limit, 400.0).await.unwrap();
    axes[0].set(Property::Homed, 1.0).await.unwrap();

    let run = executor
        .start(&[Instruction::new(0, "A", Action::Range, vec![100.0, 25.0])], 1)
        .unwrap();
    run.join().await.unwrap();
    let commands = handle.commands();
    assert!(commands.contains(&"PAA=100".to_string()));
    assert!(commands.contains(&"SPA=100".to_string()));
}
