use std::sync::atomic::Ordering;

use retrace_engine::{Direction, EngineError, NeverStop, StopReason};

use super::support::{number, recording_engine, AtLine, AtProgress, COUNTER};

#[test]
fn recording_starts_at_the_first_site() {
    let (mut engine, _) = recording_engine(COUNTER);
    let stop = engine.attach().unwrap();
    assert_eq!(stop.reason, StopReason::Attached);
    assert_eq!(stop.position.progress, 1);
    assert_eq!(stop.position.frames[0].location, Some((2, 0)));
}

#[test]
fn rewinding_and_resuming_visit_each_count() {
    let (mut engine, recording) = recording_engine(COUNTER);
    engine.attach().unwrap();

    let end = engine.run(Direction::Forward, &NeverStop, false).unwrap();
    assert_eq!(end.reason, StopReason::Finished);
    assert!(end.position.finished);
    assert_eq!(recording.read().end(), Some(end.position.progress));
    assert_eq!(number(&engine), 10.0);

    let mut seen = Vec::new();
    for _ in 0..5 {
        let stop = engine.run(Direction::Backward, &AtLine(12), false).unwrap();
        assert!(matches!(stop.reason, StopReason::Breakpoint { .. }));
        assert_eq!(stop.position.frames[0].name, "updateNumber");
        seen.push(number(&engine));
    }
    assert_eq!(seen, vec![10.0, 9.0, 8.0, 7.0, 6.0]);

    let mut seen = Vec::new();
    for _ in 0..4 {
        engine.run(Direction::Forward, &AtLine(12), false).unwrap();
        seen.push(number(&engine));
    }
    assert_eq!(seen, vec![7.0, 8.0, 9.0, 10.0]);

    let last = engine.run(Direction::Forward, &AtLine(12), false).unwrap();
    assert_eq!(last.reason, StopReason::Finished);
}

#[test]
fn boundary_errors_leave_the_position_alone() {
    let (mut engine, _) = recording_engine(COUNTER);
    engine.attach().unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();
    engine.run(Direction::Backward, &AtLine(12), false).unwrap();
    let before = engine.position();

    assert!(matches!(
        engine.run(Direction::Forward, &AtLine(99), true),
        Err(EngineError::NoFutureOccurrence)
    ));
    assert_eq!(engine.position(), before);

    assert!(matches!(
        engine.run(Direction::Backward, &AtLine(99), false),
        Err(EngineError::NoPriorOccurrence)
    ));
    assert_eq!(engine.position(), before);
}

#[test]
fn warps_land_on_exact_points_within_the_recording() {
    let (mut engine, _) = recording_engine(COUNTER);
    engine.attach().unwrap();
    let end = engine.run(Direction::Forward, &NeverStop, false).unwrap();

    let stop = engine.warp(10).unwrap();
    assert_eq!(stop.reason, StopReason::TimeWarp);
    assert_eq!(stop.position.progress, 10);
    let again = engine.warp(10).unwrap();
    assert_eq!(again.position, stop.position);

    let earlier = engine.warp(3).unwrap();
    assert_eq!(earlier.position.progress, 3);

    assert!(matches!(engine.warp(0), Err(EngineError::NoPriorOccurrence)));
    assert!(matches!(
        engine.warp(end.position.progress + 1),
        Err(EngineError::NoFutureOccurrence)
    ));
    assert_eq!(engine.position().progress, 3);
}

#[test]
fn checkpoints_are_ordered_by_execution_point() {
    let (mut engine, _) = recording_engine(COUNTER);
    engine.attach().unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();

    let checkpoints = engine.checkpoints();
    assert_eq!(checkpoints[0].progress, 0);
    assert!(checkpoints.windows(2).all(|pair| pair[0].id < pair[1].id
        && pair[0].progress < pair[1].progress));
    assert!(checkpoints.iter().all(|checkpoint| checkpoint.progress % 4 == 0));
}

#[test]
fn interrupt_stops_an_endless_loop() {
    let source = "let i = 0;\nwhile (true) {\n  i = i + 1;\n}\n";
    let recording = retrace_engine::Recording::new(super::support::URL, source).into_shared();
    let launch = super::support::launch(source, recording, retrace_engine::Mode::Recording);
    let interrupt = launch.interrupt.clone();
    let mut engine = retrace_engine::Engine::new(launch);
    engine.attach().unwrap();

    engine.run(Direction::Forward, &AtProgress(50), false).unwrap();
    interrupt.store(true, Ordering::Release);
    let stop = engine.run(Direction::Forward, &NeverStop, false).unwrap();
    assert_eq!(stop.reason, StopReason::Interrupted);
    assert_eq!(stop.position.progress, 51);
}

#[test]
fn ending_a_recording_caps_forward_motion() {
    let source = "let i = 0;\nwhile (true) {\n  i = i + 1;\n}\n";
    let (mut engine, recording) = recording_engine(source);
    engine.attach().unwrap();
    engine.run(Direction::Forward, &AtProgress(20), false).unwrap();

    assert_eq!(engine.end_recording().unwrap(), 20);
    assert!(recording.read().is_truncated());

    engine.run(Direction::Backward, &AtLine(3), false).unwrap();
    let stop = engine.run(Direction::Forward, &NeverStop, false).unwrap();
    assert_eq!(stop.reason, StopReason::Finished);
    assert_eq!(stop.position.progress, 20);
    assert!(!stop.position.finished);
}

#[test]
fn pausing_on_a_throw_and_continuing_after_it() {
    let source = "\
function fail() {
  throw new Error('bad');
}
fail();
let after = 1;
";
    struct OnException;
    impl retrace_engine::StopFilter for OnException {
        fn check(&self, site: &retrace_engine::SiteContext<'_>) -> Option<StopReason> {
            match site.kind() {
                retrace_engine::SiteKind::Exception(exception) => Some(StopReason::Exception {
                    exception: exception.clone(),
                }),
                _ => None,
            }
        }
    }

    let (mut engine, recording) = recording_engine(source);
    engine.attach().unwrap();
    let stop = engine.run(Direction::Forward, &OnException, false).unwrap();
    assert!(matches!(stop.reason, StopReason::Exception { .. }));
    assert_eq!(stop.position.frames[0].location, Some((2, 2)));

    let end = engine.run(Direction::Forward, &NeverStop, false).unwrap();
    assert_eq!(end.reason, StopReason::Finished);
    let console = recording.read().console().to_vec();
    assert_eq!(console.len(), 1);
    assert_eq!(console[0].text, "Uncaught Error: bad");
}
