use retrace_engine::{
    Direction, Engine, EngineError, InputKind, Mode, NeverStop, Recording, StopReason, Value,
};

use super::support::{eval, launch, number, recording_engine, AtLine, COUNTER, URL};

fn replay(recording: Recording) -> Engine {
    let source = recording.source().to_owned();
    Engine::new(launch(&source, recording.into_shared(), Mode::Replaying))
}

#[test]
fn a_saved_recording_replays_the_same_values() {
    let (mut engine, recording) = recording_engine(COUNTER);
    engine.attach().unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("counter.json");
    recording.read().save(&path).unwrap();

    let mut replaying = replay(Recording::load(&path).unwrap());
    let start = replaying.attach().unwrap();
    assert_eq!(start.reason, StopReason::Finished);
    assert!(start.position.finished);

    replaying.run(Direction::Backward, &AtLine(12), false).unwrap();
    assert_eq!(number(&replaying), 10.0);
    replaying.run(Direction::Backward, &AtLine(12), false).unwrap();
    assert_eq!(number(&replaying), 9.0);
}

#[test]
fn recorded_inputs_are_replayed_and_new_ones_diverge() {
    let source = "let r = Math.random();\nlet t = Date.now();\nlet done = true;\n";
    let (mut engine, recording) = recording_engine(source);
    engine.attach().unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();
    let recorded = eval(&engine, "r");
    assert_eq!(recording.read().inputs().len(), 2);
    assert_eq!(recording.read().inputs()[0].kind, InputKind::Random);

    let mut replaying = replay(recording.read().clone());
    replaying.attach().unwrap();
    assert_eq!(eval(&replaying, "r"), recorded);
    assert!(matches!(eval(&replaying, "t"), Value::Number(_)));

    let err = replaying.evaluate(0, "Math.random()", None).unwrap_err();
    assert!(matches!(err, EngineError::Divergence(InputKind::Random)));
    // The failed evaluation did not disturb anything.
    assert_eq!(eval(&replaying, "r"), recorded);
}

#[test]
fn replaying_does_not_duplicate_console_output() {
    let source = "\
let i = 0;
while (i < 3) {
  console.log('tick', i);
  i = i + 1;
}
";
    let (mut engine, recording) = recording_engine(source);
    engine.attach().unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();

    engine.run(Direction::Backward, &AtLine(3), false).unwrap();
    engine.run(Direction::Backward, &AtLine(3), false).unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();

    let console = recording.read().console().to_vec();
    let texts: Vec<_> = console.iter().map(|message| message.text.as_str()).collect();
    assert_eq!(texts, vec!["tick 0", "tick 1", "tick 2"]);
    assert!(console
        .windows(2)
        .all(|pair| pair[0].execution_point < pair[1].execution_point));

    // Warping to a message's point shows the state at that message.
    engine.warp(console[1].execution_point).unwrap();
    assert_eq!(eval(&engine, "i"), Value::Number(1.0));
}

#[test]
fn unfinished_recordings_cannot_be_saved() {
    let (mut engine, recording) = recording_engine(COUNTER);
    engine.attach().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let err = recording.read().save(&dir.path().join("x.json")).unwrap_err();
    assert!(matches!(err, EngineError::RecordingNotFinished));

    engine.end_recording().unwrap();
    recording.read().save(&dir.path().join("x.json")).unwrap();
    assert_eq!(recording.read().url(), URL);
}
