use std::sync::Arc;
use std::time::Duration;

use retrace_engine::{
    ChildProcess, ChildReply, ChildRequest, Direction, EngineError, FaultPlan, Mode, NeverStop,
    Recording, StopReason,
};

use super::support::{launch, AtLine, COUNTER, URL};

const TIMEOUT: Duration = Duration::from_secs(10);

fn finished_recording() -> Recording {
    let recording = Recording::new(URL, COUNTER).into_shared();
    let mut engine = retrace_engine::Engine::new(launch(COUNTER, recording.clone(), Mode::Recording));
    engine.attach().unwrap();
    engine.run(Direction::Forward, &NeverStop, false).unwrap();
    let recording = recording.read().clone();
    recording
}

async fn request(child: &ChildProcess, request: ChildRequest) -> Result<ChildReply, EngineError> {
    tokio::time::timeout(TIMEOUT, child.request(request))
        .await
        .expect("child request timed out")
}

#[tokio::test]
async fn child_answers_requests_in_order() {
    let child = ChildProcess::spawn(launch(
        COUNTER,
        finished_recording().into_shared(),
        Mode::Replaying,
    ))
    .unwrap();

    let Ok(ChildReply::Stopped(stop)) = request(&child, ChildRequest::Attach).await else {
        panic!("attach failed");
    };
    assert_eq!(stop.reason, StopReason::Finished);

    let rewind = ChildRequest::Run {
        direction: Direction::Backward,
        filter: Arc::new(AtLine(12)),
        require_stop: false,
    };
    let Ok(ChildReply::Stopped(stop)) = request(&child, rewind).await else {
        panic!("rewind failed");
    };
    assert!(matches!(stop.reason, StopReason::Breakpoint { .. }));

    let Ok(ChildReply::Position(position)) = request(&child, ChildRequest::Position).await else {
        panic!("position failed");
    };
    assert_eq!(position, stop.position);
}

#[tokio::test]
async fn an_aborted_child_fails_current_and_later_requests() {
    let recording = finished_recording().into_shared();
    let mut setup = launch(COUNTER, recording, Mode::Replaying);
    setup.faults = FaultPlan::crash_at([5]);
    let faults = setup.faults.clone();
    let child = ChildProcess::spawn(setup).unwrap();

    request(&child, ChildRequest::Attach).await.unwrap();
    // Go back to the start so the next forward run passes the planned crash.
    request(&child, ChildRequest::Warp { target: 1 }).await.unwrap();

    let resume = ChildRequest::Run {
        direction: Direction::Forward,
        filter: Arc::new(NeverStop),
        require_stop: false,
    };
    let err = request(&child, resume).await.unwrap_err();
    assert!(matches!(err, EngineError::ChildProcessCrashed));
    assert_eq!(faults.remaining(), 0);

    let err = request(&child, ChildRequest::Position).await.unwrap_err();
    assert!(matches!(err, EngineError::ChildProcessCrashed));
}

#[tokio::test]
async fn a_relaunched_child_can_restore_a_position() {
    let recording = finished_recording().into_shared();
    let first = ChildProcess::spawn(launch(COUNTER, recording.clone(), Mode::Replaying)).unwrap();
    request(&first, ChildRequest::Attach).await.unwrap();
    let Ok(ChildReply::Stopped(stop)) = request(&first, ChildRequest::Warp { target: 17 }).await
    else {
        panic!("warp failed");
    };
    drop(first);

    let second = ChildProcess::spawn(launch(COUNTER, recording, Mode::Replaying)).unwrap();
    let Ok(ChildReply::Position(position)) = request(
        &second,
        ChildRequest::Restore(stop.position.seek_point()),
    )
    .await
    else {
        panic!("restore failed");
    };
    assert_eq!(position, stop.position);
}
