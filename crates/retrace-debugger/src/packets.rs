//! Engine values rendered as protocol forms.

use retrace_engine::{
    CheckpointInfo, Completion, ConsoleMessage, Evaluation, FrameInfo, NestedPause, Stop,
    StopReason,
};
use retrace_protocol::{
    CheckpointForm, ConsoleMessageForm, EvaluationForm, FrameForm, NestedPauseForm,
    SourceLocation, Why,
};
use serde_json::{json, Map, Value};

pub fn why(reason: &StopReason) -> Why {
    let mut extra = Map::new();
    match reason {
        StopReason::Breakpoint { breakpoint } => {
            extra.insert("breakpoint".to_owned(), json!(breakpoint.0));
        }
        StopReason::BreakpointConditionThrown {
            breakpoint,
            message,
        } => {
            extra.insert("breakpoint".to_owned(), json!(breakpoint.0));
            extra.insert("message".to_owned(), json!(message));
        }
        StopReason::Exception { exception } => {
            extra.insert("exception".to_owned(), exception.to_grip());
        }
        _ => {}
    }
    Why {
        kind: reason.as_str().to_owned(),
        extra,
    }
}

pub fn frame_form(frame: &FrameInfo, url: &str) -> FrameForm {
    FrameForm {
        depth: frame.depth,
        name: frame.name.clone(),
        serial: frame.serial,
        location: frame.location.map(|(line, column)| SourceLocation {
            url: url.to_owned(),
            line,
            column: Some(column),
        }),
        locals: frame
            .locals
            .iter()
            .map(|(name, value)| (name.clone(), value.to_grip()))
            .collect(),
    }
}

/// `{why, frame, executionPoint}`: the body of a `paused` event.
pub fn paused_body(stop: &Stop, url: &str) -> Value {
    json!({
        "why": why(&stop.reason),
        "frame": stop.position.frames.first().map(|frame| frame_form(frame, url)),
        "executionPoint": stop.position.progress,
    })
}

fn nested_pause_form(pause: &NestedPause, url: &str) -> NestedPauseForm {
    NestedPauseForm {
        why: why(&pause.reason),
        location: Some(SourceLocation {
            url: url.to_owned(),
            line: pause.line,
            column: Some(pause.column),
        }),
    }
}

pub fn evaluation_form(evaluation: &Evaluation, url: &str) -> EvaluationForm {
    let (result, exception) = match &evaluation.completion {
        Completion::Returned(value) => (Some(value.to_grip()), None),
        Completion::Threw(value) => (None, Some(value.to_grip())),
    };
    EvaluationForm {
        result,
        exception,
        nested_pauses: evaluation
            .nested_pauses
            .iter()
            .map(|pause| nested_pause_form(pause, url))
            .collect(),
    }
}

pub fn checkpoint_form(checkpoint: &CheckpointInfo) -> CheckpointForm {
    CheckpointForm {
        id: checkpoint.id.0,
        execution_point: checkpoint.progress,
    }
}

pub fn console_message_form(message: &ConsoleMessage) -> ConsoleMessageForm {
    ConsoleMessageForm {
        level: message.level.as_str().to_owned(),
        text: message.text.clone(),
        execution_point: message.execution_point,
    }
}
