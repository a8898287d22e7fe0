use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};

/// Planned child crashes, shared by every child launched for one target.
///
/// Each entry is an execution point. The first forward run to reach it aborts
/// its child and consumes the entry, so a relaunched child only crashes again
/// if another entry is queued.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    crashes: Arc<Mutex<VecDeque<u64>>>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn crash_at(points: impl IntoIterator<Item = u64>) -> Self {
        Self {
            crashes: Arc::new(Mutex::new(points.into_iter().collect())),
        }
    }

    pub fn remaining(&self) -> usize {
        self.crashes.lock().len()
    }

    pub(crate) fn check(&self, progress: u64) -> Result<()> {
        let mut crashes = self.crashes.lock();
        match crashes.front() {
            Some(&point) if point <= progress => {
                crashes.pop_front();
                tracing::warn!(target: "retrace.child", progress, "injected child crash");
                Err(EngineError::Aborted)
            }
            _ => Ok(()),
        }
    }
}
