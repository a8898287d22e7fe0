use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vm::VmState;

/// Ids grow with the execution point they were taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub id: CheckpointId,
    pub progress: u64,
}

/// Saved VM states every `interval` execution points, plus the initial state.
#[derive(Debug)]
pub(crate) struct CheckpointStore {
    interval: u64,
    states: BTreeMap<u64, VmState>,
}

impl CheckpointStore {
    pub(crate) fn new(initial: &VmState, interval: u64) -> Self {
        let mut states = BTreeMap::new();
        states.insert(initial.progress(), initial.clone());
        Self {
            interval: interval.max(1),
            states,
        }
    }

    /// Keep a copy of `state` if it sits on the checkpoint grid.
    pub(crate) fn note(&mut self, state: &VmState) {
        let progress = state.progress();
        if progress % self.interval == 0 && !self.states.contains_key(&progress) {
            tracing::trace!(target: "retrace.engine", progress, "checkpoint");
            self.states.insert(progress, state.clone());
        }
    }

    /// The latest checkpoint at or before `progress`.
    pub(crate) fn at_or_before(&self, progress: u64) -> Option<&VmState> {
        self.states
            .range(..=progress)
            .next_back()
            .map(|(_, state)| state)
    }

    /// Checkpoint positions strictly before `progress`, latest first.
    pub(crate) fn before(&self, progress: u64) -> Vec<u64> {
        self.states.range(..progress).rev().map(|(p, _)| *p).collect()
    }

    pub(crate) fn get(&self, progress: u64) -> Option<&VmState> {
        self.states.get(&progress)
    }

    pub(crate) fn list(&self) -> Vec<CheckpointInfo> {
        self.states
            .keys()
            .map(|&progress| CheckpointInfo {
                id: CheckpointId(progress / self.interval),
                progress,
            })
            .collect()
    }
}
