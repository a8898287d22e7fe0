//! Per-thread breakpoint table.
//!
//! The owning thread actor is the only writer. Every run hands the child a
//! snapshot (`Arc<BreakpointTable>`); edits made while it runs copy the table
//! instead of mutating the one the child is reading.

use std::collections::BTreeMap;
use std::sync::Arc;

use retrace_engine::BreakpointId;
use retrace_protocol::{BreakpointForm, SourceLocation};

use crate::error::{DebuggerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BreakpointLocation {
    pub url: String,
    pub line: u32,
    /// `None` matches on entry to the line.
    pub column: Option<u32>,
}

impl From<SourceLocation> for BreakpointLocation {
    fn from(location: SourceLocation) -> Self {
        Self {
            url: location.url,
            line: location.line,
            column: location.column,
        }
    }
}

impl From<&BreakpointLocation> for SourceLocation {
    fn from(location: &BreakpointLocation) -> Self {
        SourceLocation {
            url: location.url.clone(),
            line: location.line,
            column: location.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub location: BreakpointLocation,
    pub condition: Option<String>,
    pub enabled: bool,
}

impl Breakpoint {
    pub fn to_form(&self) -> BreakpointForm {
        BreakpointForm {
            id: self.id.0,
            location: SourceLocation::from(&self.location),
            condition: self.condition.clone(),
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BreakpointTable {
    by_location: BTreeMap<BreakpointLocation, BreakpointId>,
    by_id: BTreeMap<BreakpointId, Breakpoint>,
    next_id: u32,
}

impl BreakpointTable {
    /// Insert a breakpoint, or update the condition of the one already at
    /// `location`. Either way the breakpoint ends up enabled.
    pub fn set(&mut self, location: BreakpointLocation, condition: Option<String>) -> BreakpointId {
        let condition = condition.filter(|condition| !condition.trim().is_empty());
        if let Some(id) = self.by_location.get(&location).copied() {
            if let Some(existing) = self.by_id.get_mut(&id) {
                existing.condition = condition;
                existing.enabled = true;
            }
            return id;
        }

        self.next_id += 1;
        let id = BreakpointId(self.next_id);
        self.by_location.insert(location.clone(), id);
        self.by_id.insert(
            id,
            Breakpoint {
                id,
                location,
                condition,
                enabled: true,
            },
        );
        id
    }

    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        let removed = self.by_id.remove(&id)?;
        self.by_location.remove(&removed.location);
        Some(removed)
    }

    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> Result<()> {
        let breakpoint = self
            .by_id
            .get_mut(&id)
            .ok_or(DebuggerError::NoSuchBreakpoint(id.0))?;
        breakpoint.enabled = enabled;
        Ok(())
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.by_id.get(&id)
    }

    pub fn lookup(&self, location: &BreakpointLocation) -> Option<&Breakpoint> {
        self.by_location
            .get(location)
            .and_then(|id| self.by_id.get(id))
    }

    /// The enabled breakpoint that applies to an execution site. A column
    /// breakpoint wins over a line breakpoint, which only applies on entry to
    /// the line.
    pub fn lookup_site(
        &self,
        url: &str,
        line: u32,
        column: u32,
        line_entry: bool,
    ) -> Option<&Breakpoint> {
        let mut location = BreakpointLocation {
            url: url.to_owned(),
            line,
            column: Some(column),
        };
        if let Some(breakpoint) = self.lookup(&location).filter(|bp| bp.enabled) {
            return Some(breakpoint);
        }
        if !line_entry {
            return None;
        }
        location.column = None;
        self.lookup(&location).filter(|bp| bp.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Copy-on-write holder for a [`BreakpointTable`].
#[derive(Debug, Clone, Default)]
pub struct BreakpointStore {
    table: Arc<BreakpointTable>,
}

impl BreakpointStore {
    pub fn snapshot(&self) -> Arc<BreakpointTable> {
        self.table.clone()
    }

    pub fn table(&self) -> &BreakpointTable {
        &self.table
    }

    pub fn edit<T>(&mut self, f: impl FnOnce(&mut BreakpointTable) -> T) -> T {
        f(Arc::make_mut(&mut self.table))
    }
}
