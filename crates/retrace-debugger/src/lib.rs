//! The retrace debugging server.
//!
//! A session speaks the retrace protocol over one connection. Its root actor
//! starts recordings and loads saved ones; every target gets a thread actor that
//! drives a child engine through breakpoints, steps and reverse execution.

pub mod breakpoints;
pub mod commands;
mod dispatch;
pub mod error;
pub mod filter;
pub mod hardening;
mod packets;
pub mod replay;
pub mod server;
mod session;
mod thread;

pub use breakpoints::{Breakpoint, BreakpointLocation, BreakpointStore, BreakpointTable};
pub use error::{DebuggerError, Result};
pub use filter::{PauseOptions, StepKind, StepLimit, ThreadStopFilter};
pub use replay::ReplayController;
pub use server::{run, run_stdio, run_with_faults, serve_tcp};
pub use thread::ThreadState;
