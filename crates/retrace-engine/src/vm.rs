//! The stack machine that runs compiled scripts.
//!
//! [`VmState`] is plain data and cheap enough to clone, which is what
//! checkpoints and evaluations are built on: a checkpoint is a stored clone, and
//! an evaluation runs on a throwaway clone of the paused state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bytecode::{compile_eval, Builtin, Chunk, FunctionId, Op, Program};
use crate::error::{EngineError, Result};
use crate::recording::{ConsoleLevel, InputKind};
use crate::script::ast::{BinaryOp, UnaryOp};
use crate::stop::{SiteContext, StopFilter, StopReason};
use crate::value::Value;

pub(crate) const MAX_FRAMES: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SiteKind {
    Statement,
    DebuggerStatement,
    /// A value is being thrown from the current statement.
    Exception(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SiteEvent {
    pub(crate) progress: u64,
    pub(crate) line: u32,
    pub(crate) column: u32,
    pub(crate) kind: SiteKind,
    pub(crate) depth: usize,
    pub(crate) frame_serial: u64,
    pub(crate) line_entry: bool,
}

/// Why [`VmState::exec`] handed control back.
#[derive(Debug)]
pub(crate) enum Exec {
    Site(SiteEvent),
    /// The frame at the barrier returned.
    Returned(Value),
    /// An exception unwound to the barrier.
    Threw(Value),
    /// No frames and no timers are left.
    Idle,
}

/// Everything outside the script: recorded inputs and console output.
pub(crate) trait VmIo {
    fn input(&mut self, kind: InputKind, index: u64) -> Result<f64>;
    fn console(&mut self, index: u64, level: ConsoleLevel, text: String, progress: u64);
}

pub(crate) struct StepBudget {
    limit: u64,
    remaining: u64,
}

impl StepBudget {
    pub(crate) fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    fn spend(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Err(EngineError::StepBudgetExceeded(self.limit));
        }
        self.remaining -= 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Returned(Value),
    Threw(Value),
}

/// A stop the evaluated code would have made if it had been running normally.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedPause {
    pub reason: StopReason,
    pub function: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub completion: Completion,
    pub nested_pauses: Vec<NestedPause>,
}

/// A stack frame as shown to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// 0 is the youngest frame.
    pub depth: usize,
    pub name: String,
    pub serial: u64,
    /// Last site reached in the frame.
    pub location: Option<(u32, u32)>,
    pub locals: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
enum Code {
    Program(FunctionId),
    Eval(Arc<Chunk>),
}

#[derive(Debug, Clone)]
struct Frame {
    code: Code,
    name: Arc<str>,
    pc: usize,
    locals: BTreeMap<Arc<str>, Value>,
    stack: Vec<Value>,
    serial: u64,
    /// Top-level code; its bindings live in the globals.
    script: bool,
    site: Option<(u32, u32)>,
}

enum Flow {
    Continue,
    Yield(Exec),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct VmState {
    frames: Vec<Frame>,
    globals: BTreeMap<Arc<str>, Value>,
    /// Keyed by (due time, creation order).
    timers: BTreeMap<(u64, u64), FunctionId>,
    clock: u64,
    timer_seq: u64,
    progress: u64,
    input_cursor: u64,
    console_cursor: u64,
    next_serial: u64,
    pending_throw: Option<Value>,
    last_site: Option<(u64, u32)>,
}

impl VmState {
    pub(crate) fn new(program: &Program) -> Self {
        let mut state = Self::default();
        let chunk = program.chunk(Program::SCRIPT);
        for (name, id) in &chunk.hoisted {
            state.globals.insert(
                name.clone(),
                Value::Function {
                    id: *id,
                    name: name.clone(),
                },
            );
        }
        let serial = state.fresh_serial();
        state.frames.push(Frame {
            code: Code::Program(Program::SCRIPT),
            name: chunk.name.clone(),
            pc: 0,
            locals: BTreeMap::new(),
            stack: Vec::new(),
            serial,
            script: true,
            site: None,
        });
        state
    }

    pub(crate) fn progress(&self) -> u64 {
        self.progress
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.frames.is_empty() && self.timers.is_empty() && self.pending_throw.is_none()
    }

    pub(crate) fn frames(&self) -> Vec<FrameInfo> {
        self.frames
            .iter()
            .rev()
            .enumerate()
            .map(|(depth, frame)| {
                let bindings = if frame.script {
                    &self.globals
                } else {
                    &frame.locals
                };
                FrameInfo {
                    depth,
                    name: frame.name.to_string(),
                    serial: frame.serial,
                    location: frame.site,
                    locals: bindings
                        .iter()
                        .map(|(name, value)| (name.to_string(), value.clone()))
                        .collect(),
                }
            })
            .collect()
    }

    fn fresh_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Run until the next execution site, or until control returns to `barrier`
    /// (the index of an evaluation frame).
    pub(crate) fn exec(
        &mut self,
        program: &Program,
        io: &mut dyn VmIo,
        barrier: Option<usize>,
        mut budget: Option<&mut StepBudget>,
    ) -> Result<Exec> {
        loop {
            if let Some(exception) = self.pending_throw.take() {
                self.frames.clear();
                self.uncaught(io, &exception);
            }

            if self.frames.is_empty() {
                if barrier.is_some() {
                    return Ok(Exec::Idle);
                }
                match self.timers.pop_first() {
                    Some(((due, _), callee)) => {
                        self.clock = self.clock.max(due);
                        self.push_function(program, callee, Vec::new());
                        continue;
                    }
                    None => return Ok(Exec::Idle),
                }
            }

            if let Some(budget) = budget.as_deref_mut() {
                budget.spend()?;
            }

            let flow = match self.fetch(program) {
                Some(op) => self.step(program, io, op, barrier)?,
                None => self.ret(Value::Undefined, barrier),
            };
            if let Flow::Yield(exec) = flow {
                return Ok(exec);
            }
        }
    }

    fn fetch(&mut self, program: &Program) -> Option<Op> {
        let frame = self.frames.last_mut()?;
        let ops = match &frame.code {
            Code::Program(id) => &program.chunk(*id).ops,
            Code::Eval(chunk) => &chunk.ops,
        };
        let op = ops.get(frame.pc).cloned()?;
        frame.pc += 1;
        Some(op)
    }

    fn step(
        &mut self,
        program: &Program,
        io: &mut dyn VmIo,
        op: Op,
        barrier: Option<usize>,
    ) -> Result<Flow> {
        match op {
            Op::Site {
                line,
                column,
                debugger,
            } => return Ok(self.site(line, column, debugger)),
            Op::Const(value) => self.push(value),
            Op::Load(name) => match self.lookup(&name) {
                Some(value) => self.push(value),
                None => {
                    let error = Value::error("ReferenceError", format!("{name} is not defined"));
                    return Ok(self.raise(error, barrier));
                }
            },
            Op::Store(name) => {
                let value = self.pop();
                self.assign(name, value);
            }
            Op::Declare(name) => {
                let value = self.pop();
                self.declare(name, value);
            }
            Op::GetProp(name) => {
                let object = self.pop();
                match get_property(&object, &name) {
                    Ok(value) => self.push(value),
                    Err(error) => return Ok(self.raise(error, barrier)),
                }
            }
            Op::Unary(op) => {
                let operand = self.pop();
                self.push(match op {
                    UnaryOp::Not => Value::Bool(!operand.is_truthy()),
                    UnaryOp::Neg => Value::Number(-operand.to_number()),
                });
            }
            Op::Binary(op) => {
                let rhs = self.pop();
                let lhs = self.pop();
                self.push(binary(op, &lhs, &rhs));
            }
            Op::JumpIfFalseKeep(target) => {
                if self.peek_truthy() {
                    self.pop();
                } else {
                    self.jump(target);
                }
            }
            Op::JumpIfTrueKeep(target) => {
                if self.peek_truthy() {
                    self.jump(target);
                } else {
                    self.pop();
                }
            }
            Op::Jump(target) => self.jump(target),
            Op::JumpIfFalse(target) => {
                if !self.pop().is_truthy() {
                    self.jump(target);
                }
            }
            Op::Call(argc) => {
                let args = self.pop_n(argc);
                match self.pop() {
                    Value::Function { id, .. } => {
                        if self.frames.len() >= MAX_FRAMES {
                            let error =
                                Value::error("RangeError", "Maximum call stack size exceeded");
                            return Ok(self.raise(error, barrier));
                        }
                        self.push_function(program, id, args);
                    }
                    other => {
                        let error = Value::error("TypeError", format!("{other} is not a function"));
                        return Ok(self.raise(error, barrier));
                    }
                }
            }
            Op::CallBuiltin(builtin, argc) => {
                let args = self.pop_n(argc);
                return self.call_builtin(io, builtin, args, barrier);
            }
            Op::NewError(class, argc) => {
                let args = self.pop_n(argc);
                let message = args.first().map(ToString::to_string).unwrap_or_default();
                self.push(Value::error(&*class, message));
            }
            Op::Pop => {
                self.pop();
            }
            Op::Return => {
                let value = self.pop();
                return Ok(self.ret(value, barrier));
            }
            Op::Throw => {
                let value = self.pop();
                return Ok(self.raise(value, barrier));
            }
        }
        Ok(Flow::Continue)
    }

    fn site(&mut self, line: u32, column: u32, debugger: bool) -> Flow {
        let depth = self.frames.len();
        let Some(frame) = self.frames.last_mut() else {
            return Flow::Continue;
        };
        frame.site = Some((line, column));
        let serial = frame.serial;
        let line_entry = self.last_site != Some((serial, line));
        self.last_site = Some((serial, line));
        self.progress += 1;
        Flow::Yield(Exec::Site(SiteEvent {
            progress: self.progress,
            line,
            column,
            kind: if debugger {
                SiteKind::DebuggerStatement
            } else {
                SiteKind::Statement
            },
            depth,
            frame_serial: serial,
            line_entry,
        }))
    }

    /// Throw `exception` from the current statement.
    ///
    /// Normal execution first reports an exception site and unwinds on the next
    /// [`VmState::exec`] call. Evaluations unwind straight to their barrier.
    fn raise(&mut self, exception: Value, barrier: Option<usize>) -> Flow {
        if let Some(base) = barrier {
            self.frames.truncate(base);
            return Flow::Yield(Exec::Threw(exception));
        }

        let depth = self.frames.len();
        let (serial, (line, column)) = self
            .frames
            .last()
            .map(|frame| (frame.serial, frame.site.unwrap_or((0, 0))))
            .unwrap_or((0, (0, 0)));
        self.pending_throw = Some(exception.clone());
        self.progress += 1;
        Flow::Yield(Exec::Site(SiteEvent {
            progress: self.progress,
            line,
            column,
            kind: SiteKind::Exception(exception),
            depth,
            frame_serial: serial,
            line_entry: false,
        }))
    }

    fn uncaught(&mut self, io: &mut dyn VmIo, exception: &Value) {
        tracing::debug!(
            target: "retrace.engine",
            progress = self.progress,
            %exception,
            "uncaught exception"
        );
        io.console(
            self.console_cursor,
            ConsoleLevel::Error,
            format!("Uncaught {exception}"),
            self.progress,
        );
        self.console_cursor += 1;
    }

    fn ret(&mut self, value: Value, barrier: Option<usize>) -> Flow {
        self.frames.pop();
        if barrier == Some(self.frames.len()) {
            return Flow::Yield(Exec::Returned(value));
        }
        if let Some(caller) = self.frames.last_mut() {
            caller.stack.push(value);
        }
        Flow::Continue
    }

    fn call_builtin(
        &mut self,
        io: &mut dyn VmIo,
        builtin: Builtin,
        args: Vec<Value>,
        barrier: Option<usize>,
    ) -> Result<Flow> {
        let result = match builtin {
            Builtin::ConsoleLog | Builtin::ConsoleError => {
                let level = if builtin == Builtin::ConsoleLog {
                    ConsoleLevel::Log
                } else {
                    ConsoleLevel::Error
                };
                let text = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                io.console(self.console_cursor, level, text, self.progress);
                self.console_cursor += 1;
                Value::Undefined
            }
            Builtin::MathRandom => Value::Number(self.next_input(io, InputKind::Random)?),
            Builtin::DateNow => Value::Number(self.next_input(io, InputKind::Now)?),
            Builtin::MathFloor => {
                Value::Number(args.first().map_or(f64::NAN, Value::to_number).floor())
            }
            Builtin::SetTimeout => {
                let Some(Value::Function { id, .. }) = args.first() else {
                    let error = Value::error("TypeError", "setTimeout callback is not a function");
                    return Ok(self.raise(error, barrier));
                };
                let delay = args.get(1).map_or(0.0, Value::to_number);
                let delay = if delay.is_finite() && delay > 0.0 {
                    delay as u64
                } else {
                    0
                };
                self.timer_seq += 1;
                self.timers
                    .insert((self.clock.saturating_add(delay), self.timer_seq), *id);
                Value::Number(self.timer_seq as f64)
            }
        };
        self.push(result);
        Ok(Flow::Continue)
    }

    fn next_input(&mut self, io: &mut dyn VmIo, kind: InputKind) -> Result<f64> {
        let value = io.input(kind, self.input_cursor)?;
        self.input_cursor += 1;
        Ok(value)
    }

    fn push_function(&mut self, program: &Program, id: FunctionId, args: Vec<Value>) {
        let chunk = program.chunk(id);
        let mut locals = BTreeMap::new();
        let mut args = args.into_iter();
        for param in &chunk.params {
            locals.insert(param.clone(), args.next().unwrap_or(Value::Undefined));
        }
        for (name, id) in &chunk.hoisted {
            locals.insert(
                name.clone(),
                Value::Function {
                    id: *id,
                    name: name.clone(),
                },
            );
        }
        let serial = self.fresh_serial();
        self.frames.push(Frame {
            code: Code::Program(id),
            name: chunk.name.clone(),
            pc: 0,
            locals,
            stack: Vec::new(),
            serial,
            script: false,
            site: None,
        });
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .last()
            .and_then(|frame| frame.locals.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
    }

    fn assign(&mut self, name: Arc<str>, value: Value) {
        if let Some(slot) = self
            .frames
            .last_mut()
            .and_then(|frame| frame.locals.get_mut(&*name))
        {
            *slot = value;
            return;
        }
        self.globals.insert(name, value);
    }

    fn declare(&mut self, name: Arc<str>, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if !frame.script => {
                frame.locals.insert(name, value);
            }
            _ => {
                self.globals.insert(name, value);
            }
        }
    }

    fn push(&mut self, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.stack.push(value);
        }
    }

    fn pop(&mut self) -> Value {
        self.frames
            .last_mut()
            .and_then(|frame| frame.stack.pop())
            .unwrap_or(Value::Undefined)
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        match self.frames.last_mut() {
            Some(frame) => {
                let at = frame.stack.len().saturating_sub(n);
                frame.stack.split_off(at)
            }
            None => Vec::new(),
        }
    }

    fn peek_truthy(&self) -> bool {
        self.frames
            .last()
            .and_then(|frame| frame.stack.last())
            .is_some_and(Value::is_truthy)
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target;
        }
    }

    fn frame_name(&self) -> String {
        self.frames
            .last()
            .map(|frame| frame.name.to_string())
            .unwrap_or_default()
    }
}

fn get_property(object: &Value, name: &str) -> Result<Value, Value> {
    match object {
        Value::Undefined | Value::Null => Err(Value::error(
            "TypeError",
            format!("Cannot read properties of {object} (reading '{name}')"),
        )),
        Value::Error(error) => Ok(match name {
            "message" => Value::string(error.message.as_str()),
            "name" => Value::string(error.name.as_str()),
            _ => Value::Undefined,
        }),
        Value::String(text) if name == "length" => Ok(Value::Number(text.chars().count() as f64)),
        Value::Function { name: function, .. } if name == "name" => {
            Ok(Value::String(function.clone()))
        }
        _ => Ok(Value::Undefined),
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(_), _) | (_, Value::String(_)) => Value::string(format!("{lhs}{rhs}")),
            _ => Value::Number(lhs.to_number() + rhs.to_number()),
        },
        BinaryOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinaryOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinaryOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinaryOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinaryOp::Eq => Value::Bool(lhs.loose_equals(rhs)),
        BinaryOp::NotEq => Value::Bool(!lhs.loose_equals(rhs)),
        BinaryOp::StrictEq => Value::Bool(lhs.strict_equals(rhs)),
        BinaryOp::StrictNotEq => Value::Bool(!lhs.strict_equals(rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => lhs.to_number().partial_cmp(&rhs.to_number()),
            };
            Value::Bool(match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(ordering)) => ordering.is_lt(),
                (BinaryOp::Le, Some(ordering)) => ordering.is_le(),
                (BinaryOp::Gt, Some(ordering)) => ordering.is_gt(),
                (_, Some(ordering)) => ordering.is_ge(),
            })
        }
    }
}

/// Evaluations may not consume inputs: anything they would read was never recorded.
struct EvalIo;

impl VmIo for EvalIo {
    fn input(&mut self, kind: InputKind, _index: u64) -> Result<f64> {
        Err(EngineError::Divergence(kind))
    }

    fn console(&mut self, _index: u64, _level: ConsoleLevel, _text: String, _progress: u64) {}
}

/// Evaluate `source` in frame `depth` (0 = youngest) of a copy of `state`.
///
/// With no frames on the stack the code runs at global scope. Sites reached by
/// functions the code calls are offered to `filter`; its stops are collected as
/// nested pauses and execution carries on.
pub(crate) fn evaluate(
    state: &VmState,
    program: &Program,
    depth: usize,
    source: &str,
    filter: Option<&dyn StopFilter>,
    max_steps: u64,
) -> Result<Evaluation> {
    let chunk = Arc::new(compile_eval(source)?);
    let mut vm = state.clone();
    vm.pending_throw = None;

    let locals = if vm.frames.is_empty() && depth == 0 {
        BTreeMap::new()
    } else {
        let index = vm
            .frames
            .len()
            .checked_sub(depth + 1)
            .ok_or(EngineError::NoSuchFrame(depth))?;
        vm.frames.truncate(index + 1);
        vm.frames
            .last()
            .filter(|frame| !frame.script)
            .map(|frame| frame.locals.clone())
            .unwrap_or_default()
    };

    let barrier = vm.frames.len();
    let serial = vm.fresh_serial();
    vm.frames.push(Frame {
        code: Code::Eval(chunk),
        name: Arc::from("(eval)"),
        pc: 0,
        locals,
        stack: Vec::new(),
        serial,
        script: false,
        site: None,
    });

    let mut budget = StepBudget::new(max_steps);
    let mut nested_pauses = Vec::new();
    loop {
        let completion = match vm.exec(program, &mut EvalIo, Some(barrier), Some(&mut budget))? {
            Exec::Site(event) => {
                let Some(filter) = filter else { continue };
                if matches!(event.kind, SiteKind::Exception(_)) {
                    continue;
                }
                let site = SiteContext::new(&event, &vm, program, max_steps);
                if let Some(reason) = filter.check(&site) {
                    nested_pauses.push(NestedPause {
                        reason,
                        function: vm.frame_name(),
                        line: event.line,
                        column: event.column,
                    });
                }
                continue;
            }
            Exec::Returned(value) => Completion::Returned(value),
            Exec::Threw(value) => Completion::Threw(value),
            Exec::Idle => Completion::Returned(Value::Undefined),
        };
        return Ok(Evaluation {
            completion,
            nested_pauses,
        });
    }
}
