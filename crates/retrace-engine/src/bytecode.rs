//! Compilation of parsed scripts into stack bytecode.
//!
//! Every statement starts with an [`Op::Site`], and so does every evaluation of a
//! loop condition. Sites are the only places execution can stop, and each one
//! reached advances the execution point by one.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::ScriptError;
use crate::script::ast::{BinaryOp, Expr, FunctionDecl, LogicalOp, Pos, Stmt, StmtKind, UnaryOp};
use crate::script::parse_script;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    ConsoleLog,
    ConsoleError,
    MathRandom,
    MathFloor,
    DateNow,
    SetTimeout,
}

impl Builtin {
    fn resolve(object: &str, property: &str) -> Option<Self> {
        match (object, property) {
            ("console", "log") => Some(Builtin::ConsoleLog),
            ("console", "error") => Some(Builtin::ConsoleError),
            ("Math", "random") => Some(Builtin::MathRandom),
            ("Math", "floor") => Some(Builtin::MathFloor),
            ("Date", "now") => Some(Builtin::DateNow),
            _ => None,
        }
    }
}

const ERROR_CLASSES: &[&str] = &["Error", "TypeError", "RangeError", "ReferenceError"];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Site { line: u32, column: u32, debugger: bool },
    Const(Value),
    Load(Arc<str>),
    /// Assignment: the innermost local binding, else a global.
    Store(Arc<str>),
    /// `let`: a new binding in the current scope.
    Declare(Arc<str>),
    GetProp(Arc<str>),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Short-circuit: jump keeping the operand when it is falsy, else pop it.
    JumpIfFalseKeep(usize),
    JumpIfTrueKeep(usize),
    Jump(usize),
    JumpIfFalse(usize),
    Call(usize),
    CallBuiltin(Builtin, usize),
    NewError(Arc<str>, usize),
    Pop,
    Return,
    Throw,
}

#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub(crate) name: Arc<str>,
    pub(crate) params: Vec<Arc<str>>,
    pub(crate) ops: Vec<Op>,
    /// Function declarations bound when a frame for this chunk is pushed.
    pub(crate) hoisted: Vec<(Arc<str>, FunctionId)>,
}

/// A compiled script. Chunk 0 is the top-level code.
#[derive(Debug)]
pub struct Program {
    url: Arc<str>,
    chunks: Vec<Chunk>,
}

impl Program {
    pub(crate) const SCRIPT: FunctionId = FunctionId(0);

    pub fn compile(url: &str, source: &str) -> Result<Self, ScriptError> {
        let body = parse_script(source)?;
        let mut compiler = Compiler {
            chunks: Vec::new(),
            emit_sites: true,
            current: Pos { line: 1, column: 0 },
        };
        let script = compiler.reserve("(script)", Vec::new());
        let mut builder = FnBuilder::default();
        compiler.emit_stmts(&mut builder, &body)?;
        compiler.finish(script, builder);
        Ok(Self {
            url: Arc::from(url),
            chunks: compiler.chunks,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn chunk(&self, id: FunctionId) -> &Chunk {
        &self.chunks[id.0 as usize]
    }

    /// Lines holding at least one execution site.
    pub fn breakable_lines(&self) -> BTreeSet<u32> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.ops.iter())
            .filter_map(|op| match op {
                Op::Site { line, .. } => Some(*line),
                _ => None,
            })
            .collect()
    }
}

/// Compile an expression (or statement list) typed by a user while paused.
///
/// The completion value is the value of a trailing expression statement. No sites
/// are emitted, so evaluation code itself never stops.
pub(crate) fn compile_eval(source: &str) -> Result<Chunk, ScriptError> {
    let body = parse_script(source)?;
    reject_declarations(&body)?;

    let mut compiler = Compiler {
        chunks: Vec::new(),
        emit_sites: false,
        current: Pos { line: 1, column: 0 },
    };
    let mut builder = FnBuilder::default();
    match body.split_last() {
        Some((Stmt {
            kind: StmtKind::Expr(expr),
            ..
        }, rest)) => {
            compiler.emit_stmts(&mut builder, rest)?;
            compiler.emit_expr(&mut builder, expr)?;
            builder.ops.push(Op::Return);
        }
        _ => {
            compiler.emit_stmts(&mut builder, &body)?;
            builder.ops.push(Op::Const(Value::Undefined));
            builder.ops.push(Op::Return);
        }
    }

    Ok(Chunk {
        name: Arc::from("(eval)"),
        params: Vec::new(),
        ops: builder.ops,
        hoisted: Vec::new(),
    })
}

fn reject_declarations(body: &[Stmt]) -> Result<(), ScriptError> {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Function(_) => {
                return Err(ScriptError::new(
                    "function declarations are not allowed in evaluations",
                    stmt.pos,
                ))
            }
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                reject_declarations(then_branch)?;
                if let Some(else_branch) = else_branch {
                    reject_declarations(else_branch)?;
                }
            }
            StmtKind::While { body, .. } => reject_declarations(body)?,
            _ => {}
        }
    }
    Ok(())
}

#[derive(Default)]
struct FnBuilder {
    ops: Vec<Op>,
    hoisted: Vec<(Arc<str>, FunctionId)>,
}

impl FnBuilder {
    fn here(&self) -> usize {
        self.ops.len()
    }

    /// Emit a jump with a dummy target; returns its index for [`FnBuilder::patch`].
    fn jump(&mut self, op: fn(usize) -> Op) -> usize {
        self.ops.push(op(usize::MAX));
        self.ops.len() - 1
    }

    fn patch(&mut self, at: usize) {
        let target = self.ops.len();
        match &mut self.ops[at] {
            Op::Jump(to)
            | Op::JumpIfFalse(to)
            | Op::JumpIfFalseKeep(to)
            | Op::JumpIfTrueKeep(to) => *to = target,
            _ => {}
        }
    }
}

struct Compiler {
    chunks: Vec<Chunk>,
    emit_sites: bool,
    /// Start of the statement being compiled, for error positions.
    current: Pos,
}

impl Compiler {
    fn reserve(&mut self, name: &str, params: Vec<Arc<str>>) -> FunctionId {
        let id = FunctionId(self.chunks.len() as u32);
        self.chunks.push(Chunk {
            name: Arc::from(name),
            params,
            ops: Vec::new(),
            hoisted: Vec::new(),
        });
        id
    }

    fn finish(&mut self, id: FunctionId, mut builder: FnBuilder) {
        builder.ops.push(Op::Const(Value::Undefined));
        builder.ops.push(Op::Return);
        let chunk = &mut self.chunks[id.0 as usize];
        chunk.ops = builder.ops;
        chunk.hoisted = builder.hoisted;
    }

    fn compile_function(&mut self, decl: &FunctionDecl) -> Result<FunctionId, ScriptError> {
        let params = decl.params.iter().map(|p| Arc::from(p.as_str())).collect();
        let id = self.reserve(&decl.name, params);
        let mut builder = FnBuilder::default();
        self.emit_stmts(&mut builder, &decl.body)?;
        self.finish(id, builder);
        Ok(id)
    }

    fn site(&self, b: &mut FnBuilder, pos: Pos, debugger: bool) {
        if self.emit_sites {
            b.ops.push(Op::Site {
                line: pos.line,
                column: pos.column,
                debugger,
            });
        }
    }

    fn emit_stmts(&mut self, b: &mut FnBuilder, stmts: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in stmts {
            self.emit_stmt(b, stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, b: &mut FnBuilder, stmt: &Stmt) -> Result<(), ScriptError> {
        self.current = stmt.pos;
        match &stmt.kind {
            StmtKind::Let { name, init } => {
                self.site(b, stmt.pos, false);
                match init {
                    Some(init) => self.emit_expr(b, init)?,
                    None => b.ops.push(Op::Const(Value::Undefined)),
                }
                b.ops.push(Op::Declare(Arc::from(name.as_str())));
            }
            StmtKind::Assign { name, value } => {
                self.site(b, stmt.pos, false);
                self.emit_expr(b, value)?;
                b.ops.push(Op::Store(Arc::from(name.as_str())));
            }
            StmtKind::Expr(expr) => {
                self.site(b, stmt.pos, false);
                self.emit_expr(b, expr)?;
                b.ops.push(Op::Pop);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.site(b, stmt.pos, false);
                self.emit_expr(b, cond)?;
                let to_else = b.jump(Op::JumpIfFalse);
                self.emit_stmts(b, then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let to_end = b.jump(Op::Jump);
                        b.patch(to_else);
                        self.emit_stmts(b, else_branch)?;
                        b.patch(to_end);
                    }
                    None => b.patch(to_else),
                }
            }
            StmtKind::While { cond, body } => {
                let head = b.here();
                self.site(b, stmt.pos, false);
                self.emit_expr(b, cond)?;
                let to_end = b.jump(Op::JumpIfFalse);
                self.emit_stmts(b, body)?;
                b.ops.push(Op::Jump(head));
                b.patch(to_end);
            }
            StmtKind::Function(decl) => {
                let id = self.compile_function(decl)?;
                b.hoisted.push((Arc::from(decl.name.as_str()), id));
            }
            StmtKind::Return(value) => {
                self.site(b, stmt.pos, false);
                match value {
                    Some(value) => self.emit_expr(b, value)?,
                    None => b.ops.push(Op::Const(Value::Undefined)),
                }
                b.ops.push(Op::Return);
            }
            StmtKind::Throw(value) => {
                self.site(b, stmt.pos, false);
                self.emit_expr(b, value)?;
                b.ops.push(Op::Throw);
            }
            StmtKind::Debugger => self.site(b, stmt.pos, true),
        }
        Ok(())
    }

    fn emit_expr(&mut self, b: &mut FnBuilder, expr: &Expr) -> Result<(), ScriptError> {
        match expr {
            Expr::Number(value) => b.ops.push(Op::Const(Value::Number(*value))),
            Expr::Str(value) => b.ops.push(Op::Const(Value::string(value.as_str()))),
            Expr::Bool(value) => b.ops.push(Op::Const(Value::Bool(*value))),
            Expr::Null => b.ops.push(Op::Const(Value::Null)),
            Expr::Undefined => b.ops.push(Op::Const(Value::Undefined)),
            Expr::Ident(name) => b.ops.push(Op::Load(Arc::from(name.as_str()))),
            Expr::Unary { op, expr } => {
                self.emit_expr(b, expr)?;
                b.ops.push(Op::Unary(*op));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.emit_expr(b, lhs)?;
                self.emit_expr(b, rhs)?;
                b.ops.push(Op::Binary(*op));
            }
            Expr::Logical { op, lhs, rhs } => {
                self.emit_expr(b, lhs)?;
                let skip = match op {
                    LogicalOp::And => b.jump(Op::JumpIfFalseKeep),
                    LogicalOp::Or => b.jump(Op::JumpIfTrueKeep),
                };
                self.emit_expr(b, rhs)?;
                b.patch(skip);
            }
            Expr::Member { object, property } => {
                self.emit_expr(b, object)?;
                b.ops.push(Op::GetProp(Arc::from(property.as_str())));
            }
            Expr::Call { callee, args } => {
                if let Some(builtin) = builtin_callee(callee) {
                    for arg in args {
                        self.emit_expr(b, arg)?;
                    }
                    b.ops.push(Op::CallBuiltin(builtin, args.len()));
                } else {
                    self.emit_expr(b, callee)?;
                    for arg in args {
                        self.emit_expr(b, arg)?;
                    }
                    b.ops.push(Op::Call(args.len()));
                }
            }
            Expr::New { class, args } => {
                if !ERROR_CLASSES.contains(&class.as_str()) {
                    return Err(ScriptError::new(
                        format!("`new {class}` is not supported"),
                        self.current,
                    ));
                }
                for arg in args {
                    self.emit_expr(b, arg)?;
                }
                b.ops.push(Op::NewError(Arc::from(class.as_str()), args.len()));
            }
        }
        Ok(())
    }
}

fn builtin_callee(callee: &Expr) -> Option<Builtin> {
    match callee {
        Expr::Ident(name) if name == "setTimeout" => Some(Builtin::SetTimeout),
        Expr::Member { object, property } => match &**object {
            Expr::Ident(object) => Builtin::resolve(object, property),
            _ => None,
        },
        _ => None,
    }
}
