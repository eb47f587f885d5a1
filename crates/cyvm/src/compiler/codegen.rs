// Bytecode generation
// Resolves every identifier statically (function local, module, or VM global)
// and emits stack-machine code. Top-level bindings are hoisted so functions may
// refer to globals assigned later in the same program. New globals and
// imports are only committed to the VM once the whole program compiled.

use crate::compiler::ast::{BinaryOp, Expr, ExprKind, FuncDecl, Stmt, UnaryOp};
use crate::compiler::chunk::{Chunk, OpCode};
use crate::compiler::token::Pos;
use crate::compiler::{Stage, SyntaxError};
use crate::heap::{HeapObject, ScriptFunction};
use crate::value::Value;
use crate::vm::Vm;
use smol_str::SmolStr;
use std::rc::Rc;

type CompileResult<T> = Result<T, SyntaxError>;

/// Maximum number of arguments in a single call (natives receive a u8 count).
pub const MAX_CALL_ARGS: usize = u8::MAX as usize;

enum Resolved {
    Local(u32),
    Global(u32),
    Module(u32),
    Undefined,
}

struct LoopState {
    breaks: Vec<usize>,
}

struct FuncState {
    chunk: Chunk,
    locals: Vec<SmolStr>,
    loops: Vec<LoopState>,
}

pub struct Compiler<'a> {
    vm: &'a mut Vm,
    source: Rc<str>,
    source_name: SmolStr,
    global_base: u32,
    pending_globals: Vec<SmolStr>,
    pending_imports: Vec<(SmolStr, u32)>,
    funcs: Vec<FuncState>,
}

impl<'a> Compiler<'a> {
    pub fn new(vm: &'a mut Vm, source: Rc<str>, source_name: SmolStr) -> Self {
        let global_base = vm.globals.len() as u32;
        Compiler {
            vm,
            source,
            source_name,
            global_base,
            pending_globals: Vec::new(),
            pending_imports: Vec::new(),
            funcs: Vec::new(),
        }
    }

    pub fn compile_program(mut self, program: &[Stmt]) -> CompileResult<Chunk> {
        let top = Chunk::new("main", self.source.clone(), self.source_name.clone());
        self.funcs.push(FuncState {
            chunk: top,
            locals: Vec::new(),
            loops: Vec::new(),
        });

        self.hoist(program)?;

        let mut produced_value = false;
        for (i, stmt) in program.iter().enumerate() {
            let is_last = i + 1 == program.len();
            match stmt {
                Stmt::Expr(expr) if is_last => {
                    self.compile_expr(expr)?;
                    self.emit(OpCode::Return, expr.pos);
                    produced_value = true;
                }
                _ => self.compile_stmt(stmt)?,
            }
        }
        if !produced_value {
            let pos = Pos::default();
            self.emit(OpCode::None, pos);
            self.emit(OpCode::Return, pos);
        }

        let Some(state) = self.funcs.pop() else {
            return Err(SyntaxError::new(
                Stage::Compile,
                "Internal compiler state lost.",
                Pos::default(),
            ));
        };

        // Commit
        for name in self.pending_globals.drain(..) {
            self.vm.globals.declare(name);
        }
        for (name, module) in self.pending_imports.drain(..) {
            self.vm.imports.insert(name, module);
        }
        Ok(state.chunk)
    }

    // ============ Helpers ============

    #[inline]
    fn func(&mut self) -> &mut FuncState {
        let last = self.funcs.len() - 1;
        &mut self.funcs[last]
    }

    #[inline]
    fn in_function(&self) -> bool {
        self.funcs.len() > 1
    }

    #[inline]
    fn emit(&mut self, op: OpCode, pos: Pos) -> usize {
        self.func().chunk.emit(op, pos)
    }

    fn error(&self, message: impl Into<String>, pos: Pos) -> SyntaxError {
        SyntaxError::new(Stage::Compile, message, pos)
    }

    fn constant(&mut self, value: Value, pos: Pos) {
        let index = self.func().chunk.add_constant(value);
        self.emit(OpCode::Const(index), pos);
    }

    fn resolve(&self, name: &str) -> Resolved {
        if self.in_function() {
            if let Some(state) = self.funcs.last() {
                if let Some(i) = state.locals.iter().rposition(|local| local == name) {
                    return Resolved::Local(i as u32);
                }
            }
        }
        if let Some((_, module)) = self.pending_imports.iter().find(|(n, _)| n == name) {
            return Resolved::Module(*module);
        }
        if let Some(&module) = self.vm.imports.get(name) {
            return Resolved::Module(module);
        }
        if let Some(slot) = self.vm.globals.slot(name) {
            return Resolved::Global(slot);
        }
        if let Some(i) = self.pending_globals.iter().position(|n| n == name) {
            return Resolved::Global(self.global_base + i as u32);
        }
        Resolved::Undefined
    }

    fn declare_global(&mut self, name: &SmolStr) {
        if self.vm.globals.slot(name).is_none() && !self.pending_globals.contains(name) {
            self.pending_globals.push(name.clone());
        }
    }

    fn declare_local(&mut self, name: &SmolStr) -> u32 {
        let state = self.func();
        state.locals.push(name.clone());
        let slot = (state.locals.len() - 1) as u32;
        state.chunk.num_locals = state.chunk.num_locals.max(slot + 1);
        slot
    }

    /// Names that can't be rebound by script code.
    fn check_assignable(&self, name: &str, pos: Pos) -> CompileResult<()> {
        match self.resolve(name) {
            Resolved::Module(_) => Err(self.error(
                format!("Can't assign to `{}`, it names an imported module.", name),
                pos,
            )),
            Resolved::Global(slot) if self.vm.globals.is_builtin(slot) => Err(self.error(
                format!("Can't assign to built-in `{}`.", name),
                pos,
            )),
            _ => Ok(()),
        }
    }

    // ============ Hoisting ============

    fn hoist(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            match stmt {
                Stmt::Assign { name, pos, .. } => {
                    self.check_assignable(name, *pos)?;
                    self.declare_global(name);
                }
                Stmt::Func(decl) => {
                    self.check_assignable(&decl.name, decl.pos)?;
                    self.declare_global(&decl.name);
                }
                Stmt::Import { name, pos } => self.import_module(name, *pos)?,
                Stmt::If {
                    branches,
                    else_body,
                } => {
                    for (_, body) in branches {
                        self.hoist(body)?;
                    }
                    if let Some(body) = else_body {
                        self.hoist(body)?;
                    }
                }
                Stmt::While { body, .. } => self.hoist(body)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn import_module(&mut self, name: &SmolStr, pos: Pos) -> CompileResult<()> {
        if matches!(self.resolve(name), Resolved::Module(_)) {
            return Ok(());
        }
        if self.vm.globals.slot(name).is_some() || self.pending_globals.contains(name) {
            return Err(self.error(
                format!("Can't import `{}`, the name is already bound.", name),
                pos,
            ));
        }

        match self.vm.load_module(name) {
            Ok(module) => {
                self.pending_imports.push((name.clone(), module));
                Ok(())
            }
            Err(message) => Err(self.error(message, pos)),
        }
    }

    // ============ Statements ============

    fn compile_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, expr.pos);
            }
            Stmt::Assign {
                name,
                value,
                declare,
                pos,
            } => {
                self.compile_expr(value)?;
                self.store(name, *declare, *pos)?;
            }
            Stmt::SetIndex {
                object,
                index,
                value,
                pos,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit(OpCode::SetIndex, *pos);
            }
            Stmt::Import { name, pos } => self.import_module(name, *pos)?,
            Stmt::Func(decl) => {
                let function = self.compile_function(decl)?;
                self.constant(function, decl.pos);
                self.store(&decl.name, false, decl.pos)?;
            }
            Stmt::Return { value, pos } => {
                if !self.in_function() {
                    return Err(self.error("`return` outside of a function.", *pos));
                }
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => {
                        self.emit(OpCode::None, *pos);
                    }
                }
                self.emit(OpCode::Return, *pos);
            }
            Stmt::If {
                branches,
                else_body,
            } => {
                let mut end_jumps = Vec::with_capacity(branches.len());
                for (cond, body) in branches {
                    self.compile_expr(cond)?;
                    let next = self.emit(OpCode::JumpIfFalse(0), cond.pos);
                    self.compile_block(body)?;
                    end_jumps.push(self.emit(OpCode::Jump(0), cond.pos));
                    self.func().chunk.patch_jump(next);
                }
                if let Some(body) = else_body {
                    self.compile_block(body)?;
                }
                for jump in end_jumps {
                    self.func().chunk.patch_jump(jump);
                }
            }
            Stmt::While { cond, body } => {
                let start = self.func().chunk.code.len() as u32;
                self.compile_expr(cond)?;
                let exit = self.emit(OpCode::JumpIfFalse(0), cond.pos);
                self.func().loops.push(LoopState { breaks: Vec::new() });
                self.compile_block(body)?;
                self.emit(OpCode::Jump(start), cond.pos);
                self.func().chunk.patch_jump(exit);
                if let Some(state) = self.func().loops.pop() {
                    for jump in state.breaks {
                        self.func().chunk.patch_jump(jump);
                    }
                }
            }
            Stmt::Break(pos) => {
                if self.func().loops.is_empty() {
                    return Err(self.error("`break` outside of a loop.", *pos));
                }
                let jump = self.emit(OpCode::Jump(0), *pos);
                if let Some(state) = self.func().loops.last_mut() {
                    state.breaks.push(jump);
                }
            }
            Stmt::Pass => {}
        }
        Ok(())
    }

    /// Pops the top of stack into `name`.
    fn store(&mut self, name: &SmolStr, declare: bool, pos: Pos) -> CompileResult<()> {
        self.check_assignable(name, pos)?;

        if self.in_function() {
            let local = if declare {
                None
            } else {
                match self.resolve(name) {
                    Resolved::Local(slot) => Some(OpCode::SetLocal(slot)),
                    Resolved::Global(slot) => Some(OpCode::SetGlobal(slot)),
                    _ => None,
                }
            };
            let op = match local {
                Some(op) => op,
                None => OpCode::SetLocal(self.declare_local(name)),
            };
            self.emit(op, pos);
            return Ok(());
        }

        self.declare_global(name);
        match self.resolve(name) {
            Resolved::Global(slot) => {
                self.emit(OpCode::SetGlobal(slot), pos);
                Ok(())
            }
            _ => Err(self.error(format!("Can't assign to `{}`.", name), pos)),
        }
    }

    fn compile_function(&mut self, decl: &FuncDecl) -> CompileResult<Value> {
        let mut chunk = Chunk::new(
            decl.name.clone(),
            self.source.clone(),
            self.source_name.clone(),
        );
        chunk.num_params = decl.params.len() as u32;
        chunk.num_locals = chunk.num_params;

        let mut locals: Vec<SmolStr> = Vec::with_capacity(decl.params.len());
        for (param, pos) in &decl.params {
            if locals.contains(param) {
                return Err(self.error(format!("Duplicate parameter `{}`.", param), *pos));
            }
            locals.push(param.clone());
        }

        self.funcs.push(FuncState {
            chunk,
            locals,
            loops: Vec::new(),
        });
        let body = self.compile_block(&decl.body);
        let end_pos = decl.pos;
        self.emit(OpCode::None, end_pos);
        self.emit(OpCode::Return, end_pos);
        let state = self.funcs.pop();
        body?;

        let Some(state) = state else {
            return Err(self.error("Internal compiler state lost.", decl.pos));
        };
        let id = self.vm.heap.alloc(HeapObject::Function(ScriptFunction {
            name: decl.name.clone(),
            arity: decl.params.len() as u32,
            chunk: Rc::new(state.chunk),
        }));
        Ok(Value::object(id))
    }

    // ============ Expressions ============

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Number(n) => self.constant(Value::number(*n), pos),
            ExprKind::Str(s) => {
                let id = self.vm.heap.alloc(HeapObject::String(s.clone()));
                self.constant(Value::object(id), pos);
            }
            ExprKind::True => {
                self.emit(OpCode::True, pos);
            }
            ExprKind::False => {
                self.emit(OpCode::False, pos);
            }
            ExprKind::None => {
                self.emit(OpCode::None, pos);
            }
            ExprKind::List(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(OpCode::NewList(items.len() as u32), pos);
            }
            ExprKind::Name(name) => match self.resolve(name) {
                Resolved::Local(slot) => {
                    self.emit(OpCode::GetLocal(slot), pos);
                }
                Resolved::Global(slot) => {
                    self.emit(OpCode::GetGlobal(slot), pos);
                }
                Resolved::Module(_) => {
                    return Err(self.error(
                        format!(
                            "Module `{}` can't be used as a value, access its members with `{}.name`.",
                            name, name
                        ),
                        pos,
                    ));
                }
                Resolved::Undefined => {
                    return Err(self.error(format!("Undefined symbol `{}`.", name), pos));
                }
            },
            ExprKind::Member { object, name } => {
                let module = match &object.kind {
                    ExprKind::Name(module_name) => match self.resolve(module_name) {
                        Resolved::Module(module) => Some((module_name, module)),
                        Resolved::Undefined => {
                            return Err(self.error(
                                format!("Undefined symbol `{}`.", module_name),
                                object.pos,
                            ));
                        }
                        _ => None,
                    },
                    _ => None,
                };
                let Some((module_name, module)) = module else {
                    return Err(self.error("Member access is only supported on modules.", pos));
                };
                let Some(function) = self.vm.modules.function(module, name) else {
                    return Err(self.error(
                        format!("Module `{}` has no member `{}`.", module_name, name),
                        pos,
                    ));
                };
                self.constant(function, pos);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(OpCode::GetIndex, pos);
            }
            ExprKind::Call { callee, args } => {
                if args.len() > MAX_CALL_ARGS {
                    return Err(self.error(
                        format!("Too many arguments, at most {} are allowed.", MAX_CALL_ARGS),
                        pos,
                    ));
                }
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(OpCode::Call(args.len() as u8), callee.pos);
            }
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                let op = match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Not => OpCode::Not,
                };
                self.emit(op, pos);
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                let op = match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Mod => OpCode::Mod,
                    BinaryOp::Pow => OpCode::Pow,
                    BinaryOp::Eq => OpCode::Eq,
                    BinaryOp::Ne => OpCode::Ne,
                    BinaryOp::Lt => OpCode::Lt,
                    BinaryOp::Le => OpCode::Le,
                    BinaryOp::Gt => OpCode::Gt,
                    BinaryOp::Ge => OpCode::Ge,
                };
                self.emit(op, pos);
            }
            ExprKind::And(lhs, rhs) => {
                self.compile_expr(lhs)?;
                let short = self.emit(OpCode::JumpIfFalseKeep(0), pos);
                self.emit(OpCode::Pop, pos);
                self.compile_expr(rhs)?;
                self.func().chunk.patch_jump(short);
            }
            ExprKind::Or(lhs, rhs) => {
                self.compile_expr(lhs)?;
                let short = self.emit(OpCode::JumpIfTrueKeep(0), pos);
                self.emit(OpCode::Pop, pos);
                self.compile_expr(rhs)?;
                self.func().chunk.patch_jump(short);
            }
        }
        Ok(())
    }
}
