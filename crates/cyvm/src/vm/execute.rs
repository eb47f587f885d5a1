// Interpreter
// Stack machine over `OpCode`. Script calls push a frame (no Rust
// recursion); native calls run on the caller's Rust stack with a copy of
// their arguments while the originals stay on the value stack as roots.

use crate::compiler::{Chunk, OpCode};
use crate::heap::{HeapObject, NativeFn};
use crate::value::Value;
use crate::vm::error::write_location;
use crate::vm::{CyError, CyResult, Vm, write_number};
use smol_str::SmolStr;
use std::rc::Rc;
use tracing::debug;

pub(crate) struct CallFrame {
    pub chunk: Rc<Chunk>,
    pub pc: usize,
    /// Stack index of local slot 0.
    pub base: usize,
}

enum Callee {
    Script {
        chunk: Rc<Chunk>,
        arity: u32,
        name: SmolStr,
    },
    Native {
        func: NativeFn,
        arity: u32,
        name: SmolStr,
    },
}

impl Vm {
    /// Runs a top-level chunk to completion. On failure the error report is
    /// written and the stack is unwound to where it started.
    pub(crate) fn execute(&mut self, chunk: Rc<Chunk>) -> CyResult<Value> {
        let stack_base = self.stack.len();
        let entry_depth = self.frames.len();
        self.frames.push(CallFrame {
            chunk,
            pc: 0,
            base: stack_base,
        });

        let result = self.run(entry_depth);
        if let Err(err) = result {
            self.write_runtime_report(err, entry_depth);
        }
        self.frames.truncate(entry_depth);
        self.stack.truncate(stack_base);
        result
    }

    fn run(&mut self, entry_depth: usize) -> CyResult<Value> {
        loop {
            let (op, base) = {
                let Some(frame) = self.frames.last_mut() else {
                    return Err(self.internal_error("no active call frame"));
                };
                let Some(&op) = frame.chunk.code.get(frame.pc) else {
                    return Err(self.internal_error("program counter out of range"));
                };
                frame.pc += 1;
                (op, frame.base)
            };

            match op {
                OpCode::Const(index) => {
                    let value = self
                        .frames
                        .last()
                        .and_then(|frame| frame.chunk.constants.get(index as usize).copied());
                    match value {
                        Some(value) => self.push(value)?,
                        None => return Err(self.internal_error("constant index out of range")),
                    }
                }
                OpCode::None => self.push(Value::NONE)?,
                OpCode::True => self.push(Value::TRUE)?,
                OpCode::False => self.push(Value::FALSE)?,
                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::GetGlobal(slot) => match self.globals.get(slot) {
                    Some(value) => self.push(value)?,
                    None => {
                        let name = self.globals.name(slot).to_string();
                        return Err(self.panic(format!(
                            "`{}` is used before it was assigned.",
                            name
                        )));
                    }
                },
                OpCode::SetGlobal(slot) => {
                    let value = self.pop()?;
                    if !self.globals.set(slot, value) {
                        return Err(self.internal_error("global slot out of range"));
                    }
                }
                OpCode::GetLocal(slot) => match self.stack.get(base + slot as usize) {
                    Some(&value) => self.push(value)?,
                    None => return Err(self.internal_error("local slot out of range")),
                },
                OpCode::SetLocal(slot) => {
                    let value = self.pop()?;
                    match self.stack.get_mut(base + slot as usize) {
                        Some(local) => *local = value,
                        None => return Err(self.internal_error("local slot out of range")),
                    }
                }

                OpCode::Add => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
                        self.push(Value::number(a + b))?;
                    } else if let (Some(a), Some(b)) = (self.as_str(lhs), self.as_str(rhs)) {
                        let mut joined = String::with_capacity(a.len() + b.len());
                        joined.push_str(a);
                        joined.push_str(b);
                        let id = self.heap.alloc(HeapObject::String(SmolStr::new(joined)));
                        self.push(Value::object(id))?;
                        self.safe_point();
                    } else {
                        return Err(self.operand_error("+", lhs, rhs));
                    }
                }
                OpCode::Sub => self.arith("-", |a, b| a - b)?,
                OpCode::Mul => self.arith("*", |a, b| a * b)?,
                OpCode::Div => self.arith("/", |a, b| a / b)?,
                OpCode::Mod => self.arith("%", |a, b| a % b)?,
                OpCode::Pow => self.arith("^", f64::powf)?,
                OpCode::Neg => {
                    let value = self.pop()?;
                    match value.as_number() {
                        Some(n) => self.push(Value::number(-n))?,
                        None => {
                            let ty = self.type_name(value);
                            return Err(self.panic(format!("Can't negate a value of type `{}`.", ty)));
                        }
                    }
                }
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::boolean(!value.is_truthy()))?;
                }

                OpCode::Eq => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let eq = self.values_equal(lhs, rhs);
                    self.push(Value::boolean(eq))?;
                }
                OpCode::Ne => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let eq = self.values_equal(lhs, rhs);
                    self.push(Value::boolean(!eq))?;
                }
                OpCode::Lt => self.compare("<", |o| o.is_lt())?,
                OpCode::Le => self.compare("<=", |o| o.is_le())?,
                OpCode::Gt => self.compare(">", |o| o.is_gt())?,
                OpCode::Ge => self.compare(">=", |o| o.is_ge())?,

                OpCode::Jump(target) => self.jump(target),
                OpCode::JumpIfFalse(target) => {
                    if !self.pop()?.is_truthy() {
                        self.jump(target);
                    }
                }
                OpCode::JumpIfFalseKeep(target) => {
                    if !self.peek()?.is_truthy() {
                        self.jump(target);
                    }
                }
                OpCode::JumpIfTrueKeep(target) => {
                    if self.peek()?.is_truthy() {
                        self.jump(target);
                    }
                }
                OpCode::Call(argc) => self.call(argc as usize)?,
                OpCode::Return => {
                    let result = self.pop()?;
                    let Some(frame) = self.frames.pop() else {
                        return Err(self.internal_error("return without a frame"));
                    };
                    if self.frames.len() == entry_depth {
                        return Ok(result);
                    }
                    // drop locals, arguments and the callee slot
                    self.stack.truncate(frame.base.saturating_sub(1));
                    self.push(result)?;
                }

                OpCode::NewList(count) => {
                    let count = count as usize;
                    if count > self.stack.len() {
                        return Err(self.internal_error("value stack underflow"));
                    }
                    let items = self.stack.split_off(self.stack.len() - count);
                    let id = self.heap.alloc(HeapObject::List(items));
                    self.push(Value::object(id))?;
                    self.safe_point();
                }
                OpCode::GetIndex => {
                    let index = self.pop()?;
                    let list = self.pop()?;
                    let i = self.list_index(list, index)?;
                    let item = self.list_items(list).and_then(|items| items.get(i).copied());
                    match item {
                        Some(item) => self.push(item)?,
                        None => return Err(self.internal_error("list index out of range")),
                    }
                }
                OpCode::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let list = self.pop()?;
                    let i = self.list_index(list, index)?;
                    let object = match list.as_object_id() {
                        Some(id) => self.heap.get_mut(id),
                        None => None,
                    };
                    let slot = match object {
                        Some(HeapObject::List(items)) => items.get_mut(i),
                        _ => None,
                    };
                    match slot {
                        Some(slot) => *slot = value,
                        None => return Err(self.internal_error("list index out of range")),
                    }
                }
            }
        }
    }

    // ============ Stack ============

    #[inline]
    fn push(&mut self, value: Value) -> CyResult<()> {
        if self.stack.len() >= self.option.max_stack_size {
            return Err(self.panic("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> CyResult<Value> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.internal_error("value stack underflow")),
        }
    }

    #[inline]
    fn peek(&mut self) -> CyResult<Value> {
        match self.stack.last() {
            Some(&value) => Ok(value),
            None => Err(self.internal_error("value stack underflow")),
        }
    }

    #[inline]
    fn jump(&mut self, target: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target as usize;
        }
    }

    /// Allocation-driven collection; everything live is on the stack here.
    fn safe_point(&mut self) {
        if self.heap.should_collect(self.option.gc_step_objects) {
            self.collect_roots();
        }
    }

    // ============ Errors ============

    pub(crate) fn panic(&mut self, message: impl Into<String>) -> CyError {
        self.error_message = message.into();
        CyError::Panic
    }

    pub(crate) fn internal_error(&mut self, message: impl Into<String>) -> CyError {
        self.error_message = message.into();
        CyError::Unknown
    }

    fn operand_error(&mut self, op: &str, lhs: Value, rhs: Value) -> CyError {
        let message = format!(
            "Can't apply `{}` to `{}` and `{}`.",
            op,
            self.type_name(lhs),
            self.type_name(rhs)
        );
        self.panic(message)
    }

    /// Builds the report for a runtime failure from the frames still active.
    /// The innermost frame gets a source excerpt; enclosing calls are listed
    /// below it.
    fn write_runtime_report(&mut self, err: CyError, entry_depth: usize) {
        let mut out = String::with_capacity(self.error_message.len() + 128);
        out.push_str(if err == CyError::Panic { "panic: " } else { "error: " });
        out.push_str(&self.error_message);
        out.push_str("\n\n");

        let active = &self.frames[entry_depth.min(self.frames.len())..];
        if let Some(frame) = active.last() {
            let pos = frame.chunk.position_at(frame.pc.saturating_sub(1));
            write_location(&mut out, &frame.chunk.source_name, &frame.chunk.source, pos);
        }
        if active.len() > 1 {
            out.push_str("\nstack trace:\n");
            for frame in active.iter().rev() {
                let pos = frame.chunk.position_at(frame.pc.saturating_sub(1));
                out.push_str("  ");
                out.push_str(&frame.chunk.name);
                out.push_str(" at ");
                out.push_str(&frame.chunk.source_name);
                out.push(':');
                out.push_str(itoa::Buffer::new().format(pos.line));
                out.push(':');
                out.push_str(itoa::Buffer::new().format(pos.col));
                out.push('\n');
            }
        }

        debug!(kind = ?err, "runtime failure");
        self.error_report.set(out);
    }

    // ============ Operations ============

    fn arith(&mut self, symbol: &str, f: impl Fn(f64, f64) -> f64) -> CyResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => self.push(Value::number(f(a, b))),
            _ => Err(self.operand_error(symbol, lhs, rhs)),
        }
    }

    fn compare(&mut self, symbol: &str, test: impl Fn(std::cmp::Ordering) -> bool) -> CyResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let ordering = if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            a.partial_cmp(&b)
        } else if let (Some(a), Some(b)) = (self.as_str(lhs), self.as_str(rhs)) {
            Some(a.cmp(b))
        } else {
            return Err(self.operand_error(symbol, lhs, rhs));
        };
        // NaN compares false both ways
        let result = ordering.is_some_and(test);
        self.push(Value::boolean(result))
    }

    pub(crate) fn values_equal(&self, lhs: Value, rhs: Value) -> bool {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return a == b;
        }
        if lhs == rhs {
            return true;
        }
        match (self.as_str(lhs), self.as_str(rhs)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn list_index(&mut self, list: Value, index: Value) -> CyResult<usize> {
        let Some(len) = self.list_items(list).map(|items| items.len()) else {
            let ty = self.type_name(list);
            return Err(self.panic(format!("Can't index a value of type `{}`.", ty)));
        };
        let Some(n) = index.as_number() else {
            let ty = self.type_name(index);
            return Err(self.panic(format!("List index must be a number, found `{}`.", ty)));
        };
        if n.fract() != 0.0 || n < 0.0 || n >= len as f64 {
            let mut text = String::new();
            write_number(&mut text, n);
            return Err(self.panic(format!(
                "Index {} is out of bounds for a list of length {}.",
                text, len
            )));
        }
        Ok(n as usize)
    }

    fn call(&mut self, argc: usize) -> CyResult<()> {
        if argc >= self.stack.len() {
            return Err(self.internal_error("value stack underflow"));
        }
        let callee_index = self.stack.len() - argc - 1;
        let callee_value = self.stack[callee_index];

        let callee = match callee_value.as_object_id().and_then(|id| self.heap.get(id)) {
            Some(HeapObject::Function(func)) => Callee::Script {
                chunk: func.chunk.clone(),
                arity: func.arity,
                name: func.name.clone(),
            },
            Some(HeapObject::Native(func)) => Callee::Native {
                func: func.func.clone(),
                arity: func.arity,
                name: func.name.clone(),
            },
            _ => {
                let ty = self.type_name(callee_value);
                return Err(self.panic(format!("Can't call a value of type `{}`.", ty)));
            }
        };

        match callee {
            Callee::Script { chunk, arity, name } => {
                if argc != arity as usize {
                    return Err(self.arity_error(&name, arity, argc));
                }
                if self.frames.len() >= self.option.max_call_depth {
                    return Err(self.panic("Stack overflow."));
                }
                let base = callee_index + 1;
                for _ in chunk.num_params..chunk.num_locals {
                    self.push(Value::NONE)?;
                }
                self.frames.push(CallFrame { chunk, pc: 0, base });
                Ok(())
            }
            Callee::Native { func, arity, name } => {
                if argc != arity as usize {
                    return Err(self.arity_error(&name, arity, argc));
                }
                let args: Vec<Value> = self.stack[callee_index + 1..].to_vec();

                self.native_depth += 1;
                let result = func(self, &args);
                self.native_depth -= 1;

                if result.is_interrupt() {
                    return Err(CyError::Panic);
                }
                if let Some(id) = result.as_object_id() {
                    if !self.heap.contains(id) {
                        return Err(self.internal_error(format!(
                            "native function `{}` returned a freed object",
                            name
                        )));
                    }
                }
                self.stack.truncate(callee_index);
                self.push(result)
            }
        }
    }

    fn arity_error(&mut self, name: &str, arity: u32, argc: usize) -> CyError {
        self.panic(format!(
            "`{}` expects {} argument{}, got {}.",
            name,
            arity,
            if arity == 1 { "" } else { "s" },
            argc
        ))
    }
}
