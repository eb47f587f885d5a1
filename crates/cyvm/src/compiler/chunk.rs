use crate::compiler::token::Pos;
use crate::value::Value;
use smol_str::SmolStr;
use std::rc::Rc;

/// Stack machine instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    // Load operations
    Const(u32), // push K[i]
    None,
    True,
    False,
    Pop,

    // Variables
    GetGlobal(u32),
    SetGlobal(u32), // pops
    GetLocal(u32),
    SetLocal(u32), // pops

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Not,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Control flow
    Jump(u32),
    JumpIfFalse(u32),     // pops the condition
    JumpIfFalseKeep(u32), // `and`: keeps the operand when jumping
    JumpIfTrueKeep(u32),  // `or`: keeps the operand when jumping
    Call(u8),
    Return,

    // Lists
    NewList(u32),
    GetIndex,
    SetIndex, // pops list, index and value
}

/// Compiled unit: the top level of one eval, or one script function.
pub struct Chunk {
    pub name: SmolStr,
    pub code: Vec<OpCode>,
    /// Source position of each instruction.
    pub positions: Vec<Pos>,
    pub constants: Vec<Value>,
    pub num_params: u32,
    pub num_locals: u32,
    /// Source text the positions refer to, shared by all chunks of one eval.
    pub source: Rc<str>,
    pub source_name: SmolStr,
}

impl Chunk {
    pub fn new(name: impl Into<SmolStr>, source: Rc<str>, source_name: SmolStr) -> Self {
        Chunk {
            name: name.into(),
            code: Vec::new(),
            positions: Vec::new(),
            constants: Vec::new(),
            num_params: 0,
            num_locals: 0,
            source,
            source_name,
        }
    }

    #[inline]
    pub fn emit(&mut self, op: OpCode, pos: Pos) -> usize {
        self.code.push(op);
        self.positions.push(pos);
        self.code.len() - 1
    }

    pub fn add_constant(&mut self, value: Value) -> u32 {
        // numbers are deduplicated; heap constants are unique per site
        if value.is_number() {
            if let Some(i) = self
                .constants
                .iter()
                .position(|k| k.to_bits() == value.to_bits())
            {
                return i as u32;
            }
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Rewrites the jump at `at` to land on the next emitted instruction.
    pub fn patch_jump(&mut self, at: usize) {
        let target = self.code.len() as u32;
        match &mut self.code[at] {
            OpCode::Jump(t)
            | OpCode::JumpIfFalse(t)
            | OpCode::JumpIfFalseKeep(t)
            | OpCode::JumpIfTrueKeep(t) => *t = target,
            _ => {}
        }
    }

    pub fn position_at(&self, pc: usize) -> Pos {
        self.positions.get(pc).copied().unwrap_or_default()
    }
}
