// Compiler pipeline: tokenize -> parse -> codegen
// Each stage reports failures as a positioned `SyntaxError`; the stage
// decides which result code the VM surfaces.
pub mod ast;
mod chunk;
mod codegen;
pub mod parser;
pub mod token;
pub mod tokenize;

pub use chunk::{Chunk, OpCode};
pub use codegen::{Compiler, MAX_CALL_ARGS};
pub use token::Pos;

use crate::vm::Vm;
use smol_str::SmolStr;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Token,
    Parse,
    Compile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub stage: Stage,
    pub message: String,
    pub pos: Pos,
}

impl SyntaxError {
    pub fn new(stage: Stage, message: impl Into<String>, pos: Pos) -> Self {
        SyntaxError {
            stage,
            message: message.into(),
            pos,
        }
    }
}

/// Compiles `source` into the top-level chunk of one eval. Module loaders
/// run from here, on the first import of their name.
pub fn compile_code(vm: &mut Vm, source: &str, source_name: &str) -> Result<Chunk, SyntaxError> {
    let tokens = tokenize::tokenize(source)?;
    let program = parser::parse(tokens)?;
    let source: Rc<str> = Rc::from(source);
    Compiler::new(vm, source, SmolStr::new(source_name)).compile_program(&program)
}
