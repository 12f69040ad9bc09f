pub mod engine;
pub mod error;
pub mod jit;
pub mod memory;
pub mod module;
pub mod parse;
pub mod plan;

#[cfg(test)]
mod test_util;

pub use engine::Engine;
pub use error::{CompileError, ErrorKind, LinkError, MemoryError, ParseError, PlanError};
pub use memory::Memory;
pub use module::ModuleInformation;
pub use parse::{Decoder, ModuleParser};
pub use plan::{FunctionCompiler, Plan};
