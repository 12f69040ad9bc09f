pub mod abi;
pub mod code_buffer;
pub mod emit;
