//! Skeleton baseline compiler.
//!
//! Emits a frame, one patchable far call per `call` to a defined function,
//! and a return. Nothing else in the body is lowered; the output exists to
//! exercise call linking against real executable memory.

use wasmparser::{BinaryReader, FunctionBody, Operator};

use wasmplan_codegen::abi::Isa;
use wasmplan_codegen::code_buffer::CodeBuffer;
use wasmplan_codegen::emit::Emitter;

use crate::error::CompileError;
use crate::plan::{
    CallLocation, CompileInput, CompiledCode, FunctionCompilation, FunctionCompiler, UnlinkedCall,
};

#[derive(Debug, Clone, Copy)]
pub struct SkeletonCompiler {
    isa: Isa,
}

impl SkeletonCompiler {
    pub fn new(isa: Isa) -> Self {
        SkeletonCompiler { isa }
    }

    pub fn host() -> Self {
        Self::new(Isa::host())
    }
}

impl FunctionCompiler for SkeletonCompiler {
    type Code = SkeletonCode;

    fn compile(
        &mut self,
        input: CompileInput<'_>,
    ) -> Result<FunctionCompilation<SkeletonCode>, CompileError> {
        let index = input.function_index;
        let fail = |err: &dyn std::fmt::Display| CompileError::new(index, err.to_string());

        let body = FunctionBody::new(BinaryReader::new(input.body, input.body_offset));
        let operators = body.get_operators_reader().map_err(|e| fail(&e))?;

        let mut emitter = Emitter::new(self.isa);
        let mut unlinked_calls = Vec::new();
        emitter.prologue();

        for op in operators {
            let Operator::Call { function_index } = op.map_err(|e| fail(&e))? else {
                continue;
            };

            let Some(callee) = function_index.checked_sub(input.imported_functions) else {
                tracing::trace!(caller = index, function_index, "call to import not lowered");
                continue;
            };
            if callee as usize >= input.functions.len() {
                return Err(CompileError::new(
                    index,
                    format!("call to undeclared function {function_index}"),
                ));
            }

            let point = emitter.far_call();
            unlinked_calls.push(UnlinkedCall {
                call_location: CallLocation(point.offset),
                function_index: callee,
            });
        }

        emitter.epilogue();

        let code = emitter.into_code();
        let mut buffer =
            CodeBuffer::with_reserve(code.len(), code.len()).map_err(|e| fail(&format!("{e:#}")))?;
        buffer.emit_bytes(&code).map_err(|e| fail(&format!("{e:#}")))?;

        tracing::trace!(
            function = index,
            signature = %input.signature,
            bytes = code.len(),
            calls = unlinked_calls.len(),
            "compiled function"
        );

        Ok(FunctionCompilation {
            code: SkeletonCode { buffer },
            unlinked_calls,
        })
    }
}

/// One function's machine code in its own executable buffer.
#[derive(Debug)]
pub struct SkeletonCode {
    buffer: CodeBuffer,
}

impl SkeletonCode {
    pub fn code(&self) -> &[u8] {
        self.buffer.code()
    }

    /// The address currently written into the call at `location`.
    pub fn call_target(&self, location: CallLocation) -> Option<usize> {
        self.buffer.read_u64(location.0).map(|target| target as usize)
    }

    pub fn is_published(&self) -> bool {
        self.buffer.is_finalized()
    }
}

impl CompiledCode for SkeletonCode {
    fn entry_address(&self) -> usize {
        self.buffer.base_address()
    }

    fn patch_call(&mut self, location: CallLocation, target: usize) -> anyhow::Result<()> {
        self.buffer.patch_u64(location.0, target as u64)
    }

    fn publish(&mut self) -> anyhow::Result<()> {
        self.buffer.finalize()
    }
}
