//! Whole-module compilation: parse, compile every function, then link.
//!
//! Functions are compiled in index order, so a call may reference a
//! function that has no code yet. Compilers report such calls as
//! [`UnlinkedCall`]s instead of resolving them, and [`link`] patches all of
//! them once every function has an entry address.

use crate::Engine;
use crate::error::{CompileError, LinkError, PlanError};
use crate::memory::Memory;
use crate::module::{FunctionInformation, ModuleInformation, Signature};
use crate::parse::ModuleParser;

/// Offset of a patchable call sequence inside a function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallLocation(pub usize);

/// A call whose target had no code when the caller was compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlinkedCall {
    pub call_location: CallLocation,
    /// Index into the module's defined functions.
    pub function_index: u32,
}

/// Code produced for one function.
pub trait CompiledCode {
    /// Address callers jump to. Must not change after compilation.
    fn entry_address(&self) -> usize;

    /// Point the call at `location` to `target`.
    fn patch_call(&mut self, location: CallLocation, target: usize) -> anyhow::Result<()>;

    /// Called once after every call has been patched.
    fn publish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct FunctionCompilation<T> {
    pub code: T,
    pub unlinked_calls: Vec<UnlinkedCall>,
}

/// Everything a compiler gets to see about one function.
pub struct CompileInput<'a> {
    pub function_index: usize,
    pub body: &'a [u8],
    /// Offset of `body` in the module buffer.
    pub body_offset: usize,
    pub signature: &'a Signature,
    pub memory: Option<&'a Memory>,
    /// Every defined function of the module, compiled or not.
    pub functions: &'a [FunctionInformation],
    /// Number of imported functions preceding `functions` in the index
    /// space of `call`.
    pub imported_functions: u32,
}

pub trait FunctionCompiler {
    type Code: CompiledCode;

    fn compile(
        &mut self,
        input: CompileInput<'_>,
    ) -> Result<FunctionCompilation<Self::Code>, CompileError>;
}

/// Patch every unlinked call to its callee's entry address, then publish
/// all code.
///
/// Linking the same set twice writes the same targets again.
pub fn link<T: CompiledCode>(compilations: &mut [FunctionCompilation<T>]) -> Result<(), LinkError> {
    let entries: Vec<usize> = compilations
        .iter()
        .map(|compilation| compilation.code.entry_address())
        .collect();

    for (index, compilation) in compilations.iter_mut().enumerate() {
        for call in &compilation.unlinked_calls {
            let target = *entries.get(call.function_index as usize).ok_or_else(|| {
                LinkError::new(
                    index,
                    format!("call to undefined function {}", call.function_index),
                )
            })?;

            compilation
                .code
                .patch_call(call.call_location, target)
                .map_err(|err| LinkError::new(index, format!("{err:#}")))?;

            tracing::trace!(
                caller = index,
                callee = call.function_index,
                location = call.call_location.0,
                address = target,
                "patched call"
            );
        }
    }

    for (index, compilation) in compilations.iter_mut().enumerate() {
        compilation
            .code
            .publish()
            .map_err(|err| LinkError::new(index, format!("{err:#}")))?;
    }

    Ok(())
}

/// The result of compiling one module.
///
/// Any failure is terminal: a failed plan holds no compiled code and no
/// memory, only the first error encountered.
pub struct Plan<T> {
    module: ModuleInformation,
    compilations: Vec<FunctionCompilation<T>>,
    memory: Option<Memory>,
    error: Option<PlanError>,
    error_message: Option<String>,
}

struct Compiled<T> {
    module: ModuleInformation,
    compilations: Vec<FunctionCompilation<T>>,
    memory: Option<Memory>,
}

impl<T: CompiledCode> Plan<T> {
    /// Parse `bytes`, compile each function with `compiler` and link.
    ///
    /// `bytes` is only borrowed for the duration of the call; compilers
    /// that need the bodies later must copy them.
    pub fn new<C>(engine: &Engine, bytes: &[u8], compiler: &mut C) -> Self
    where
        C: FunctionCompiler<Code = T>,
    {
        match Self::run(engine, bytes, compiler) {
            Ok(compiled) => {
                tracing::debug!(
                    functions = compiled.compilations.len(),
                    calls = compiled
                        .compilations
                        .iter()
                        .map(|c| c.unlinked_calls.len())
                        .sum::<usize>(),
                    "plan compiled and linked"
                );
                Plan {
                    module: compiled.module,
                    compilations: compiled.compilations,
                    memory: compiled.memory,
                    error: None,
                    error_message: None,
                }
            }
            Err(err) => {
                tracing::debug!("plan failed: {err}");
                Plan {
                    module: ModuleInformation::default(),
                    compilations: Vec::new(),
                    memory: None,
                    error_message: Some(err.to_string()),
                    error: Some(err),
                }
            }
        }
    }

    fn run<C>(engine: &Engine, bytes: &[u8], compiler: &mut C) -> Result<Compiled<T>, PlanError>
    where
        C: FunctionCompiler<Code = T>,
    {
        let mut parser = ModuleParser::new(engine, bytes);
        parser.parse()?;
        let (module, memory) = parser.into_parts();

        let imported_functions = module.imported_function_count();
        let mut compilations = Vec::with_capacity(module.functions.len());

        for (index, function) in module.functions.iter().enumerate() {
            let body = function
                .body(bytes)
                .ok_or_else(|| CompileError::new(index, "function body lies outside the module"))?;
            let signature = module.signature(function.signature).ok_or_else(|| {
                CompileError::new(
                    index,
                    format!("signature {} is not declared", function.signature.0),
                )
            })?;

            let compilation = compiler.compile(CompileInput {
                function_index: index,
                body,
                body_offset: function.start,
                signature,
                memory: memory.as_ref(),
                functions: &module.functions,
                imported_functions,
            })?;
            compilations.push(compilation);
        }

        link(&mut compilations)?;

        Ok(Compiled {
            module,
            compilations,
            memory,
        })
    }
}

impl<T> Plan<T> {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&PlanError> {
        self.error.as_ref()
    }

    /// The terminal error's message, exactly as the failing stage reported it.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Turn a failed plan into its error.
    pub fn into_result(mut self) -> Result<Self, PlanError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn module_information(&self) -> &ModuleInformation {
        &self.module
    }

    pub fn compilations(&self) -> &[FunctionCompilation<T>] {
        &self.compilations
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    /// Take ownership of the module's memory.
    pub fn take_memory(&mut self) -> Option<Memory> {
        self.memory.take()
    }
}

impl<T: CompiledCode> Plan<T> {
    pub fn entry_address(&self, function_index: usize) -> Option<usize> {
        self.compilations
            .get(function_index)
            .map(|compilation| compilation.code.entry_address())
    }
}
