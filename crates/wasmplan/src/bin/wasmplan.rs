use std::fmt::Write as _;
use std::io::Read;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wasmplan::jit::SkeletonCompiler;
use wasmplan::plan::CompiledCode;
use wasmplan::{Engine, Memory, ModuleParser, Plan};
use wasmplan_codegen::abi::Isa;

#[derive(Parser)]
#[command(name = "wasmplan", about = "WebAssembly module ingestion and compilation planning")]
struct Cli {
    #[command(flatten)]
    options: EngineOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct EngineOptions {
    /// Largest memory, in 64KiB pages, a module may declare.
    #[arg(long, global = true)]
    max_pages: Option<u32>,

    /// Target ISA for register pinning and code emission (aarch64, x86_64).
    #[arg(long, global = true)]
    isa: Option<Isa>,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a module and describe its structure and memory layout.
    Inspect {
        /// Path to a .wasm or .wat file. Reads from stdin if omitted.
        file: Option<String>,
    },
    /// Compile and link every function with the skeleton backend.
    Compile {
        /// Path to a .wasm or .wat file. Reads from stdin if omitted.
        file: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let isa = cli.options.isa.unwrap_or_else(Isa::host);
    let mut engine = Engine::default().with_calling_convention(isa.calling_convention());
    if let Some(pages) = cli.options.max_pages {
        engine = engine.with_max_page_count(pages);
    }

    match cli.command {
        Command::Inspect { file } => inspect(&engine, file),
        Command::Compile { file } => compile(&engine, isa, file),
    }
}

fn inspect(engine: &Engine, file: Option<String>) -> anyhow::Result<()> {
    let bytes = read_module(file)?;
    let mut parser = ModuleParser::new(engine, &bytes);
    parser.parse()?;

    let mut out = parser.module_information().render();
    if let Some(memory) = parser.memory() {
        out.push_str(&render_memory(engine, memory));
    }
    print!("{out}");
    Ok(())
}

fn compile(engine: &Engine, isa: Isa, file: Option<String>) -> anyhow::Result<()> {
    let bytes = read_module(file)?;
    let plan = Plan::new(engine, &bytes, &mut SkeletonCompiler::new(isa)).into_result()?;

    let mut out = String::new();
    for (index, compilation) in plan.compilations().iter().enumerate() {
        let code = &compilation.code;
        let _ = writeln!(
            out,
            "func[{index}] @ {:#x} ({} bytes)",
            code.entry_address(),
            code.code().len()
        );
        for call in &compilation.unlinked_calls {
            let target = code.call_target(call.call_location).unwrap_or_default();
            let _ = writeln!(
                out,
                "  +{:#06x} call func[{}] -> {target:#x}",
                call.call_location.0, call.function_index
            );
        }
    }
    if let Some(memory) = plan.memory() {
        out.push_str(&render_memory(engine, memory));
    }
    print!("{out}");
    Ok(())
}

fn render_memory(engine: &Engine, memory: &Memory) -> String {
    let cc = engine.calling_convention();
    let pinned = memory.pinned_registers();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "memory layout: {} bytes committed, {} capacity, {} reserved at {:p}",
        memory.size(),
        memory.capacity(),
        memory.mapped_capacity(),
        memory.base()
    );
    let _ = writeln!(out, "  base pointer: {}", cc.register_name(pinned.base_pointer));
    for size in &pinned.size_registers {
        let _ = writeln!(
            out,
            "  size register: {} (offset {})",
            cc.register_name(size.register),
            size.size_offset
        );
    }
    out
}

/// Binary modules are used as is; anything without the binary magic is
/// treated as text.
fn read_module(file: Option<String>) -> anyhow::Result<Vec<u8>> {
    let bytes = match file {
        Some(path) => std::fs::read(&path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    if bytes.starts_with(b"\0asm") {
        Ok(bytes)
    } else {
        Ok(wat::parse_bytes(&bytes)?.into_owned())
    }
}
