use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{Level, Log, Metadata, Record};
use tiger_backend::{demo, Compiler, CompilerOptions};

#[derive(Parser)]
#[command(about = "Compiles a built-in IR program to x86-64 assembly")]
struct Args {
    /// Built-in program to compile, or `list` to print their names.
    #[arg(short, long, default_value = "arith")]
    program: String,
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Machine registers the allocator may use.
    #[arg(short, long, default_value_t = 15, value_parser = clap::value_parser!(u8).range(2..=15))]
    registers: u8,
    /// Write the canonical IR of each function as comments.
    #[arg(long)]
    dump_ir: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct StderrLogger {
    level: Level,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn init_logger(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::Warn,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace,
    };
    log::set_boxed_logger(Box::new(StderrLogger { level }))
        .map(|()| log::set_max_level(level.to_level_filter()))
        .context("failed to install logger")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose)?;

    if args.program == "list" {
        for name in demo::PROGRAMS {
            println!("{}", name);
        }
        return Ok(());
    }

    let options = CompilerOptions::new()
        .registers(args.registers as usize)
        .dump_ir(args.dump_ir);

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create file {}", path.display()))?;
            Compiler::new(io::BufWriter::new(file))
                .with_options(options)
                .compile(&args.program)
        }
        None => Compiler::new(io::stdout())
            .with_options(options)
            .compile(&args.program),
    }
    .with_context(|| format!("failed to compile {}", args.program))
}
