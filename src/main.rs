//! LC-3 Emulator - CLI Entry Point
//!
//! Commands:
//! - `lc3-vm run <image>` - Load an object image and run it until HALT
//! - `lc3-vm disasm <image>` - Print the image with its disassembly

use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter, Record};
use serde::Serialize;

use lc3::cpu::decode::disassemble_word;
use lc3::image::read_image_file;
use lc3::{Console, Cpu, CpuError, CpuState, ImageError, Instruction, Registers, StdioConsole, Terminal};

#[derive(Parser)]
#[command(name = "lc3-vm")]
#[command(version)]
#[command(about = "An emulator for the LC-3 16-bit educational computer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an object image until it halts
    Run {
        /// Path to the object image
        image: PathBuf,
        /// Address to start executing at
        #[arg(long, default_value = "0x3000", value_parser = parse_addr)]
        start: u16,
        /// Stop after this many instructions
        #[arg(short, long)]
        max_cycles: Option<u64>,
        /// Log every executed instruction to stderr
        #[arg(short, long)]
        trace: bool,
        /// Write the final machine state as JSON
        #[arg(long)]
        dump_state: Option<PathBuf>,
    },
    /// Disassemble an object image
    Disasm {
        /// Path to the object image
        image: PathBuf,
    },
}

/// Final machine state, as written by `--dump-state`.
#[derive(Serialize)]
struct StateDump<'a> {
    state: CpuState,
    cycles: u64,
    registers: &'a Registers,
    last_instruction: Option<Instruction>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if let Commands::Run { trace, .. } = cli.command {
        if trace {
            logger.filter_level(LevelFilter::Trace);
        }
        // The terminal is in raw mode while the program runs.
        if std::io::stdin().is_terminal() {
            logger.format(|buf, record| buf.write_all(raw_log_line(record).as_bytes()));
        }
    }
    logger.init();

    match cli.command {
        Commands::Run { image, start, max_cycles, dump_state, .. } => {
            run_program(&image, start, max_cycles, dump_state.as_deref())
        }
        Commands::Disasm { image } => disassemble_file(&image),
    }
}

/// Parse an address in decimal, `0x` hex or LC-3 style `x` hex.
fn parse_addr(s: &str) -> Result<u16, String> {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('x'))
        .or_else(|| s.strip_prefix('X'));
    match hex {
        Some(digits) => u16::from_str_radix(digits, 16),
        None => s.parse::<u16>(),
    }
    .map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// Log line with an explicit carriage return, for raw-mode terminals.
fn raw_log_line(record: &Record) -> String {
    format!("[{} {}] {}\r\n", record.level(), record.target(), record.args())
}

fn run_program(path: &Path, start: u16, max_cycles: Option<u64>, dump_state: Option<&Path>) -> ExitCode {
    let mut cpu = match load_program(path, start) {
        Ok(cpu) => cpu,
        Err(e) => {
            eprintln!("failed to load image: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // The terminal must be released before anything else is printed.
    let result = if std::io::stdin().is_terminal() {
        match Terminal::acquire() {
            Ok(mut terminal) => execute(&mut cpu, &mut terminal, max_cycles),
            Err(e) => {
                eprintln!("failed to set up terminal: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match StdioConsole::new() {
            Ok(mut console) => execute(&mut cpu, &mut console, max_cycles),
            Err(e) => {
                eprintln!("failed to set up console: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    if let Some(dump_path) = dump_state {
        if let Err(e) = write_state(dump_path, &cpu) {
            eprintln!("failed to write state to {}: {}", dump_path.display(), e);
        }
    }

    ExitCode::from(exit_status(&cpu, result))
}

/// Load the image at `path` into a fresh machine starting at `start`.
fn load_program(path: &Path, start: u16) -> Result<Cpu, ImageError> {
    let mut cpu = Cpu::new();
    let loaded = lc3::load_image_file(path, &mut cpu.mem)?;
    info!("loaded {} words at {:#06x} from {}", loaded.len, loaded.origin, path.display());
    cpu.regs.pc = start;
    Ok(cpu)
}

fn execute(cpu: &mut Cpu, io: &mut dyn Console, max_cycles: Option<u64>) -> Result<u64, CpuError> {
    match max_cycles {
        Some(limit) => cpu.run_limited(io, limit),
        None => cpu.run(io),
    }
}

/// Process status for a finished run: 0 on halt or cycle limit, 1 on abort.
fn exit_status(cpu: &Cpu, result: Result<u64, CpuError>) -> u8 {
    match result {
        Ok(executed) => {
            if cpu.is_running() {
                eprintln!("stopped after {} instructions (cycle limit)", executed);
            }
            0
        }
        Err(e) => {
            eprintln!("program aborted: {}", e);
            1
        }
    }
}

fn write_state(path: &Path, cpu: &Cpu) -> std::io::Result<()> {
    let dump = StateDump {
        state: cpu.state,
        cycles: cpu.cycles,
        registers: &cpu.regs,
        last_instruction: cpu.last_instruction(),
    };
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &dump)?;
    Ok(())
}

fn disassemble_file(path: &Path) -> ExitCode {
    let image = match read_image_file(path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("failed to load image: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("; {}", path.display());
    println!("; origin x{:04X}, {} words", image.origin, image.len());
    for (i, &word) in image.words.iter().enumerate() {
        let addr = image.origin.wrapping_add(i as u16);
        println!("x{:04X}: x{:04X}  {}", addr, word, disassemble_word(word));
    }

    ExitCode::SUCCESS
}
