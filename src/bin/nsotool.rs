//! nsotool - NSO <-> ELF conversion tool
//!
//! Usage: nsotool [OPTIONS] <COMMAND> <INPUT> [OUTPUT]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use log::info;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let mut i = 1;
    let mut level = log::LevelFilter::Warn;
    while i < args.len() && args[i].starts_with('-') {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "-V" | "--version" => {
                println!("nsotool {}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "-v" | "--verbose" => {
                level = log::LevelFilter::Debug;
            }
            "-q" | "--quiet" => {
                level = log::LevelFilter::Error;
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                return ExitCode::from(1);
            }
        }
        i += 1;
    }

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if i >= args.len() {
        print_usage();
        return ExitCode::from(1);
    }

    let command = &args[i];
    let cmd_args: Vec<&str> = args[i + 1..].iter().map(|s| s.as_str()).collect();

    let result = match command.as_str() {
        "nso2elf" => handle_convert(&cmd_args, Direction::NsoToElf),
        "elf2nso" => handle_convert(&cmd_args, Direction::ElfToNso),
        "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

enum Direction {
    NsoToElf,
    ElfToNso,
}

fn handle_convert(args: &[&str], direction: Direction) -> anyhow::Result<()> {
    let Some(input) = args.first() else {
        anyhow::bail!("missing input file");
    };
    let input = Path::new(input);
    let output: PathBuf = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let ext = match direction {
                Direction::NsoToElf => "elf",
                Direction::ElfToNso => "nso",
            };
            input.with_extension(ext)
        }
    };

    let data = std::fs::read(input)
        .with_context(|| format!("reading {}", input.display()))?;
    info!("read {} bytes from {}", data.len(), input.display());

    let converted = match direction {
        Direction::NsoToElf => nsotool::nso_to_elf(&data)
            .with_context(|| format!("converting {}", input.display()))?,
        Direction::ElfToNso => nsotool::elf_to_nso(&data)
            .with_context(|| format!("converting {}", input.display()))?,
    };

    std::fs::write(&output, &converted)
        .with_context(|| format!("writing {}", output.display()))?;
    info!("wrote {} bytes to {}", converted.len(), output.display());

    println!("{} -> {}", input.display(), output.display());
    Ok(())
}

fn print_usage() {
    println!("nsotool - NSO <-> ELF conversion tool");
    println!();
    println!("USAGE:");
    println!("    nsotool [OPTIONS] <COMMAND> <INPUT> [OUTPUT]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Show this help message");
    println!("    -V, --version    Show version information");
    println!("    -v, --verbose    Enable debug diagnostics");
    println!("    -q, --quiet      Only report errors");
    println!();
    println!("COMMANDS:");
    println!("    nso2elf    Reconstruct an ELF from an NSO module");
    println!("    elf2nso    Pack an ELF into an NSO module");
    println!("    help       Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("    nsotool nso2elf main.nso main.elf");
    println!("    nsotool elf2nso module.elf");
}
