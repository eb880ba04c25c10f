//! Testbench driver for the mica RV32 simulator core.
//!
//! Composes the memory map (flat RAM in front of the bus, testbench I/O at
//! [`IO_BASE`]), loads a flat binary image, and steps the core until it
//! requests a halt through the exit register or the cycle limit runs out.

mod logger;
mod tbio;

use clap::Parser;
use clap_num::maybe_hex;
use log::{debug, LevelFilter};
use mica_core::bus::{Bus, Halt};
use mica_core::core::{Config, Core};
use mica_core::system_bus::SystemBus;
use std::path::PathBuf;
use std::process::ExitCode;
use std::{fs, process};
use tbio::TbIo;

const RAM_BASE: u32 = 0;
const RAM_SIZE_DEFAULT_KIB: u32 = 16 * 1024;
const IO_BASE: u32 = 0x8000_0000;
const RESET_VECTOR: u32 = RAM_BASE + 0x40;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Flat binary file loaded to the base of RAM.
    #[arg(long, value_name = "FILE")]
    bin: Option<PathBuf>,
    /// Print out memory contents between start and end (exclusive) after
    /// execution finishes. Can be passed multiple times.
    #[arg(long, num_args = 2, value_names = ["START", "END"], value_parser = maybe_hex::<u32>)]
    dump: Vec<u32>,
    /// Maximum number of cycles to run before exiting.
    #[arg(long, default_value_t = 100_000, value_parser = maybe_hex::<u64>)]
    cycles: u64,
    /// Memory size in units of 1024 bytes.
    #[arg(long, value_name = "KIB", default_value_t = RAM_SIZE_DEFAULT_KIB, value_parser = maybe_hex::<u32>)]
    memsize: u32,
    /// Exit with the code the CPU wrote to the testbench exit register, or
    /// 255 if the cycle limit was reached first.
    #[arg(long)]
    cpuret: bool,
    /// Print out execution tracing info.
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(if args.trace {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    });

    let ram_size = match args.memsize.checked_mul(1024) {
        Some(size) => size,
        None => {
            eprintln!("Memory size {} KiB does not fit the address space", args.memsize);
            process::exit(-1);
        }
    };

    let mut bus = SystemBus::new();
    bus.attach(IO_BASE, tbio::SIZE, Box::new(TbIo))
        .expect("I/O region mapping is static");

    let mut core = Core::new(
        bus,
        Config {
            reset_vector: RESET_VECTOR,
            ram_base: RAM_BASE,
            ram_size,
        },
    );

    if let Some(path) = &args.bin {
        let image = match fs::read(path) {
            Ok(image) => image,
            Err(err) => {
                eprintln!("Cannot read {}: {}", path.display(), err);
                process::exit(-1);
            }
        };
        if image.len() > ram_size as usize {
            eprintln!(
                "Binary file ({} bytes) is larger than memory ({} bytes)",
                image.len(),
                ram_size
            );
            process::exit(-1);
        }
        debug!("loading {} bytes to {:#010x}", image.len(), RAM_BASE);
        core.load(RAM_BASE, &image)
            .expect("RAM covers the loaded image");
    }

    let mut exit_code = 0;
    let mut halted = false;
    for cycle in 0..args.cycles {
        if let Err(Halt { exit_code: code }) = core.step() {
            println!("CPU requested halt. Exit code {}", code);
            println!("Ran for {} cycles", cycle + 1);
            exit_code = code;
            halted = true;
            break;
        }
    }
    if !halted && args.cpuret {
        exit_code = -1;
    }

    for range in args.dump.chunks(2) {
        dump_range(&mut core, range[0], range[1]);
    }

    if args.cpuret {
        ExitCode::from(exit_code as u8)
    } else {
        ExitCode::SUCCESS
    }
}

/// Prints memory between `start` and `end` (exclusive) as two-digit hex
/// bytes, sixteen per line. Unreadable bytes print as zero.
fn dump_range<B: Bus>(core: &mut Core<B>, start: u32, end: u32) {
    println!("Dumping memory from {:08x} to {:08x}:", start, end);
    for i in 0..end.wrapping_sub(start) {
        let byte = core.read8(start.wrapping_add(i)).unwrap_or(0);
        print!("{:02x}{}", byte, if i % 16 == 15 { '\n' } else { ' ' });
    }
    println!();
}
