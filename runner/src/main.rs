use std::env;
use std::process;

use tracing::info;
use tracing_subscriber::EnvFilter;

use mipsrec_exec::{run_program, ExecStats, ExitReason};
use mipsrec_frontend::mips::cpu::{CAUSE, EPC, SR};
use mipsrec_frontend::mips::{interp, R3051};

const DEFAULT_MAX_BLOCKS: u64 = 1024;

fn usage() -> ! {
    eprintln!("usage: mipsrec [--interp] [--pc HEX] OPCODE_HEX...");
    process::exit(1);
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut interp_mode = false;
    let mut base_pc: Option<u32> = None;
    let mut words: Vec<u32> = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--interp" => interp_mode = true,
            "--pc" => {
                let value = args.next().unwrap_or_else(|| usage());
                base_pc = Some(parse_hex(&value).unwrap_or_else(|| usage()));
            }
            other => match parse_hex(other) {
                Some(word) => words.push(word),
                None => usage(),
            },
        }
    }
    if words.is_empty() {
        usage();
    }

    let max_blocks = env::var("MIPSREC_MAX_BLOCKS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_BLOCKS);

    let mut cpu = Box::new(R3051::new());
    let base_pc = base_pc.unwrap_or(cpu.pc);
    cpu.pc = base_pc;

    if interp_mode {
        info!(pc = format_args!("{base_pc:08x}"), "interpreting");
        interp::run(&mut cpu, &words);
    } else {
        let mut stats = ExecStats::default();
        match run_program(&mut cpu, base_pc, &words, max_blocks, &mut stats) {
            Ok(ExitReason::LeftProgram(pc)) => {
                info!(pc = format_args!("{pc:08x}"), "guest left the program")
            }
            Ok(ExitReason::BlockLimit) => info!(max_blocks, "block limit reached"),
            Err(e) => {
                eprintln!("mipsrec: {e}");
                process::exit(1);
            }
        }
        println!("{stats}");
    }

    for (i, &value) in cpu.registers.iter().enumerate() {
        if value != 0 {
            println!("r{i:<2} = {value:08x}");
        }
    }
    println!("pc  = {:08x}", cpu.pc);
    println!(
        "sr={:08x} cause={:08x} epc={:08x}",
        cpu.cop0.read_register(SR),
        cpu.cop0.read_register(CAUSE),
        cpu.cop0.read_register(EPC)
    );
}
