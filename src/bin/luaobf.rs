// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::error::Error;
use std::fs;

use clap::{arg, Arg, ArgMatches, Command};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
//
use luaobf::bytecode::{chunk, Proto};
use luaobf::flatten::{flags, flatten_tree};
use luaobf::util::{FromHexString, ToHexString};
use luaobf::vm::{vm_protect, VmCodeStore};

fn main() -> Result<(), Box<dyn Error>> {
    // Parse command-line arguments
    let matches = Command::new("luaobf")
        .about("Bytecode obfuscation tool")
        .version("0.1.0")
        .subcommand_required(true)
        .arg(arg!(--verbose "Show verbose output"))
        .arg(Arg::new("log").long("log").takes_value(true).help("Append a transform debug log to this file"))
        .subcommand(
            Command::new("flatten")
                .about("Flatten the control flow of a bytecode chunk")
                .arg(Arg::new("target").required(true))
                .arg(Arg::new("out").short('o').long("out").takes_value(true))
                .arg(Arg::new("seed").long("seed").takes_value(true))
                .arg(arg!(--shuffle "Shuffle basic block states"))
                .arg(arg!(--bogus "Insert bogus blocks"))
                .arg(arg!(--encode "Encode state values"))
                .arg(arg!(--nested "Use the nested dispatcher"))
                .arg(arg!(--opaque "Interleave opaque predicates"))
                .arg(arg!(--interleave "Interleave fake functions"))
                .arg(arg!(--nops "Inject no-op padding"))
                .arg(arg!(--protect "Also apply VM protection"))
                .visible_alias("f"),
        )
        .subcommand(
            Command::new("protect")
                .about("Apply VM protection to a bytecode chunk")
                .arg(Arg::new("target").required(true))
                .arg(Arg::new("out").short('o').long("out").takes_value(true))
                .arg(Arg::new("seed").long("seed").takes_value(true))
                .visible_alias("p"),
        )
        .subcommand(
            Command::new("disassemble")
                .about("Print the instructions of a bytecode chunk")
                .arg(Arg::new("target").required(true))
                .visible_alias("d"),
        )
        .get_matches();
    // Extract top-level flags
    let verbose = matches.is_present("verbose");
    // Initialise logging
    init_logging(
        if verbose { LevelFilter::Debug } else { LevelFilter::Warn },
        matches.get_one::<String>("log").map(|s| s.as_str()),
    );
    // Dispatch on outcome
    let ok = match matches.subcommand() {
        Some(("flatten", args)) => flatten_chunk(args),
        Some(("protect", args)) => protect_chunk(args),
        Some(("disassemble", args)) => disassemble(args),
        _ => unreachable!(),
    }?;
    // Determine appropriate exit code
    let exitcode = if ok { 0 } else { 1 };
    // Done
    std::process::exit(exitcode);
}

/// Flatten every prototype in the given chunk.
fn flatten_chunk(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let mut proto = read_chunk(args)?;
    let seed = parse_seed(args)?;
    // Assemble the flag word
    let mut fl = flags::CFF;
    if args.is_present("shuffle") {
        fl |= flags::BLOCK_SHUFFLE;
    }
    if args.is_present("bogus") {
        fl |= flags::BOGUS_BLOCKS;
    }
    if args.is_present("encode") {
        fl |= flags::STATE_ENCODE;
    }
    if args.is_present("nested") {
        fl |= flags::NESTED_DISPATCHER;
    }
    if args.is_present("opaque") {
        fl |= flags::OPAQUE_PREDICATES;
    }
    if args.is_present("interleave") {
        fl |= flags::FUNC_INTERLEAVE;
    }
    if args.is_present("nops") {
        fl |= flags::RANDOM_NOP;
    }
    if args.is_present("protect") {
        fl |= flags::VM_PROTECT;
    }
    // Transform the whole closure tree
    let mut store = VmCodeStore::new();
    flatten_tree(&mut store, &mut proto, fl, seed)?;
    write_chunk(args, &proto)?;
    Ok(true)
}

/// Apply VM protection (only) to the root prototype of a chunk.
fn protect_chunk(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let mut proto = read_chunk(args)?;
    let seed = parse_seed(args)?;
    let mut store = VmCodeStore::new();
    vm_protect(&mut store, &mut proto, seed);
    write_chunk(args, &proto)?;
    Ok(true)
}

/// Print the instruction listing of a chunk.
fn disassemble(args: &ArgMatches) -> Result<bool, Box<dyn Error>> {
    let proto = read_chunk(args)?;
    print_proto(&proto, 0);
    Ok(true)
}

fn print_proto(proto: &Proto, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{}function: {} instructions, {} registers, mode {:#x}",
        indent,
        proto.sizecode(),
        proto.max_stacksize,
        proto.mode
    );
    for (pc, insn) in proto.code.iter().enumerate() {
        println!("{}  [{:03}] {}", indent, pc, insn);
    }
    for p in &proto.protos {
        print_proto(p, depth + 1);
    }
}

/// Read a hex-encoded chunk from the target file.
fn read_chunk(args: &ArgMatches) -> Result<Proto, Box<dyn Error>> {
    let target = args.get_one::<String>("target").unwrap();
    let mut hex = String::new();
    let context = fs::read_to_string(target)?;
    for l in context.lines() {
        hex.push_str(l.trim());
    }
    let bytes = hex.from_hex_string()?;
    Ok(chunk::from_bytes(&bytes)?)
}

/// Write a chunk out as hex, either to `--out` or to stdout.
fn write_chunk(args: &ArgMatches, proto: &Proto) -> Result<(), Box<dyn Error>> {
    let bytes = chunk::to_bytes(proto);
    let hex = bytes.to_hex_string();
    match args.get_one::<String>("out") {
        Some(path) => fs::write(path, hex)?,
        None => println!("{}", hex),
    }
    Ok(())
}

fn parse_seed(args: &ArgMatches) -> Result<u32, Box<dyn Error>> {
    match args.get_one::<String>("seed") {
        Some(s) => Ok(s.parse()?),
        None => Ok(0x5EED5EED),
    }
}

/// Initialise logging using a suitable pattern.  When a log path is
/// given, transform debug output is appended there as well.
pub fn init_logging(level: LevelFilter, log_path: Option<&str>) {
    let encoder = PatternEncoder::new("[{l}] {m}{n}");
    //
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(encoder))
        .build();
    //
    let mut builder = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");
    if let Some(path) = log_path {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
            .build(path)
            .unwrap();
        builder = builder.appender(Appender::builder().build("logfile", Box::new(file)));
        root = root.appender("logfile");
    }
    // A log file captures everything, regardless of verbosity.
    let effective = if log_path.is_some() { LevelFilter::Debug } else { level };
    let config = builder.build(root.build(effective)).unwrap();
    //
    let _handle = log4rs::init_config(config).unwrap();
}
