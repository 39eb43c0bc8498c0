use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{command, Arg, ArgAction};
use objthunk::{Converter, FunctionList};

fn main() -> Result<()> {
    let matches = command!()
        .max_term_width(100)
        .args(&[
            Arg::new("input")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("The 32-bit relocatable object to convert"),
            Arg::new("flist")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help(
                    "The function list. Each line names a function crossing the 32/64-bit \
                    boundary: <name> <return_type> [<arg_type> ...], with types drawn from \
                    void, int, uint, long, ulong, longlong, ulonglong, and ptr",
                ),
            Arg::new("output")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Where to write the converted 64-bit object"),
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        ])
        .get_matches();

    if matches.get_flag("verbose") {
        env_logger::builder()
            .format_level(false)
            .format_target(false)
            .filter_module("objthunk", log::LevelFilter::Debug)
            .init();
    }

    let in_path = matches.get_one::<PathBuf>("input").unwrap();
    let flist_path = matches.get_one::<PathBuf>("flist").unwrap();
    let out_path = matches.get_one::<PathBuf>("output").unwrap();

    let flist_data = fs::read(flist_path)
        .with_context(|| format!("Failed to read function list '{}'", flist_path.display()))?;
    let functions = FunctionList::parse(&flist_data)
        .with_context(|| format!("Failed to parse function list '{}'", flist_path.display()))?;

    let in_file = fs::File::open(in_path)
        .with_context(|| format!("Failed to open input file '{}'", in_path.display()))?;
    let in_data = unsafe { memmap2::Mmap::map(&in_file) }
        .with_context(|| format!("Failed to map input file '{}'", in_path.display()))?;
    let in_data = &*in_data;

    let mut converter = Converter::read(in_data, &functions)
        .with_context(|| format!("Failed to parse input file '{}'", in_path.display()))?;
    converter
        .convert()
        .with_context(|| format!("Failed to convert '{}'", in_path.display()))?;

    let out_data = converter.finish();
    fs::write(out_path, &out_data)
        .with_context(|| format!("Failed to write output file '{}'", out_path.display()))?;
    Ok(())
}
