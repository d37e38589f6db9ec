//! Lists or extracts the contents of a MAGSAV backup tape.

use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::debug;

use magsav::{
    block::{BlockSource, TapImage},
    limits::Limits,
    output::HostFs,
    path::PatternSet,
    session::{Options, Session, Summary},
    tape::{TapeDevice, DEFAULT_DEVICE},
    volume::{ConsoleOperator, VolumeContinuation},
};

/// magsav
#[derive(Debug, Parser)]
#[clap(name = "magsav", version)]
struct App {
    /// Only list the matching entries; wins over -x
    #[clap(short = 't', long = "list")]
    list: bool,
    /// Extract the matching entries (the default)
    #[clap(short = 'x', long)]
    #[allow(dead_code)]
    extract: bool,
    /// Print the protection, date and path of each matching entry
    #[clap(short, long)]
    verbose: bool,
    /// Map tape protections to file modes instead of creating files 0644
    #[clap(short, long)]
    preserve_permissions: bool,
    /// Clear the high bit of every data byte, for tapes written with parity set
    #[clap(long)]
    strip_parity: bool,
    /// Tape device to read; must be under /dev/
    #[clap(short = 'f', long = "file", default_value = DEFAULT_DEVICE)]
    device: PathBuf,
    /// Read a SIMH .tap image instead of a tape device
    #[clap(long, conflicts_with = "device")]
    image: Option<PathBuf>,
    /// Extract below this directory
    #[clap(short = 'C', long, default_value = ".")]
    directory: PathBuf,
    /// Bounds on path lengths and nesting read from the tape
    #[clap(long, value_enum, default_value_t = LimitsProfile::Default)]
    limits: LimitsProfile,
    /// Paths to select, lowercase and `/`-separated; none selects everything
    patterns: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
enum LimitsProfile {
    Strict,
    #[default]
    Default,
    Permissive,
}

impl From<LimitsProfile> for Limits {
    fn from(profile: LimitsProfile) -> Self {
        match profile {
            LimitsProfile::Strict => Limits::strict(),
            LimitsProfile::Default => Limits::default(),
            LimitsProfile::Permissive => Limits::permissive(),
        }
    }
}

fn decode(source: impl BlockSource, args: &App) -> Result<Summary> {
    let root = HostFs::open(&args.directory)
        .with_context(|| format!("opening {}", args.directory.display()))?;
    let options = Options {
        list_only: args.list,
        verbose: args.verbose,
        preserve_permissions: args.preserve_permissions,
        strip_parity: args.strip_parity,
        limits: args.limits.into(),
    };
    let patterns = PatternSet::new(args.patterns.iter().cloned());

    Ok(Session::new(source, root, std::io::stdout(), patterns, options).run()?)
}

fn main() -> Result<()> {
    env_logger::init();

    // usage errors exit 1 like every other failure
    let args = App::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(if e.use_stderr() { 1 } else { 0 })
    });

    let summary = match &args.image {
        Some(image) => {
            let file =
                File::open(image).with_context(|| format!("opening {}", image.display()))?;
            decode(TapImage::new(BufReader::new(file)), &args)?
        }
        None => {
            let device = TapeDevice::open(&args.device)
                .with_context(|| format!("opening {}", args.device.display()))?;
            decode(
                VolumeContinuation::new(device, ConsoleOperator::stdio()),
                &args,
            )?
        }
    };

    for pattern in &summary.missing {
        eprintln!("{pattern}: not on tape");
    }
    debug!("{summary:?}");

    Ok(())
}
