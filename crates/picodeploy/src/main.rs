use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::*;
use picodeploy_core::{
    DeployOptions, Family,
    deploy::{DEFAULT_FILE_NAME, DEFAULT_TIMEOUT},
};

use std::{io::Write, path::PathBuf, time::Duration};

use crate::{config::load_config, convert::convert, deploy::deploy, info::info, inject::inject};

mod config;
mod convert;
mod deploy;
mod info;
mod inject;
mod reporter;

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a flat image to a UF2 file on disk
    #[command(arg_required_else_help = true)]
    Convert {
        /// Input image
        input: PathBuf,

        /// Output UF2 file
        output: PathBuf,

        /// Target family (rp2040, rp2350, etc.)
        #[clap(short, long, value_parser = family_parser, default_value = "rp2040")]
        family: Family,

        /// Load address of the image, defaults to the start of flash
        #[clap(long, value_parser = address_parser)]
        base: Option<u32>,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Embed a config document into a flat image
    #[command(arg_required_else_help = true)]
    Inject {
        /// Input image containing the config placeholder
        input: PathBuf,

        /// Output image
        output: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Deploy a flat image directly to a board in BOOTSEL mode
    #[command(arg_required_else_help = true)]
    Deploy {
        /// Input image
        input: PathBuf,

        /// Target family (rp2040, rp2350, etc.)
        #[clap(short, long, value_parser = family_parser, default_value = "rp2040")]
        family: Family,

        /// Load address of the image, defaults to the start of flash
        #[clap(long, value_parser = address_parser)]
        base: Option<u32>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Seconds to wait for the bootloader volume
        #[clap(short, long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
        timeout: u64,

        /// Only consider this directory as bootloader volume (repeatable)
        #[clap(long)]
        volume: Vec<PathBuf>,

        /// Name of the file written to the volume
        #[clap(long, default_value = DEFAULT_FILE_NAME)]
        file_name: String,

        /// Wait for the board to reboot after writing
        #[clap(short, long)]
        wait: bool,
    },
    /// Show what a UF2 file contains
    #[command(arg_required_else_help = true)]
    Info {
        /// Input UF2 file
        input: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ConfigArgs {
    /// JSON config document to embed
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Override a config key, as key=value (repeatable)
    #[clap(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

fn family_parser(s: &str) -> Result<Family, String> {
    Family::from_name(s).ok_or_else(|| format!("Unknown family '{}'", s))
}

fn address_parser(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|err| format!("Invalid address '{}': {}", s, err))
}

#[derive(Parser, Debug, Default)]
#[clap(version, about, long_about = None, author = "Jonathan Nilsson")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Set the logging verbosity
    #[clap(short, long, value_enum, global = true, default_value_t = LogLevel::Info)]
    verbose: LogLevel,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default())
        .filter_level(cli.verbose.into())
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let level = record.level();
            if level == Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "{}: {}", record.level(), record.args())
            }
        })
        .init();

    let command = match cli.command {
        Some(command) => command,
        None => return Ok(()),
    };

    match command {
        Command::Convert {
            input,
            output,
            family,
            base,
            config,
        } => {
            let document = load_config(config.config.as_deref(), &config.set)?;
            let base = base.unwrap_or(family.flash_start());

            convert(&input, &output, family, base, document.as_ref())
        }
        Command::Inject {
            input,
            output,
            config,
        } => {
            let document = load_config(config.config.as_deref(), &config.set)?
                .ok_or("inject needs --config or --set")?;

            inject(&input, &output, &document)
        }
        Command::Deploy {
            input,
            family,
            base,
            config,
            timeout,
            volume,
            file_name,
            wait,
        } => {
            let document = load_config(config.config.as_deref(), &config.set)?;
            let options = DeployOptions {
                base_address: base.unwrap_or(family.flash_start()),
                timeout: Duration::from_secs(timeout),
                file_name,
                confirm_timeout: wait.then_some(Duration::from_secs(10)),
                ..DeployOptions::for_family(family)
            };

            deploy(&input, options, document.as_ref(), volume)
        }
        Command::Info { input } => info(&input),
    }
}
