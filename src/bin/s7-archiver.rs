//! Command-line runner for the archiver.
//!
//! ```text
//! s7-archiver run   --config s7-archiver.toml
//! s7-archiver check --config s7-archiver.toml
//! s7-archiver probe 192.168.0.10 --rack 0 --slot 1 [--write DB1.DBW0:int16=5]
//! ```

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use s7_archiver::{
    load_plan, parse_address, Fleet, LogFormat, S7Error, Session, Settings, Value, ValueType,
    WireAddress, WriteItem,
};

#[derive(Parser)]
#[command(name = "s7-archiver")]
#[command(author, version, about = "Samples S7 controllers and archives value changes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the fleet; stops on a `stop` line or end of input
    Run {
        /// Settings file, created with defaults if missing
        #[arg(short, long, default_value = "s7-archiver.toml")]
        config: PathBuf,
    },

    /// Validate the definition sheets without connecting
    Check {
        /// Settings file, created with defaults if missing
        #[arg(short, long, default_value = "s7-archiver.toml")]
        config: PathBuf,
    },

    /// Connect to one controller and print its PDU size, status and clock
    Probe {
        /// Host name or IP address
        host: String,

        /// TCP port
        #[arg(long, default_value_t = 102)]
        port: u16,

        /// Rack number
        #[arg(long, default_value_t = 0)]
        rack: u8,

        /// Slot number
        #[arg(long, default_value_t = 1)]
        slot: u8,

        /// Requested PDU size
        #[arg(long, default_value_t = 480)]
        pdu: u16,

        /// Write a value after probing, as ADDRESS:TYPE=VALUE (repeatable)
        #[arg(long = "write", value_name = "ADDRESS:TYPE=VALUE")]
        writes: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run { config } => run(&config),
        Command::Check { config } => check(&config),
        Command::Probe {
            host,
            port,
            rack,
            slot,
            pdu,
            writes,
        } => {
            init_logging("info", LogFormat::Text);
            let settings = Settings {
                pdu_size: pdu,
                ..Settings::default()
            };
            probe(&settings, &host, port, rack, slot, &writes)
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(true))
            .init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .init(),
    }
}

fn run(config: &Path) -> s7_archiver::Result<()> {
    let settings = Settings::load(config)?;
    init_logging(&settings.log_level, settings.log_format);
    info!(config = %config.display(), "settings loaded");

    let fleet = Fleet::start(&settings)?;
    if fleet.is_empty() {
        warn!("no controller has tags to archive");
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim().eq_ignore_ascii_case("stop") => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "stdin closed");
                break;
            }
        }
    }
    info!("stopping");
    fleet.stop();
    Ok(())
}

fn check(config: &Path) -> s7_archiver::Result<()> {
    let settings = Settings::load(config)?;
    init_logging(&settings.log_level, settings.log_format);

    let plan = load_plan(&settings)?;
    for controller in &plan.controllers {
        let row = &controller.controller;
        println!(
            "{} ({}:{} R{}S{}): {} tags",
            row.name,
            row.address,
            row.port,
            row.rack,
            row.slot,
            controller.tags.len()
        );
    }
    for skip in &plan.skipped {
        println!("skipped {skip}");
    }
    println!(
        "{} controllers, {} tags, {} rows skipped",
        plan.controllers.len(),
        plan.tag_count(),
        plan.skipped.len()
    );
    Ok(())
}

fn probe(
    settings: &Settings,
    host: &str,
    port: u16,
    rack: u8,
    slot: u8,
    writes: &[String],
) -> s7_archiver::Result<()> {
    let mut session = Session::new(settings.session_config(host, port, rack, slot));
    session.connect()?;
    println!("negotiated PDU: {} bytes", session.pdu_length());
    println!("CPU status: {}", session.get_cpu_status()?);
    println!("clock: {}", session.get_plc_datetime()?);

    let targets = writes
        .iter()
        .map(|spec| parse_write(spec))
        .collect::<s7_archiver::Result<Vec<_>>>()?;
    match targets.as_slice() {
        [] => {}
        [(spec, wire, value)] => {
            session.write_area(
                wire.area,
                wire.db_number,
                wire.start,
                wire.word_length,
                &value.encode()?,
            )?;
            println!("wrote {spec}");
        }
        many => {
            let items = many
                .iter()
                .map(|(_, wire, value)| Ok(WriteItem::from_wire(wire, value.encode()?)))
                .collect::<s7_archiver::Result<Vec<_>>>()?;
            let results = session.write_multi(&items)?;
            for ((spec, _, _), result) in many.iter().zip(results) {
                match result {
                    Ok(()) => println!("wrote {spec}"),
                    Err(err) => println!("{spec}: {err}"),
                }
            }
        }
    }
    session.disconnect();
    Ok(())
}

/// Splits `ADDRESS:TYPE=VALUE` into the target and its typed value.
fn parse_write(spec: &str) -> s7_archiver::Result<(&str, WireAddress, Value)> {
    let malformed =
        || S7Error::invalid_parameter("write", format!("'{spec}' is not ADDRESS:TYPE=VALUE"));
    let (target, text) = spec.split_once('=').ok_or_else(malformed)?;
    let (address, type_name) = target.split_once(':').ok_or_else(malformed)?;
    let ty = ValueType::from_name(type_name)?;
    let wire = parse_address(address.trim())?.to_wire(ty)?;
    Ok((spec, wire, Value::parse(ty, text)?))
}
