// src/main.rs
//
// CLI front end: load a config, compile a G-code file into the cache,
// then drive the executor at 10kHz until the print finishes (§A.4).
// `Gpio`/`Thermistor` are the two out-of-scope external ports (board
// pin-map, ADC wiring); this binary wires the in-memory stand-ins from
// `ports::sim` rather than a real MCU driver.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use printer_core::config::load_config;
use printer_core::executor::ExecOutcome;
use printer_core::ports::sim::{FixedThermistor, RecordingGpio};
use printer_core::ports::FileBlockStore;
use printer_core::Printer;

#[derive(Parser, Debug)]
#[command(name = "printer-core", version, about = "Cartesian 3D-printer firmware core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "printer.toml")]
    config: PathBuf,

    /// G-code file to compile and print.
    gcode: PathBuf,

    /// Resume a previously saved print instead of starting fresh.
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let config = load_config(cli.config.to_str().unwrap_or("printer.toml")).map_err(|e| {
        error!("failed to load config from {:?}: {e}", cli.config);
        e
    })?;

    info!("opening block store at {}", config.storage.path);
    let mut store = FileBlockStore::open(&config.storage.path)?;

    let source = std::fs::read_to_string(&cli.gcode)
        .map_err(|e| printer_core::FirmwareError::FileNotFound(format!("{}: {e}", cli.gcode.display())))?;

    let mut printer = Printer::new(config, RecordingGpio::default(), FixedThermistor::new());

    let filename = cli
        .gcode
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed.gcode")
        .to_string();

    if cli.resume {
        info!("resuming previous print");
        let control = printer_core::cache::store::ControlBlock::load(&mut store)?;
        printer.resume(&mut store, control)?;
    } else {
        let control = printer.compile(&mut store, &source, &filename)?;
        printer.start(&mut store, control)?;
    }

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_micros(100));
    loop {
        match printer.advance(&mut store)? {
            ExecOutcome::Finished => {
                info!("print finished");
                break;
            }
            ExecOutcome::Incomplete => {
                ticker.tick().await;
                printer.tick();
            }
            ExecOutcome::Ok | ExecOutcome::PreloadRequired => unreachable!("handled inside advance()"),
        }
    }

    printer.save_state(&mut store)?;
    Ok(())
}
