use std::{
    env,
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use bellframe::{
    parameters::BellframeParams,
    runner::{FrameReader, Runner},
};
use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(version, about = "Calibrated orientation stream for a bell mounted sensor", long_about = None)]
struct Args {
    /// Parameter file
    #[arg(long, default_value = "config/params.toml")]
    params: PathBuf,

    /// Serial port, overrides `serial.port`
    #[arg(short, long)]
    port: Option<String>,

    /// Overrides `serial.baud_rate`
    #[arg(short, long)]
    baud_rate: Option<u32>,

    /// Read frames from a recorded file instead of the serial port
    #[arg(short, long, conflicts_with = "port")]
    replay: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Default log level to "info"
    if env::var("RUST_LOG").is_err() {
        unsafe { env::set_var("RUST_LOG", "info") }
    }

    pretty_env_logger::init();

    let args = Args::parse();

    info!("Reading parameters from '{}'", args.params.display());
    let mut params = BellframeParams::from_file(&args.params)
        .with_context(|| format!("Cannot load parameters from '{}'", args.params.display()))?;

    if let Some(port) = args.port {
        params.serial.port = Some(port);
    }
    if let Some(baud_rate) = args.baud_rate {
        params.serial.baud_rate = baud_rate;
    }
    params.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            stop.store(true, Ordering::Relaxed);
        })?;
    }

    let (input, pace): (Box<dyn BufRead>, bool) = match &args.replay {
        Some(path) => {
            info!("Replaying frames from '{}'", path.display());
            let file = File::open(path)
                .with_context(|| format!("Cannot open replay file '{}'", path.display()))?;
            (Box::new(BufReader::new(file)), true)
        }
        None => {
            let port = params
                .serial
                .port
                .clone()
                .ok_or_else(|| anyhow!("No serial port given, use --port or --replay"))?;

            let serial = serialport::new(port.as_str(), params.serial.baud_rate)
                .timeout(params.serial.timeout())
                .open()
                .with_context(|| format!("Could not open serial port {port}"))?;

            info!(
                "Connected to {port} at {} baud",
                params.serial.baud_rate
            );
            (Box::new(BufReader::new(serial)), false)
        }
    };

    let runner = Runner::new(params);
    runner.sink().text("connected");
    runner.listen_commands(BufReader::new(io::stdin()))?;

    let stats = runner.run_blocking(FrameReader::new(input).paced(pace), io::stdout(), stop)?;

    info!(
        "Done, {} frames processed, {} rejected",
        stats.frames, stats.rejected
    );

    Ok(())
}
