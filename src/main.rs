use std::net::IpAddr;
use std::process;

use clap::Parser;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use bgpsd::{config, handler};

/// External BGP speaker with a programmatic route injection API
#[derive(Parser)]
#[clap(name = "bgpsd", version)]
struct Args {
    /// Path to the bgpsd config file
    config_path: String,

    /// IP address to listen on for BGP sessions
    #[clap(short, long, default_value = "127.0.0.1")]
    address: IpAddr,

    /// TCP port to listen on for BGP sessions
    #[clap(short, long, default_value_t = 179)]
    port: u16,

    /// Logging verbosity (-v, -vv, -vvv)
    #[clap(short, parse(from_occurrences))]
    verbose: u64,
}

fn main() {
    let args = Args::parse();

    let (bgpsd_level, other_level) = match args.verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("bgpsd"), bgpsd_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", bgpsd_level, other_level);

    let config = match config::from_file(&args.config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("Configuration error in {}: {}", args.config_path, err);
            process::exit(1);
        }
    };
    debug!(
        "Found {} peers in {}",
        config.peers.len(),
        args.config_path
    );

    match handler::serve(args.address, args.port, args.config_path, config) {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}
