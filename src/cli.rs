use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netpulse")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Continuous network path monitor with latency, loss, route and DNS diagnostics")]
pub struct Cli {
    /// Ping target, overriding TARGET_IP
    #[arg(short = 't', long = "target")]
    pub target: Option<String>,

    /// Config file path, overriding NETPULSE_CONFIG
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Validate configuration and probe binaries, then exit
    #[arg(long = "check")]
    pub check: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
