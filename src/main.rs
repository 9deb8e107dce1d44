use netpulse::cli::Cli;
use netpulse::config::Config;
use netpulse::core::monitor::debug_logger::get_debug_logger;
use netpulse::core::monitor::process::{ping_binary_available, traceroute_binary};
use netpulse::core::monitor::types::MonitorError;
use netpulse::core::monitor::{InstanceLock, MonitorEngine};

/// Exit codes: 0 graceful, 1 unrecoverable startup error, 2 misconfiguration.
#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse_args();
    if let Some(target) = &cli.target {
        std::env::set_var("TARGET_IP", target);
    }
    if let Some(path) = &cli.config {
        std::env::set_var("NETPULSE_CONFIG", path);
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("netpulse: {}", e);
            return 2;
        }
    };

    if cli.check {
        println!("configuration ok (target {})", config.target);
        println!(
            "ping binary: {}",
            if ping_binary_available() { "found" } else { "MISSING" }
        );
        println!(
            "traceroute binary: {}",
            traceroute_binary().unwrap_or("MISSING")
        );
        return if ping_binary_available() { 0 } else { 1 };
    }

    // One instance per user; a stale lock from a dead process is reclaimed
    let lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("netpulse: {}", e);
            return 1;
        }
    };

    let mut engine = match MonitorEngine::new(config) {
        Ok(engine) => engine,
        Err(MonitorError::ConfigError(msg)) => {
            eprintln!("netpulse: {}", msg);
            return 2;
        }
        Err(e) => {
            eprintln!("netpulse: {}", e);
            return 1;
        }
    };

    get_debug_logger().info("Main", "monitor starting");
    let result = engine
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    // Finalizers: subprocesses are already swept by the engine; releasing
    // the lock removes the file, and the logger writes synchronously so
    // nothing is left buffered.
    drop(lock);

    match result {
        Ok(()) => {
            get_debug_logger().info("Main", "monitor stopped cleanly");
            0
        }
        Err(e) => {
            eprintln!("netpulse: {}", e);
            1
        }
    }
}
