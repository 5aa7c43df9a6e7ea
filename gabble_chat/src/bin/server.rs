// CLI entry point for the gabble chat server.
//
// Starts the relay, then parks the main thread until Ctrl+C. All the real
// work happens on the accept thread and the per-session reader threads; see
// `server.rs` for the architecture.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use gabble_chat::history::DEFAULT_HISTORY_CAPACITY;
use gabble_chat::server::{ServerConfig, start_server};
use gabble_log::{DEFAULT_LOG_FILE, LogConfig, init_logging_with_config};
use gabble_protocol::DEFAULT_PORT;

#[derive(Parser)]
#[command(name = "gabble-server", about = "Multi-user TCP chat relay server")]
struct Args {
    /// Listen port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of chat lines kept in the in-memory history.
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAPACITY)]
    history_capacity: usize,

    /// Append-mode log file path.
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,
}

fn main() {
    let args = Args::parse();

    let log_config = LogConfig {
        file: args.log_file,
        ..LogConfig::server()
    };
    if let Err(e) = init_logging_with_config(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = ServerConfig {
        port: args.port,
        history_capacity: args.history_capacity,
    };
    let (handle, addr) = match start_server(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("Chat server listening on {addr}");
    println!("Press Ctrl+C to stop.");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            eprintln!("Failed to install Ctrl+C handler: {e}");
            std::process::exit(1);
        }
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    println!("\nShutting down...");
    handle.stop();
}
