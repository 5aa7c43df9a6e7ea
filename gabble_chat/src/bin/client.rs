// CLI entry point for the gabble chat client.
//
// Connects, then loops over stdin: every line is sent to the server, and the
// background receiver thread (see `client.rs`) prints incoming broadcasts.
// `/quit` ends the session locally — the server learns of it from the
// half-close, not from a message.

use std::io::BufRead;

use clap::Parser;

use gabble_chat::client::ChatClient;
use gabble_log::{LogConfig, init_logging_with_config};
use gabble_protocol::{DEFAULT_PORT, QUIT_COMMAND};

#[derive(Parser)]
#[command(name = "gabble-client", about = "CLI client for the gabble chat server")]
struct Args {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging_with_config(LogConfig::client()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let mut client = match ChatClient::connect(&args.host, args.port) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    println!("Connected. Type messages ({QUIT_COMMAND} to exit):");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line == QUIT_COMMAND {
            break;
        }
        if let Err(e) = client.send_line(&line) {
            eprintln!("Send failed: {e}");
            break;
        }
    }

    client.disconnect();
}
