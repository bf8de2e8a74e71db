//! `tokenwatt send`: deliver one command to the sampler daemon.

use std::time::Duration;

use tokenwatt_core::{Command, send_command};

/// How long to wait for the daemon to open its end of the FIFO.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn run(command: &str, fifo: &str) {
    let command: Command = match command.parse() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = send_command(fifo, command, CONNECT_TIMEOUT) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    println!("Sent '{command}' to {fifo}");
}
