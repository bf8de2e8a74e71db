pub mod generate;
pub mod monitor;
pub mod send;

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokenwatt_core::parse_token_count;

/// Install a Ctrl+C / SIGTERM handler that sets the returned flag.
pub fn cancel_flag() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let c = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        if c.swap(true, Ordering::SeqCst) {
            eprintln!("\nShutdown already in progress...");
        } else {
            eprintln!("\nReceived signal to stop. Cleaning up...");
        }
    }) {
        log::warn!("could not install signal handler: {e}");
    }
    cancel
}

/// Print `question` and read one trimmed line. `None` on end of input.
pub fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> Option<String> {
    let _ = write!(out, "{question}");
    let _ = out.flush();
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Ask until the answer parses as a token count. `None` on end of input.
pub fn ask_token_count<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Option<u64> {
    loop {
        let answer = ask(input, out, "How many tokens to generate? ")?;
        match parse_token_count(&answer) {
            Ok(n) if n > 0 => return Some(n),
            Ok(_) => {
                let _ = writeln!(out, "Token count must be greater than zero.");
            }
            Err(e) => {
                let _ = writeln!(out, "Error: {e}. Try 1000, 1,000,000 or 1e6.");
            }
        }
    }
}

/// Ask a yes/no question; anything but y/yes is no.
pub fn ask_yes<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> bool {
    ask(input, out, question)
        .map(|a| matches!(a.to_ascii_lowercase().as_str(), "y" | "yes"))
        .unwrap_or(false)
}
