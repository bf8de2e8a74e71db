//! `tokenwatt monitor`: run the power sampler daemon.

use std::path::PathBuf;

use tokenwatt_core::{SAMPLE_INTERVAL_MS, SamplerConfig, SamplerDaemon};

pub fn run(fifo: &str, log: &str, program: &str) {
    let config = SamplerConfig {
        control_path: PathBuf::from(fifo),
        sample_log: PathBuf::from(log),
        program: program.to_string(),
        ..Default::default()
    };

    let daemon = match SamplerDaemon::new(config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let cancel = super::cancel_flag();

    println!("Power monitor ready. Waiting for commands...");
    println!("  Control:  {fifo}");
    println!("  Samples:  {log}");
    println!("  Tool:     {program} (every {SAMPLE_INTERVAL_MS}ms)");
    println!("Commands: 'start' to begin monitoring, 'stop' to end, 'exit' to quit");
    println!("  e.g. tokenwatt send start --fifo {fifo}");

    if let Err(e) = daemon.run(&cancel) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    println!("Monitoring stopped. Data saved to {log}");
}
