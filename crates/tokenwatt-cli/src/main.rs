//! CLI for tokenwatt: how many joules does a token cost?

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tokenwatt")]
#[command(about = "tokenwatt: measure accelerator energy per generated token")]
#[command(version = tokenwatt_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the power sampler daemon (usually under sudo).
    /// Waits for start/stop/exit commands on the control FIFO.
    Monitor {
        /// Path of the control FIFO
        #[arg(long, default_value = tokenwatt_core::DEFAULT_CONTROL_PATH)]
        fifo: String,

        /// Raw sample log to write
        #[arg(long, default_value = tokenwatt_core::DEFAULT_SAMPLE_LOG)]
        log: String,

        /// Power sampling tool to spawn on start
        #[arg(long, default_value = tokenwatt_core::DEFAULT_PROGRAM)]
        program: String,
    },

    /// Send one command to a running sampler daemon
    Send {
        /// Command to send
        #[arg(value_parser = ["start", "stop", "exit"])]
        command: String,

        /// Path of the control FIFO
        #[arg(long, default_value = tokenwatt_core::DEFAULT_CONTROL_PATH)]
        fifo: String,
    },

    /// Generate text under measurement and report energy per token.
    /// Missing prompt, token count, output name, or cost are asked for interactively.
    Generate {
        /// Model identifier passed to the engine
        #[arg(long, default_value = "./ministral-8b")]
        model: String,

        /// Command-line inference engine
        #[arg(long, default_value = tokenwatt_core::DEFAULT_ENGINE)]
        engine: String,

        /// Prompt text
        #[arg(long)]
        prompt: Option<String>,

        /// Target token count (accepts 1,000,000 and 1e6 forms)
        #[arg(long)]
        tokens: Option<String>,

        /// Enriched metrics CSV to write (".csv" is appended if missing)
        #[arg(long)]
        output: Option<String>,

        /// Electricity cost per kWh (default: 0.35)
        #[arg(long)]
        cost: Option<String>,

        /// Tokens requested from the engine per call
        #[arg(long, default_value = "256")]
        chunk_size: usize,

        /// Path of the control FIFO
        #[arg(long, default_value = tokenwatt_core::DEFAULT_CONTROL_PATH)]
        fifo: String,

        /// Raw sample log written by the daemon
        #[arg(long, default_value = tokenwatt_core::DEFAULT_SAMPLE_LOG)]
        log: String,

        /// Print the run record as JSON instead of the text summary
        #[arg(long)]
        json: bool,

        /// Echo generated text
        #[arg(long)]
        print_text: bool,

        /// Offer another run after each one finishes
        #[arg(long)]
        repeat: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor { fifo, log, program } => commands::monitor::run(&fifo, &log, &program),
        Commands::Send { command, fifo } => commands::send::run(&command, &fifo),
        Commands::Generate {
            model,
            engine,
            prompt,
            tokens,
            output,
            cost,
            chunk_size,
            fifo,
            log,
            json,
            print_text,
            repeat,
        } => commands::generate::run(commands::generate::GenerateCommandConfig {
            model: &model,
            engine: &engine,
            prompt: prompt.as_deref(),
            tokens: tokens.as_deref(),
            output: output.as_deref(),
            cost: cost.as_deref(),
            chunk_size,
            fifo: &fifo,
            sample_log: &log,
            json,
            print_text,
            repeat,
        }),
    }
}
