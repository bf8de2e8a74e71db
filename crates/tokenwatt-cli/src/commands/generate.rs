//! `tokenwatt generate`: generate text under measurement and report energy
//! per token.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use tokenwatt_core::{
    CommandGenerator, DEFAULT_COST_PER_KWH, MeasurementRun, RunConfig, RunSummary,
    ensure_csv_extension, parse_cost, parse_token_count, sidecar_path,
};

use super::{ask, ask_token_count, ask_yes};

pub struct GenerateCommandConfig<'a> {
    pub model: &'a str,
    pub engine: &'a str,
    pub prompt: Option<&'a str>,
    pub tokens: Option<&'a str>,
    pub output: Option<&'a str>,
    pub cost: Option<&'a str>,
    pub chunk_size: usize,
    pub fifo: &'a str,
    pub sample_log: &'a str,
    pub json: bool,
    pub print_text: bool,
    pub repeat: bool,
}

/// Operator answers for one run.
#[derive(Debug, Clone, PartialEq)]
struct RunInputs {
    prompt: String,
    target_tokens: u64,
    output: String,
    cost_per_kwh: f64,
}

pub fn run(cfg: GenerateCommandConfig<'_>) {
    println!("Loading model {}...", cfg.model);
    let mut generator = match CommandGenerator::load(cfg.engine, cfg.model) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let cancel = super::cancel_flag();
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut out = std::io::stdout();

    // Flags only apply to the first run; later runs are fully interactive.
    let mut flags = Some(&cfg);
    loop {
        let Some(inputs) = collect_inputs(flags.take(), &mut input, &mut out) else {
            eprintln!("No input; exiting.");
            break;
        };

        let run = MeasurementRun::new(RunConfig {
            control_path: PathBuf::from(cfg.fifo),
            sample_log: PathBuf::from(cfg.sample_log),
            output: PathBuf::from(&inputs.output),
            prompt: inputs.prompt.clone(),
            target_tokens: inputs.target_tokens,
            chunk_size: cfg.chunk_size.max(1),
            cost_per_kwh: inputs.cost_per_kwh,
            echo_text: cfg.print_text,
            ..Default::default()
        });

        println!();
        println!("Starting generation of {} tokens...", inputs.target_tokens);
        println!("Monitoring data will be saved to {}", inputs.output);

        match run.execute(&mut generator, &cancel) {
            Ok(summary) => print_summary(&summary, cfg.json),
            Err(e) => {
                eprintln!("Error: {e}");
                if !cfg.repeat {
                    std::process::exit(1);
                }
            }
        }

        if !cfg.repeat || cancel.load(Ordering::SeqCst) {
            break;
        }
        if !ask_yes(&mut input, &mut out, "\nStart another run? [y/N] ") {
            break;
        }
    }
}

/// Fill in whatever the flags left out by asking on `input`.
fn collect_inputs<R: BufRead, W: Write>(
    flags: Option<&GenerateCommandConfig<'_>>,
    input: &mut R,
    out: &mut W,
) -> Option<RunInputs> {
    let prompt = match flags.and_then(|f| f.prompt) {
        Some(p) => p.to_string(),
        None => ask(input, out, "Enter your prompt: ")?,
    };

    let from_flag = flags
        .and_then(|f| f.tokens)
        .and_then(|t| match parse_token_count(t) {
            Ok(n) if n > 0 => Some(n),
            Ok(_) => None,
            Err(e) => {
                let _ = writeln!(out, "Error: {e}");
                None
            }
        });
    let target_tokens = match from_flag {
        Some(n) => n,
        None => ask_token_count(input, out)?,
    };

    let output = match flags.and_then(|f| f.output) {
        Some(o) => o.to_string(),
        None => ask(
            input,
            out,
            "Enter a name for the metrics CSV file (e.g., 'run1_metrics.csv'): ",
        )?,
    };
    let output = if output.is_empty() {
        "generation_metrics.csv".to_string()
    } else {
        ensure_csv_extension(&output)
    };

    let cost_text = match flags.and_then(|f| f.cost) {
        Some(c) => c.to_string(),
        None => ask(
            input,
            out,
            &format!("Enter cost per kWh (default: ${DEFAULT_COST_PER_KWH:.2}): "),
        )
        .unwrap_or_default(),
    };

    Some(RunInputs {
        prompt,
        target_tokens,
        output,
        cost_per_kwh: parse_cost(&cost_text),
    })
}

fn print_summary(summary: &RunSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(&summary.record) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Error serializing run record: {e}"),
        }
        return;
    }

    println!();
    if summary.record.interrupted {
        println!("Generation interrupted.");
    } else {
        println!("Generation complete!");
    }
    println!();
    println!("{}", summary.report());
    println!();
    println!("Saved to {}", summary.record.output);
    println!("  {} enriched samples", summary.rows);
    println!(
        "  run record: {}",
        sidecar_path(std::path::Path::new(&summary.record.output)).display()
    );
}
