//! End-of-run figures: throughput, efficiency, and 1M-token projections.
//!
//! Every ratio is guarded: a zero denominator yields zero, never NaN or inf.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::JOULES_PER_KWH;
use crate::session::SessionSnapshot;

/// Marker row that opens the summary block in the enriched log.
pub const SUMMARY_MARKER: &str = "=== Generation Summary ===";

const MILLION: f64 = 1_000_000.0;

/// Derived metrics for one measurement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub total_tokens: u64,
    pub elapsed_secs: f64,
    pub tokens_per_second: f64,
    pub average_power_mw: f64,
    pub energy_j: f64,
    pub energy_kwh: f64,
    pub tokens_per_joule: f64,
    pub seconds_per_million_tokens: f64,
    pub kwh_per_million_tokens: f64,
    pub cost_per_million_tokens: f64,
    pub cost_per_kwh: f64,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

impl SessionReport {
    /// Derive the report from a session snapshot.
    pub fn compute(snapshot: &SessionSnapshot, cost_per_kwh: f64) -> Self {
        let total_tokens = snapshot.total_tokens;
        let tokens = total_tokens as f64;
        let elapsed_secs = snapshot.elapsed.as_secs_f64();
        let energy = snapshot.energy;

        let tokens_per_second = ratio(tokens, elapsed_secs);
        let average_power_mw = ratio(energy.power_sum_mw as f64, energy.sample_count as f64);
        let tokens_per_joule = ratio(tokens, energy.energy_j);
        let kwh_per_million_tokens = ratio(MILLION, tokens_per_joule) / JOULES_PER_KWH;
        let cost_per_million_tokens = kwh_per_million_tokens * cost_per_kwh;
        let seconds_per_million_tokens = ratio(MILLION, tokens_per_second);

        Self {
            total_tokens,
            elapsed_secs,
            tokens_per_second,
            average_power_mw,
            energy_j: energy.energy_j,
            energy_kwh: energy.energy_kwh,
            tokens_per_joule,
            seconds_per_million_tokens,
            kwh_per_million_tokens,
            cost_per_million_tokens,
            cost_per_kwh,
        }
    }

    /// Ordered `label,value` rows of the summary block.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Total Tokens Generated", self.total_tokens.to_string()),
            ("Time Taken (seconds)", format!("{:.2}", self.elapsed_secs)),
            (
                "Generation Speed (tokens/second)",
                format!("{:.2}", self.tokens_per_second),
            ),
            (
                "Average Power Usage (mW)",
                format!("{:.2}", self.average_power_mw),
            ),
            ("Total Energy Used (J)", format!("{:.2}", self.energy_j)),
            ("Total Energy Used (kWh)", format!("{:.4}", self.energy_kwh)),
            (
                "Energy Efficiency (tokens/J)",
                format!("{:.2}", self.tokens_per_joule),
            ),
        ]
    }

    /// Ordered `label,value` rows of the 1M-token projection.
    pub fn projection_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "Time Required (seconds)",
                format!("{:.2}", self.seconds_per_million_tokens),
            ),
            (
                "Time Required (hours)",
                format!("{:.2}", self.seconds_per_million_tokens / 3600.0),
            ),
            (
                "Energy Required (kWh)",
                format!("{:.2}", self.kwh_per_million_tokens),
            ),
            (
                "Estimated Cost ($)",
                format!("{:.2}", self.cost_per_million_tokens),
            ),
            ("kWh Cost Used ($/kWh)", format!("{:.2}", self.cost_per_kwh)),
        ]
    }

    /// Append the summary block to the enriched log at `path`.
    pub fn append_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut block = String::new();
        block.push('\n');
        block.push_str(SUMMARY_MARKER);
        block.push('\n');
        for (label, value) in self.rows() {
            block.push_str(&format!("{label},{value}\n"));
        }
        block.push('\n');
        block.push_str("Projections for 1M tokens:\n");
        for (label, value) in self.projection_rows() {
            block.push_str(&format!("{label},{value}\n"));
        }
        file.write_all(block.as_bytes())?;
        file.flush()
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{SUMMARY_MARKER}")?;
        writeln!(f, "Total Tokens Generated: {}", self.total_tokens)?;
        writeln!(f, "Time Taken: {:.2} seconds", self.elapsed_secs)?;
        writeln!(
            f,
            "Generation Speed: {:.2} tokens/second",
            self.tokens_per_second
        )?;
        writeln!(f, "Average Power Usage: {:.2} mW", self.average_power_mw)?;
        writeln!(f, "Total Energy Used: {:.2} J", self.energy_j)?;
        writeln!(f, "Total Energy Used: {:.4} kWh", self.energy_kwh)?;
        writeln!(f, "Energy Efficiency: {:.2} tokens/J", self.tokens_per_joule)?;
        writeln!(f)?;
        writeln!(f, "Projections for 1M tokens:")?;
        writeln!(
            f,
            "Time Required: {:.2} seconds ({:.2} hours)",
            self.seconds_per_million_tokens,
            self.seconds_per_million_tokens / 3600.0
        )?;
        writeln!(f, "Energy Required: {:.2} kWh", self.kwh_per_million_tokens)?;
        write!(f, "Estimated Cost: ${:.2}", self.cost_per_million_tokens)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
