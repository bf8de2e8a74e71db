//! # tokenwatt-core
//!
//! **How many joules does a token cost?**
//!
//! `tokenwatt-core` measures accelerator power while a language model generates
//! text, and joins the power trace against generation progress to produce
//! throughput, efficiency, and cost projections.
//!
//! ## Architecture
//!
//! ```text
//! driver ─► control FIFO ─► PowerSampler ─► SampleLog ─► Correlator ─► enriched log ─► SessionReport
//! ```
//!
//! Two processes take part and share no memory:
//! - the **sampler daemon** ([`SamplerDaemon`]) owns the OS power sampling tool
//!   and appends one `timestamp,mW` row per reading to the [`samplelog`];
//! - the **driver** ([`MeasurementRun`]) sends `start` / `stop` over the
//!   [`control`] endpoint, drives the inference engine, and runs a background
//!   [`Correlator`] that tails the sample log and writes the enriched log.
//!
//! The sample log is the only hand-off between the two. It has a single writer
//! and a single reader, so the data path needs no locking.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenwatt_core::{Correlator, CorrelatorConfig, Session, SessionReport};
//!
//! let session = Arc::new(Session::new());
//! let mut correlator = Correlator::new(
//!     CorrelatorConfig::new("gpu_power_continuous.csv", "run1_metrics.csv"),
//!     Arc::clone(&session),
//! )?;
//! correlator.poll_once()?;
//! session.add_tokens(256);
//!
//! let report = SessionReport::compute(&session.snapshot(), 0.35);
//! report.append_to("run1_metrics.csv")?;
//! # Ok::<(), tokenwatt_core::Error>(())
//! ```

pub mod control;
pub mod correlator;
pub mod daemon;
pub mod driver;
pub mod error;
pub mod generate;
pub mod input;
pub mod platform;
pub mod report;
pub mod sampler;
pub mod samplelog;
pub mod session;

pub use control::{Command, ControlEndpoint, DEFAULT_CONTROL_PATH, send_command};
pub use correlator::{Correlator, CorrelatorConfig, CorrelatorHandle, ENRICHED_HEADER};
pub use daemon::{Flow, SamplerDaemon};
pub use driver::{
    DEFAULT_CHUNK_SIZE, MeasurementRun, RunConfig, RunRecord, RunSummary, sidecar_path,
};
pub use error::{Error, Result};
pub use generate::{CommandGenerator, DEFAULT_ENGINE, TextGenerator};
pub use input::{DEFAULT_COST_PER_KWH, ensure_csv_extension, parse_cost, parse_token_count};
pub use report::{SUMMARY_MARKER, SessionReport};
pub use sampler::{DEFAULT_PROGRAM, PowerSampler, SamplerConfig, SamplerState};
pub use samplelog::{
    DEFAULT_SAMPLE_LOG, RawSample, SAMPLE_LOG_HEADER, SampleLogWriter, format_timestamp,
    parse_power_reading,
};
pub use session::{EnergyTotals, Session, SessionSnapshot};

/// Fixed time between successive power readings, in milliseconds.
pub const SAMPLE_INTERVAL_MS: u64 = 100;

/// Joules in one kilowatt-hour.
pub const JOULES_PER_KWH: f64 = 3_600_000.0;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
