//! The inference engine seam.
//!
//! tokenwatt does not run models itself. It drives an engine through the
//! [`TextGenerator`] trait. The stock implementation shells out to a
//! command-line generator such as `mlx_lm.generate`.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::platform::command_exists;

/// Default command-line engine.
pub const DEFAULT_ENGINE: &str = "mlx_lm.generate";

/// How often a running engine is checked for exit or cancellation.
const ENGINE_POLL: Duration = Duration::from_millis(20);

/// Anything that can produce text from a prompt.
pub trait TextGenerator {
    /// Generate up to `max_tokens` tokens for `prompt`.
    ///
    /// Implementations should give up promptly once `cancel` is set and
    /// return an error.
    fn generate(&mut self, prompt: &str, max_tokens: usize, cancel: &AtomicBool)
    -> Result<String>;

    /// Model identifier, for reports.
    fn model(&self) -> &str;
}

/// Runs `<program> [args..] --model <model> --prompt <prompt> --max-tokens <n>`
/// once per call and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    model: String,
}

impl CommandGenerator {
    /// Bind an engine program to a model, checking the program is on `PATH`.
    pub fn load(program: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let program = program.into();
        let model = model.into();
        if !command_exists(&program) {
            return Err(Error::Spawn {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found on PATH"),
            });
        }
        log::info!("using engine {program} with model {model}");
        Ok(Self {
            program,
            args: Vec::new(),
            model,
        })
    }

    /// Arguments placed before `--model`, e.g. `-m mlx_lm generate` for a
    /// `python` program.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl TextGenerator for CommandGenerator {
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        cancel: &AtomicBool,
    ) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(["--model", &self.model, "--prompt", prompt, "--max-tokens"])
            .arg(max_tokens.to_string())
            .env("HF_HUB_DISABLE_PROGRESS_BARS", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drained on their own threads so a chatty engine never blocks on a
        // full pipe while we poll it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if cancel.load(Ordering::SeqCst) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Generation(format!("{} interrupted", self.program)));
                }
                None => std::thread::sleep(ENGINE_POLL),
            }
        };

        let stdout = collect(stdout);
        if !status.success() {
            let stderr = collect(stderr);
            return Err(Error::Generation(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut p| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_load_missing_engine() {
        let res = CommandGenerator::load("tokenwatt-no-such-engine", "some/model");
        assert!(matches!(res, Err(Error::Spawn { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn test_generate_captures_stdout() {
        // `echo` prints its arguments, which stands in for generated text.
        let mut g = CommandGenerator::load("echo", "tiny-model").unwrap();
        let text = g.generate("hello", 16, &AtomicBool::new(false)).unwrap();
        assert!(text.contains("--model tiny-model"));
        assert!(text.contains("--prompt hello"));
        assert!(text.contains("--max-tokens 16"));
        assert_eq!(g.model(), "tiny-model");
    }

    #[test]
    #[cfg(unix)]
    fn test_leading_args_come_before_model() {
        let mut g = CommandGenerator::load("echo", "m")
            .unwrap()
            .with_args(vec!["-m".to_string(), "mlx_lm".to_string()]);
        let text = g.generate("p", 8, &AtomicBool::new(false)).unwrap();
        assert!(text.starts_with("-m mlx_lm --model m"));
    }

    #[test]
    #[cfg(unix)]
    fn test_cancel_kills_running_engine() {
        // `sh -c '...' engine --model ...`: the flags land in $1.. and are ignored.
        let mut g = CommandGenerator::load("sh", "m").unwrap().with_args(vec![
            "-c".to_string(),
            "exec sleep 30".to_string(),
            "engine".to_string(),
        ]);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        });

        let t0 = Instant::now();
        let res = g.generate("p", 256, &cancel);
        trigger.join().unwrap();
        assert!(matches!(res, Err(Error::Generation(_))));
        assert!(t0.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[cfg(unix)]
    fn test_generate_reports_engine_failure() {
        let mut g = CommandGenerator::load("false", "m").unwrap();
        assert!(matches!(g.generate("x", 1, &AtomicBool::new(false)), Err(Error::Generation(_))));
    }
}
