//! The sampler daemon: a control endpoint plus a power sampler, driven by
//! commands until `exit` or a shutdown request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::control::{Command, ControlEndpoint};
use crate::error::Result;
use crate::sampler::{PowerSampler, SamplerConfig, SamplerState};

/// Upper bound on one wait for a command, so shutdown and tool exits are
/// noticed promptly.
const COMMAND_POLL: Duration = Duration::from_millis(100);

/// What the daemon loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct SamplerDaemon {
    endpoint: ControlEndpoint,
    sampler: PowerSampler,
}

impl SamplerDaemon {
    /// Create (or reuse) the control endpoint. Fails only if the endpoint
    /// cannot be set up.
    pub fn new(config: SamplerConfig) -> Result<Self> {
        let endpoint = ControlEndpoint::create(&config.control_path)?;
        Ok(Self {
            endpoint,
            sampler: PowerSampler::new(config),
        })
    }

    pub fn state(&self) -> SamplerState {
        self.sampler.state()
    }

    pub fn sampler(&self) -> &PowerSampler {
        &self.sampler
    }

    pub fn endpoint(&self) -> &ControlEndpoint {
        &self.endpoint
    }

    /// Apply one command.
    ///
    /// A failed `start` (e.g. the tool cannot be spawned) is logged and the
    /// daemon stays idle.
    pub fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::Start => {
                if let Err(e) = self.sampler.start() {
                    log::error!("could not start sampling: {e}");
                }
                Flow::Continue
            }
            Command::Stop => {
                self.sampler.stop();
                Flow::Continue
            }
            Command::Exit => Flow::Exit,
        }
    }

    /// Serve commands until `exit` arrives or `cancel` is set, then shut down.
    pub fn run(mut self, cancel: &AtomicBool) -> Result<()> {
        let result = self.serve(cancel);
        self.shutdown();
        result
    }

    fn serve(&mut self, cancel: &AtomicBool) -> Result<()> {
        while !cancel.load(Ordering::SeqCst) {
            self.sampler.reap();
            let Some(command) = self.endpoint.recv_timeout(COMMAND_POLL)? else {
                continue;
            };
            log::info!("received '{command}'");
            if self.handle(command) == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Terminate the sampling tool, then remove the control endpoint.
    pub fn shutdown(&mut self) {
        self.sampler.stop();
        self.endpoint.remove();
    }
}
