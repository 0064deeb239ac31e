//! Audio gateway backed by the `pactl` command line tool
//!
//! Works against PulseAudio and PipeWire (through pipewire-pulse).

use super::level::LevelMeter;
use super::parse::{self, SourceBlock};
use super::{AudioGateway, GatewayError, ModuleHandle, Source, Teardown, LOOPBACK_TAG};
use log::{debug, trace, warn};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between exit checks while waiting on `pactl`
const WAIT_STEP: Duration = Duration::from_millis(5);

/// Captured result of one `pactl` invocation
struct PactlOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Gateway talking to the audio server through `pactl` subprocesses
pub struct PactlGateway {
    program: String,
    timeout: Duration,
    meter: LevelMeter,
}

impl PactlGateway {
    pub fn new() -> Self {
        Self {
            program: "pactl".to_string(),
            timeout: DEFAULT_TIMEOUT,
            meter: LevelMeter::new(),
        }
    }

    /// Run `pactl` with `args`, killing it once the timeout expires
    fn run(&self, args: &[&str]) -> Result<PactlOutput, GatewayError> {
        trace!("{} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    GatewayError::Unavailable(format!(
                        "{} not found, install pipewire-pulse or pulseaudio-utils",
                        self.program
                    ))
                } else {
                    GatewayError::Unavailable(format!("failed to run {}: {}", self.program, e))
                }
            })?;

        // Pipes must be drained while waiting, a full pipe stalls the child
        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GatewayError::Unavailable(format!(
                        "{} {} timed out after {:?}",
                        self.program,
                        args.first().copied().unwrap_or_default(),
                        self.timeout
                    )));
                }
                Ok(None) => thread::sleep(WAIT_STEP),
                Err(e) => {
                    return Err(GatewayError::Unavailable(format!(
                        "failed waiting on {}: {}",
                        self.program, e
                    )))
                }
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let output = PactlOutput {
            success: status.success(),
            stdout,
            stderr,
        };

        if !output.success && is_connection_failure(&output.stderr) {
            return Err(GatewayError::Unavailable(output.stderr.trim().to_string()));
        }
        Ok(output)
    }

    /// Run and require a zero exit status
    fn run_checked(&self, args: &[&str]) -> Result<String, GatewayError> {
        let output = self.run(args)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(GatewayError::CommandFailed {
                command: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn source_blocks(&self) -> Result<Vec<SourceBlock>, GatewayError> {
        let stdout = self.run_checked(&["list", "sources"])?;
        parse::parse_source_list(&stdout)
    }

    /// Read the mute flag out of the full source listing
    fn mute_from_list(&self, source_id: &str) -> Result<bool, GatewayError> {
        let blocks = self.source_blocks()?;
        let block = blocks
            .iter()
            .find(|b| b.name == source_id)
            .ok_or_else(|| GatewayError::Parse {
                command: "list sources".to_string(),
                detail: format!("source {} not listed", source_id),
            })?;
        block.muted.ok_or_else(|| GatewayError::Parse {
            command: "list sources".to_string(),
            detail: format!("no Mute field for {}", source_id),
        })
    }
}

impl Default for PactlGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn is_connection_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("connection failure")
        || lower.contains("connection refused")
        || lower.contains("no pulseaudio daemon running")
}

fn is_no_such_entity(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such entity")
}

impl AudioGateway for PactlGateway {
    fn list_sources(&self) -> Result<Vec<Source>, GatewayError> {
        let default_id = self.default_source_id().ok();
        let sources = self
            .source_blocks()?
            .into_iter()
            .filter(SourceBlock::is_input)
            .map(|block| Source {
                is_default: default_id.as_deref() == Some(block.name.as_str()),
                id: block.name,
                display_name: block.description,
            })
            .collect();
        Ok(sources)
    }

    fn default_source_id(&self) -> Result<String, GatewayError> {
        let stdout = self.run_checked(&["get-default-source"])?;
        parse::parse_default_source(&stdout)
    }

    fn create_loopback(
        &self,
        source_id: &str,
        latency_ms: u32,
    ) -> Result<ModuleHandle, GatewayError> {
        let source_arg = format!("source={}", source_id);
        let latency_arg = format!("latency_msec={}", latency_ms);
        let tag_arg = format!("sink_input_properties={}", LOOPBACK_TAG);
        let stdout = self.run_checked(&[
            "load-module",
            "module-loopback",
            &source_arg,
            &latency_arg,
            &tag_arg,
        ])?;
        let handle = parse::parse_module_index(&stdout)?;
        debug!("Loaded module-loopback {} for {}", handle, source_id);
        Ok(handle)
    }

    fn destroy_loopback(&self, handle: ModuleHandle) -> Result<Teardown, GatewayError> {
        let index = handle.0.to_string();
        let output = self.run(&["unload-module", &index])?;
        if output.success {
            return Ok(Teardown::Removed);
        }
        if is_no_such_entity(&output.stderr) {
            return Ok(Teardown::NotFound);
        }
        Err(GatewayError::CommandFailed {
            command: format!("unload-module {}", index),
            stderr: output.stderr.trim().to_string(),
        })
    }

    fn tagged_loopbacks(&self) -> Result<Vec<ModuleHandle>, GatewayError> {
        let stdout = self.run_checked(&["list", "short", "modules"])?;
        Ok(parse::parse_tagged_loopbacks(&stdout))
    }

    fn is_muted(&self, source_id: &str) -> Result<bool, GatewayError> {
        match self
            .run_checked(&["get-source-mute", source_id])
            .and_then(|stdout| parse::parse_mute(&stdout))
        {
            Ok(muted) => Ok(muted),
            Err(GatewayError::Unavailable(reason)) => Err(GatewayError::Unavailable(reason)),
            Err(e) => {
                // Older pactl builds lack get-source-mute
                warn!("get-source-mute failed ({}), falling back to source list", e);
                self.mute_from_list(source_id)
            }
        }
    }

    fn level(&self, source_id: &str) -> Result<f32, GatewayError> {
        self.meter.level(source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_detection() {
        assert!(is_connection_failure("Connection failure: Connection refused\n"));
        assert!(is_connection_failure("pa_context_connect() failed: Connection refused"));
        assert!(!is_connection_failure("Failure: No such entity"));
    }

    #[test]
    fn test_no_such_entity_detection() {
        assert!(is_no_such_entity("Failure: No such entity\n"));
        assert!(!is_no_such_entity("Failure: Access denied"));
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let gateway = PactlGateway {
            program: "mic-monitor-no-such-pactl".to_string(),
            timeout: Duration::from_millis(200),
            meter: LevelMeter::new(),
        };
        let err = gateway.default_source_id().unwrap_err();
        assert!(err.is_unavailable());
    }
}
