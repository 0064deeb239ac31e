//! Input level metering using a persistent `parecord` capture
//!
//! Samples the monitored source at 8kHz mono s16 and keeps the RMS of the
//! latest 100ms chunk.

use super::GatewayError;
use log::{debug, warn};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// 100ms at 8kHz, s16le mono
const CHUNK_BYTES: usize = 1600;

/// A level older than this is considered silence
const STALE_AFTER: Duration = Duration::from_secs(1);

/// Latest level shared with the reader thread
struct MeterInner {
    level: f32,
    updated_at: Option<Instant>,
    /// Bumped on every restart so old readers stop publishing
    generation: u64,
    /// Set once `parecord` turned out to be missing
    disabled: bool,
}

struct Capture {
    device: String,
    child: Child,
}

/// Level meter bound to one source at a time
pub struct LevelMeter {
    inner: Arc<Mutex<MeterInner>>,
    capture: Mutex<Option<Capture>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MeterInner {
                level: 0.0,
                updated_at: None,
                generation: 0,
                disabled: false,
            })),
            capture: Mutex::new(None),
        }
    }

    /// Latest level for `source_id`, (re)starting the capture when needed
    pub fn level(&self, source_id: &str) -> Result<f32, GatewayError> {
        if lock(&self.inner).disabled {
            return Ok(0.0);
        }

        let mut capture = lock(&self.capture);
        let needs_restart = match capture.as_mut() {
            Some(current) if current.device != source_id => true,
            Some(current) => !matches!(current.child.try_wait(), Ok(None)),
            None => true,
        };

        if needs_restart {
            if let Some(mut old) = capture.take() {
                stop_child(&mut old.child);
            }
            *capture = self.start(source_id)?;
            return Ok(0.0);
        }

        let inner = lock(&self.inner);
        match inner.updated_at {
            Some(at) if at.elapsed() < STALE_AFTER => Ok(inner.level),
            _ => Ok(0.0),
        }
    }

    fn start(&self, source_id: &str) -> Result<Option<Capture>, GatewayError> {
        let spawned = Command::new("parecord")
            .args([
                "--raw",
                "--channels=1",
                "--format=s16le",
                "--rate=8000",
                "--latency-msec=100",
            ])
            .arg(format!("--device={}", source_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("parecord not found; audio activity detection disabled");
                lock(&self.inner).disabled = true;
                return Ok(None);
            }
            Err(e) => return Err(GatewayError::Unavailable(format!("parecord: {}", e))),
        };

        let Some(stdout) = child.stdout.take() else {
            stop_child(&mut child);
            return Err(GatewayError::Unavailable("parecord has no stdout".to_string()));
        };

        let generation = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.level = 0.0;
            inner.updated_at = None;
            inner.generation
        };

        debug!("Started level capture on {}", source_id);
        let inner = self.inner.clone();
        thread::spawn(move || read_levels(stdout, inner, generation));

        Ok(Some(Capture {
            device: source_id.to_string(),
            child,
        }))
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LevelMeter {
    fn drop(&mut self) {
        if let Some(mut capture) = lock(&self.capture).take() {
            stop_child(&mut capture.child);
        }
    }
}

fn stop_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_levels(mut stdout: ChildStdout, inner: Arc<Mutex<MeterInner>>, generation: u64) {
    let mut buffer = [0u8; CHUNK_BYTES];
    loop {
        if let Err(e) = stdout.read_exact(&mut buffer) {
            debug!("Level capture ended: {}", e);
            break;
        }
        let samples: Vec<i16> = buffer
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let rms = calculate_rms(&samples);

        let mut inner = lock(&inner);
        if inner.generation != generation {
            break;
        }
        inner.level = rms;
        inner.updated_at = Some(Instant::now());
    }
}

/// Calculate RMS of s16 samples, on the 0-32768 scale
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
