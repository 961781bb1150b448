use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::BusProbe;
use crate::spy::{ControllerSpy, SpyError, SpyStats};
use crate::wire::FrameSink;

/// Emit a diagnostic line every N ticks, roughly once per second at the
/// default tick rate.
pub const DEBUG_DUMP_INTERVAL_TICKS: u64 = 60;

/// Preallocated capacity for one diagnostic line.
pub const DEBUG_LINE_CAP: usize = 192;

pub type DebugLine = ArrayString<DEBUG_LINE_CAP>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostState {
    pub running: bool,
    pub ticks: u64,
    pub frames_published: u32,
    pub decode_errors: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("spy fault: {0}")]
    Spy(#[from] SpyError),
}

/// Owner of one probe/spy pair and its lifecycle.
///
/// This is the firmware main-loop object: something external paces it (a
/// [`crate::scheduler::TickScheduler`], a tokio interval, a replay loop) and
/// calls [`SpyHost::update`] once per tick. The host never blocks; one
/// update is one bounded poll of the spy.
pub struct SpyHost<P: BusProbe, S: ControllerSpy> {
    probe: P,
    spy: S,
    state: HostState,
    debug_interval_ticks: u64,
}

impl<P: BusProbe, S: ControllerSpy> SpyHost<P, S> {
    pub fn new(probe: P, spy: S) -> Self {
        Self {
            probe,
            spy,
            state: HostState {
                running: false,
                ticks: 0,
                frames_published: 0,
                decode_errors: 0,
                last_error: None,
            },
            debug_interval_ticks: DEBUG_DUMP_INTERVAL_TICKS,
        }
    }

    pub fn with_debug_interval(mut self, ticks: u64) -> Self {
        self.debug_interval_ticks = ticks.max(1);
        self
    }

    pub fn start(&mut self) {
        self.state.running = true;
    }

    pub fn stop(&mut self) {
        self.state.running = false;
    }

    /// One scheduler tick. Returns a diagnostic line on dump ticks.
    pub fn update(&mut self, sink: &mut dyn FrameSink) -> Result<Option<DebugLine>, HostError> {
        if !self.state.running {
            return Ok(None);
        }

        self.state.ticks += 1;

        if let Err(err) = self.spy.poll(&mut self.probe, sink) {
            self.state.last_error = Some(err.to_string());
            return Err(HostError::Spy(err));
        }

        let stats = self.spy.stats();
        self.state.frames_published = stats.frames_published;
        self.state.decode_errors = stats.decode_errors();

        if self.state.ticks % self.debug_interval_ticks == 0 {
            let mut line = DebugLine::new();
            // Truncation of an overlong dump is acceptable for a debug line.
            let _ = self.spy.debug_serial(&mut line);
            return Ok(Some(line));
        }

        Ok(None)
    }

    pub fn state(&self) -> &HostState {
        &self.state
    }

    pub fn stats(&self) -> &SpyStats {
        self.spy.stats()
    }

    pub fn spy(&self) -> &S {
        &self.spy
    }

    /// The live edge source, exposed so the sampling side can feed it.
    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }
}
