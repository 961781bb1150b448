pub mod saturn;

pub use saturn::SaturnSpy;

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::{BusEvent, BusProbe, ProbeError};
use crate::wire::{FrameSink, SinkError};

/// Upper bound on events consumed per poll call. Keeps one tick bounded-time
/// no matter how far the queue backed up.
pub const MAX_EVENTS_PER_POLL: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleId {
    Saturn,
}

impl ConsoleId {
    pub fn label(self) -> &'static str {
        match self {
            ConsoleId::Saturn => "saturn",
        }
    }
}

/// Outcome of one decode increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Waiting for a start condition.
    Idle,
    /// Mid-frame; the registers hold partial state.
    Receiving,
    /// This event completed a frame; it is latched and ready to publish.
    FrameReady,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpyStats {
    pub edges_seen: u32,
    pub frames_decoded: u32,
    pub frames_published: u32,
    pub framing_errors: u32,
    pub overruns: u32,
    pub timeouts: u32,
    pub queue_overflows: u32,
    pub frames_dropped: u32,
}

impl SpyStats {
    /// All recoverable decode anomalies folded into one number.
    pub fn decode_errors(&self) -> u32 {
        self.framing_errors
            .saturating_add(self.overruns)
            .saturating_add(self.timeouts)
            .saturating_add(self.queue_overflows)
    }
}

#[derive(Debug, Error)]
pub enum SpyError {
    #[error("bus probe fault: {0}")]
    Probe(#[from] ProbeError),
    #[error("frame sink fault: {0}")]
    Sink(#[from] SinkError),
}

/// Uniform lifecycle every console decoder implements.
///
/// A decoder is a passive observer: it reconstructs frames from bus events
/// it did not originate and must never stall the link. All four operations
/// are bounded-time.
pub trait ControllerSpy {
    /// One scheduler tick: drain pending bus events through the decode step
    /// and publish any frame that completed.
    fn poll(&mut self, probe: &mut dyn BusProbe, sink: &mut dyn FrameSink) -> Result<(), SpyError>;

    /// Exactly one edge-driven decode increment.
    fn update_state(&mut self, event: BusEvent) -> DecodeStatus;

    /// Forward the latched complete frame downstream in wire format.
    ///
    /// Strict no-op returning `Ok(false)` when no complete frame is pending;
    /// partial or stale state is never published.
    fn write_serial(&mut self, sink: &mut dyn FrameSink) -> Result<bool, SpyError>;

    /// Human-readable dump of the current decode state. Read-only.
    fn debug_serial(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    fn console(&self) -> ConsoleId;

    fn stats(&self) -> &SpyStats;

    /// Discard all partial and latched state and return to idle.
    fn reset(&mut self);
}
