//! # padspy
//!
//! A passive observer of the electrical traffic between a game console and
//! its controller. The decoder reconstructs framed controller state from
//! raw select-line transitions in real time and streams each finished frame
//! to a downstream viewer, without ever originating traffic or stalling the
//! live link.
//!
//! ## Features
//!
//! - **Saturn digital pad decoding**: four state registers latched across
//!   the console's select-phase walk, with framing/overrun/timeout recovery
//! - **Uniform spy interface**: one lifecycle contract per console protocol
//! - **Non-blocking bus layer**: `nb`-style probes, queue-backed or replayed
//!   from capture files
//! - **Wire streaming**: byte-per-button packets plus a host-side reader
//! - **Simulation rig**: scripted console/pad traffic with deterministic
//!   glitch injection for recovery testing
//!
//! ## Quick Start
//!
//! ```rust
//! use padspy::bus::ReplayProbe;
//! use padspy::wire::CaptureSink;
//! use padspy::{SaturnSpy, SpyHost};
//!
//! let probe = ReplayProbe::from_events(vec![]);
//! let mut host = SpyHost::new(probe, SaturnSpy::new());
//! host.start();
//!
//! let mut sink = CaptureSink::new();
//! host.update(&mut sink).unwrap();
//! assert_eq!(host.stats().frames_published, 0);
//! ```
//!
//! ## Architecture
//!
//! - [`spy`] - the `ControllerSpy` contract and the Saturn decoder
//! - [`bus`] - bus events and non-blocking probes
//! - [`frame`] - state registers and decoded frames
//! - [`wire`] - downstream wire format and host-side reader
//! - [`scheduler`] - cooperative tick pacing
//! - [`host`] - probe/spy lifecycle owner
//! - [`rig`] - simulated console and pad with glitch injection

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod bus;
pub mod frame;
pub mod host;
pub mod rig;
pub mod scheduler;
pub mod spy;
pub mod wire;

// Re-export main public types for convenience
pub use frame::{Button, SaturnFrame};
pub use host::SpyHost;
pub use spy::{ControllerSpy, SaturnSpy};
