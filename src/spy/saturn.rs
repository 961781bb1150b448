use core::fmt;

use crate::bus::{BusEvent, BusProbe, ProbeError};
use crate::frame::{SaturnFrame, SaturnRegisters, FRAME_PHASES};
use crate::wire::{encode_frame, FrameSink};

use super::{ConsoleId, ControllerSpy, DecodeStatus, SpyError, SpyStats, MAX_EVENTS_PER_POLL};

/// Longest tolerated gap between select edges inside one frame. The console
/// walks all four phases within a couple hundred microseconds; a gap past
/// this is a stalled or abandoned poll, not a slow one.
pub const MAX_INTER_EDGE_GAP_US: u64 = 1_500;

const START_PHASE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodePhase {
    Idle,
    Receiving { next: u8 },
    Complete { frame: SaturnFrame },
}

/// Saturn digital pad decoder.
///
/// The console steps the two select lines through four states per poll; the
/// pad answers each state with one nibble. This machine latches the four
/// nibbles into the state registers strictly in protocol order and publishes
/// only when the frame shape is fully satisfied. Anything malformed drops
/// the frame and waits for the next start condition; the console polls
/// continuously, so recovery is always one frame away.
pub struct SaturnSpy {
    regs: SaturnRegisters,
    phase: DecodePhase,
    last_edge_us: u64,
    stats: SpyStats,
}

impl SaturnSpy {
    pub fn new() -> Self {
        Self {
            regs: SaturnRegisters::default(),
            phase: DecodePhase::Idle,
            last_edge_us: 0,
            stats: SpyStats::default(),
        }
    }

    pub fn registers(&self) -> &SaturnRegisters {
        &self.regs
    }

    /// The latched frame awaiting publication, if the machine is complete.
    pub fn latched_frame(&self) -> Option<SaturnFrame> {
        match self.phase {
            DecodePhase::Complete { frame } => Some(frame),
            _ => None,
        }
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.phase, DecodePhase::Receiving { .. })
    }

    fn begin_frame(&mut self, event: &BusEvent) {
        self.regs.clear();
        self.regs.latch(START_PHASE, event.data);
        self.phase = DecodePhase::Receiving {
            next: START_PHASE + 1,
        };
    }

    fn abort_partial(&mut self) {
        if matches!(self.phase, DecodePhase::Receiving { .. }) {
            self.regs.clear();
            self.phase = DecodePhase::Idle;
        }
    }

    /// Discard the latched frame, if any, counting it as dropped.
    fn drop_latched(&mut self) {
        if matches!(self.phase, DecodePhase::Complete { .. }) {
            self.phase = DecodePhase::Idle;
            self.stats.frames_dropped += 1;
        }
    }
}

impl Default for SaturnSpy {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerSpy for SaturnSpy {
    fn poll(&mut self, probe: &mut dyn BusProbe, sink: &mut dyn FrameSink) -> Result<(), SpyError> {
        for _ in 0..MAX_EVENTS_PER_POLL {
            match probe.poll_event() {
                Ok(event) => {
                    if self.update_state(event) == DecodeStatus::FrameReady {
                        self.write_serial(sink)?;
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(ProbeError::Saturated)) => {
                    // Edges were lost; whatever is mid-flight cannot be
                    // trusted. A completed frame predates the loss and
                    // stays publishable.
                    self.stats.queue_overflows += 1;
                    self.abort_partial();
                }
                Err(nb::Error::Other(err @ ProbeError::Disconnected)) => {
                    return Err(SpyError::Probe(err));
                }
            }
        }
        Ok(())
    }

    fn update_state(&mut self, event: BusEvent) -> DecodeStatus {
        self.stats.edges_seen = self.stats.edges_seen.saturating_add(1);
        let select = event.select_index();

        // Stalled frame: abandon it, then let this edge stand on its own.
        if self.is_receiving()
            && event.timestamp_us.saturating_sub(self.last_edge_us) > MAX_INTER_EDGE_GAP_US
        {
            self.stats.timeouts += 1;
            self.abort_partial();
        }
        self.last_edge_us = event.timestamp_us;

        match self.phase {
            DecodePhase::Idle => {
                if select == START_PHASE {
                    self.begin_frame(&event);
                    DecodeStatus::Receiving
                } else {
                    // Joined mid-frame; wait for the next start condition.
                    DecodeStatus::Idle
                }
            }
            DecodePhase::Receiving { next } => {
                if select == next {
                    self.regs.latch(select, event.data);
                    if usize::from(select) + 1 == FRAME_PHASES {
                        let frame = self.regs.decode(event.timestamp_us);
                        self.phase = DecodePhase::Complete { frame };
                        self.stats.frames_decoded += 1;
                        DecodeStatus::FrameReady
                    } else {
                        self.phase = DecodePhase::Receiving { next: next + 1 };
                        DecodeStatus::Receiving
                    }
                } else if select == START_PHASE {
                    // The console restarted its poll mid-frame.
                    self.stats.framing_errors += 1;
                    self.begin_frame(&event);
                    DecodeStatus::Receiving
                } else {
                    self.stats.framing_errors += 1;
                    self.abort_partial();
                    DecodeStatus::Idle
                }
            }
            DecodePhase::Complete { .. } => {
                if select == START_PHASE {
                    // A late publish must not block resynchronization.
                    self.drop_latched();
                    self.begin_frame(&event);
                    DecodeStatus::Receiving
                } else {
                    // More edges than the frame shape allows: the frame is
                    // rejected, not truncated.
                    self.stats.overruns += 1;
                    self.phase = DecodePhase::Idle;
                    self.regs.clear();
                    DecodeStatus::Idle
                }
            }
        }
    }

    fn write_serial(&mut self, sink: &mut dyn FrameSink) -> Result<bool, SpyError> {
        match self.phase {
            DecodePhase::Complete { frame } => {
                sink.write_frame(&encode_frame(&frame))?;
                self.phase = DecodePhase::Idle;
                self.stats.frames_published += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn debug_serial(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let raw = self.regs.raw();
        write!(
            out,
            "{} regs=[{:02x} {:02x} {:02x} {:02x}] ",
            self.console().label(),
            raw[0],
            raw[1],
            raw[2],
            raw[3]
        )?;

        match self.phase {
            DecodePhase::Idle => write!(out, "phase=idle"),
            DecodePhase::Receiving { next } => write!(out, "phase=rx@{next}"),
            DecodePhase::Complete { frame } => {
                write!(out, "phase=complete id={:03b} buttons=", frame.peripheral_id)?;
                let pressed = frame.pressed_list();
                if pressed.is_empty() {
                    write!(out, "none")?;
                } else {
                    for (index, button) in pressed.iter().enumerate() {
                        if index > 0 {
                            write!(out, "+")?;
                        }
                        write!(out, "{}", button.label())?;
                    }
                }
                Ok(())
            }
        }
    }

    fn console(&self) -> ConsoleId {
        ConsoleId::Saturn
    }

    fn stats(&self) -> &SpyStats {
        &self.stats
    }

    fn reset(&mut self) {
        self.regs.clear();
        self.phase = DecodePhase::Idle;
        self.last_edge_us = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_nibbles;
    use crate::wire::CaptureSink;

    fn phase_event(index: u8, data: u8, timestamp_us: u64) -> BusEvent {
        BusEvent {
            timestamp_us,
            th: index & 0b10 != 0,
            tr: index & 0b01 != 0,
            data,
        }
    }

    fn feed_frame(spy: &mut SaturnSpy, held: u16, start_us: u64) -> DecodeStatus {
        let nibbles = encode_nibbles(held);
        let mut status = DecodeStatus::Idle;
        for (index, nibble) in nibbles.iter().enumerate() {
            status = spy.update_state(phase_event(
                index as u8,
                *nibble,
                start_us + index as u64 * 40,
            ));
        }
        status
    }

    #[test]
    fn full_phase_walk_latches_a_frame() {
        let mut spy = SaturnSpy::new();
        let status = feed_frame(&mut spy, crate::frame::Button::A.mask(), 1_000);

        assert_eq!(status, DecodeStatus::FrameReady);
        let frame = spy.latched_frame().unwrap();
        assert!(frame.pressed(crate::frame::Button::A));
        assert_eq!(frame.buttons.count_ones(), 1);
        assert_eq!(spy.stats().frames_decoded, 1);
    }

    #[test]
    fn out_of_order_phase_aborts_the_frame() {
        let mut spy = SaturnSpy::new();
        spy.update_state(phase_event(0, 0x0F, 100));
        let status = spy.update_state(phase_event(2, 0x0F, 140));

        assert_eq!(status, DecodeStatus::Idle);
        assert_eq!(spy.stats().framing_errors, 1);
        assert_eq!(spy.registers().raw(), [0, 0, 0, 0]);
    }

    #[test]
    fn stalled_frame_times_out_and_the_edge_restarts() {
        let mut spy = SaturnSpy::new();
        spy.update_state(phase_event(0, 0x0F, 100));
        spy.update_state(phase_event(1, 0x0F, 140));

        // Far past the inter-edge bound; the partial frame is abandoned and
        // this start edge opens a new one.
        let status = spy.update_state(phase_event(0, 0x0F, 100 + MAX_INTER_EDGE_GAP_US * 4));
        assert_eq!(status, DecodeStatus::Receiving);
        assert_eq!(spy.stats().timeouts, 1);
    }

    #[test]
    fn overrun_edge_rejects_the_completed_frame() {
        let mut spy = SaturnSpy::new();
        assert_eq!(feed_frame(&mut spy, 0, 1_000), DecodeStatus::FrameReady);

        let status = spy.update_state(phase_event(3, 0x0F, 1_200));
        assert_eq!(status, DecodeStatus::Idle);
        assert_eq!(spy.stats().overruns, 1);
        assert!(spy.latched_frame().is_none());

        let mut sink = CaptureSink::new();
        assert!(!spy.write_serial(&mut sink).unwrap());
        assert!(sink.is_empty());
    }

    #[test]
    fn unpublished_frame_is_dropped_on_the_next_start() {
        let mut spy = SaturnSpy::new();
        feed_frame(&mut spy, 0, 1_000);
        assert!(spy.latched_frame().is_some());

        feed_frame(&mut spy, 0, 20_000);
        assert_eq!(spy.stats().frames_dropped, 1);
        assert_eq!(spy.stats().frames_decoded, 2);
    }

    #[test]
    fn saturated_probe_aborts_partial_state_and_continues() {
        let mut spy = SaturnSpy::new();
        let mut probe = crate::bus::QueueProbe::new();
        let mut sink = CaptureSink::new();

        // Overfill the queue so the probe reports saturation first.
        for i in 0..crate::bus::EVENT_QUEUE_DEPTH + 4 {
            probe.push_event(phase_event((i % 4) as u8, 0x0F, i as u64 * 40));
        }

        spy.poll(&mut probe, &mut sink).unwrap();
        assert_eq!(spy.stats().queue_overflows, 1);
        // The queued events still decode into frames after the overflow.
        assert!(spy.stats().frames_decoded > 0);
    }
}
