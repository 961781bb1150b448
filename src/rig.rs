use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::bus::BusEvent;
use crate::frame::{encode_nibbles, Button, FRAME_PHASES};

/// Gap between select edges within one poll cycle.
const PHASE_STEP_US: u64 = 40;

/// Gap between poll cycles, one video field.
pub const POLL_CYCLE_US: u64 = 16_667;

/// A stall pauses the phase walk for longer than the decoder tolerates.
const STALL_GAP_US: u64 = 5_000;

/// Echo of an already-emitted edge, a few microseconds later.
const REPEAT_STEP_US: u64 = 5;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GlitchConfig {
    pub enabled: bool,
    pub drop_rate_percent: u8,
    pub repeat_rate_percent: u8,
    pub stall_rate_percent: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RigStats {
    pub cycles_generated: u32,
    pub edges_emitted: u32,
    pub edges_dropped: u32,
    pub edges_repeated: u32,
    pub stalls_injected: u32,
}

/// Scripted console-plus-pad pair.
///
/// Generates the select-phase walk a real console performs each poll cycle,
/// with the pad answering from a held-button mask. Glitch injection mangles
/// the stream the way a marginal tap wiring does: dropped edges, echoed
/// edges, stalled walks. Deterministic so failures replay exactly.
#[derive(Debug)]
pub struct ConsoleRig {
    held: u16,
    clock_us: u64,
    config: GlitchConfig,
    stats: RigStats,
    rng_state: u64,
}

impl ConsoleRig {
    pub fn new() -> Self {
        Self {
            held: 0,
            clock_us: 0,
            config: GlitchConfig::default(),
            stats: RigStats::default(),
            // Fixed seed for deterministic behavior
            rng_state: 0x2545_F491_4F6C_DD1D,
        }
    }

    pub fn press(&mut self, button: Button) {
        self.held |= button.mask();
    }

    pub fn release(&mut self, button: Button) {
        self.held &= !button.mask();
    }

    pub fn release_all(&mut self) {
        self.held = 0;
    }

    pub fn set_held(&mut self, mask: u16) {
        self.held = mask;
    }

    pub fn held(&self) -> u16 {
        self.held
    }

    pub fn set_glitch(&mut self, config: GlitchConfig) {
        self.config = config;
    }

    pub fn glitch(&self) -> &GlitchConfig {
        &self.config
    }

    pub fn stats(&self) -> &RigStats {
        &self.stats
    }

    pub fn clock_us(&self) -> u64 {
        self.clock_us
    }

    fn next_random(&mut self) -> u32 {
        // xorshift* keeps the rig dependency-free and reproducible.
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32
    }

    fn roll_percent(&mut self, rate: u8) -> bool {
        rate > 0 && self.next_random() % 100 < u32::from(rate)
    }

    /// One console poll cycle: up to four select edges, possibly glitched.
    pub fn poll_cycle(&mut self) -> Vec<BusEvent, 8> {
        self.stats.cycles_generated += 1;
        let nibbles = encode_nibbles(self.held);
        let mut events: Vec<BusEvent, 8> = Vec::new();
        let cycle_start = self.clock_us;

        for index in 0..FRAME_PHASES as u8 {
            self.clock_us += PHASE_STEP_US;

            if self.config.enabled && self.roll_percent(self.config.drop_rate_percent) {
                self.stats.edges_dropped += 1;
                continue;
            }

            let event = BusEvent {
                timestamp_us: self.clock_us,
                th: index & 0b10 != 0,
                tr: index & 0b01 != 0,
                data: nibbles[usize::from(index)],
            };
            let _ = events.push(event);
            self.stats.edges_emitted += 1;

            if self.config.enabled && self.roll_percent(self.config.repeat_rate_percent) {
                self.clock_us += REPEAT_STEP_US;
                let _ = events.push(BusEvent {
                    timestamp_us: self.clock_us,
                    ..event
                });
                self.stats.edges_repeated += 1;
            }

            if self.config.enabled && self.roll_percent(self.config.stall_rate_percent) {
                self.clock_us += STALL_GAP_US;
                self.stats.stalls_injected += 1;
            }
        }

        self.clock_us = cycle_start + POLL_CYCLE_US;
        events
    }
}

impl Default for ConsoleRig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_cycle_emits_four_ordered_edges() {
        let mut rig = ConsoleRig::new();
        rig.press(Button::Start);

        let events = rig.poll_cycle();
        assert_eq!(events.len(), FRAME_PHASES);
        for (index, event) in events.iter().enumerate() {
            assert_eq!(usize::from(event.select_index()), index);
        }
        assert!(events.windows(2).all(|w| w[0].timestamp_us < w[1].timestamp_us));
    }

    #[test]
    fn cycles_are_spaced_one_field_apart() {
        let mut rig = ConsoleRig::new();
        let first = rig.poll_cycle();
        let second = rig.poll_cycle();
        assert_eq!(
            second[0].timestamp_us - first[0].timestamp_us,
            POLL_CYCLE_US
        );
    }

    #[test]
    fn drop_glitch_removes_edges_deterministically() {
        let mut a = ConsoleRig::new();
        let mut b = ConsoleRig::new();
        let config = GlitchConfig {
            enabled: true,
            drop_rate_percent: 40,
            repeat_rate_percent: 0,
            stall_rate_percent: 0,
        };
        a.set_glitch(config);
        b.set_glitch(config);

        let mut dropped = 0;
        for _ in 0..50 {
            let ea = a.poll_cycle();
            let eb = b.poll_cycle();
            assert_eq!(&ea[..], &eb[..]);
            dropped += FRAME_PHASES - ea.len();
        }
        assert!(dropped > 0);
        assert_eq!(a.stats().edges_dropped as usize, dropped);
    }

    #[test]
    fn glitches_are_off_by_default() {
        let mut rig = ConsoleRig::new();
        for _ in 0..20 {
            assert_eq!(rig.poll_cycle().len(), FRAME_PHASES);
        }
        assert_eq!(rig.stats().edges_dropped, 0);
        assert_eq!(rig.stats().edges_repeated, 0);
        assert_eq!(rig.stats().stalls_injected, 0);
    }
}
