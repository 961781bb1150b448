use serde::{Deserialize, Serialize};
use static_assertions::{const_assert, const_assert_ne};
use thiserror::Error;

use crate::frame::{Button, SaturnFrame};

/// Button order on the wire, one byte per button.
pub const WIRE_BUTTON_ORDER: [Button; 13] = [
    Button::Up,
    Button::Down,
    Button::Left,
    Button::Right,
    Button::Start,
    Button::A,
    Button::B,
    Button::C,
    Button::X,
    Button::Y,
    Button::Z,
    Button::L,
    Button::R,
];

pub const WIRE_PACKET_LEN: usize = WIRE_BUTTON_ORDER.len() + 1;
pub const WIRE_TERMINATOR: u8 = b'\n';

const PRESSED: u8 = 0x01;
const RELEASED: u8 = 0x00;

// The terminator must never collide with a button byte.
const_assert_ne!(WIRE_TERMINATOR, PRESSED);
const_assert_ne!(WIRE_TERMINATOR, RELEASED);
const_assert!(WIRE_PACKET_LEN == 14);

/// Encode a decoded frame into its wire packet: one 0x00/0x01 byte per
/// button in [`WIRE_BUTTON_ORDER`], newline terminated.
pub fn encode_frame(frame: &SaturnFrame) -> [u8; WIRE_PACKET_LEN] {
    let mut packet = [RELEASED; WIRE_PACKET_LEN];
    for (slot, button) in packet.iter_mut().zip(WIRE_BUTTON_ORDER.iter()) {
        if frame.pressed(*button) {
            *slot = PRESSED;
        }
    }
    packet[WIRE_PACKET_LEN - 1] = WIRE_TERMINATOR;
    packet
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink backpressure; frame not accepted")]
    Busy,
    #[error("sink closed")]
    Closed,
}

/// Downstream consumer of wire packets. The transport behind it (serial
/// link, TCP fan-out, file) is not this crate's concern.
pub trait FrameSink {
    fn write_frame(&mut self, packet: &[u8]) -> Result<(), SinkError>;
}

/// Sink that retains every packet, for tests and offline replay.
#[derive(Debug, Default)]
pub struct CaptureSink {
    packets: std::vec::Vec<std::vec::Vec<u8>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets(&self) -> &[std::vec::Vec<u8>] {
        &self.packets
    }

    pub fn take_packets(&mut self) -> std::vec::Vec<std::vec::Vec<u8>> {
        std::mem::take(&mut self.packets)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl FrameSink for CaptureSink {
    fn write_frame(&mut self, packet: &[u8]) -> Result<(), SinkError> {
        self.packets.push(packet.to_vec());
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn write_frame(&mut self, _packet: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("packet truncated: {0} bytes")]
    Truncated(usize),
    #[error("packet missing terminator")]
    MissingTerminator,
}

/// Host-side view of one parsed packet: the button mask plus the analog
/// x/y the viewer derives from the D-pad.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadState {
    pub buttons: u16,
    pub x: f32,
    pub y: f32,
}

impl PadState {
    pub fn pressed(&self, button: Button) -> bool {
        self.buttons & button.mask() != 0
    }
}

/// Parse a wire packet back into controller state.
///
/// The D-pad doubles as a crude analog stick for display purposes: each axis
/// maps to -1/0/+1 and diagonals are pulled back onto the unit circle at the
/// same angle.
pub fn parse_packet(packet: &[u8]) -> Result<PadState, WireError> {
    if packet.len() < WIRE_PACKET_LEN {
        return Err(WireError::Truncated(packet.len()));
    }
    if packet[WIRE_PACKET_LEN - 1] != WIRE_TERMINATOR {
        return Err(WireError::MissingTerminator);
    }

    let mut buttons = 0u16;
    for (slot, button) in packet.iter().zip(WIRE_BUTTON_ORDER.iter()) {
        if *slot != RELEASED {
            buttons |= button.mask();
        }
    }

    let mut x = 0.0f32;
    let mut y = 0.0f32;

    if packet[3] != RELEASED {
        x = 1.0;
    } else if packet[2] != RELEASED {
        x = -1.0;
    }

    if packet[0] != RELEASED {
        y = 1.0;
    } else if packet[1] != RELEASED {
        y = -1.0;
    }

    if (x != 0.0 || y != 0.0) && (x * x + y * y).sqrt() > 1.0 {
        let radian = y.atan2(x);
        x = radian.cos();
        y = radian.sin();
    }

    Ok(PadState { buttons, x, y })
}
