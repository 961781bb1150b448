use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Select phases per controller poll; one state register is latched in each.
pub const FRAME_PHASES: usize = 4;

/// Peripheral id bits a standard digital pad drives on the last phase.
pub const DIGITAL_PAD_ID: u8 = 0b100;

/// The thirteen inputs of a Saturn digital pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    C,
    X,
    Y,
    Z,
    L,
    R,
    Start,
}

impl Button {
    pub const ALL: [Button; 13] = [
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::A,
        Button::B,
        Button::C,
        Button::X,
        Button::Y,
        Button::Z,
        Button::L,
        Button::R,
        Button::Start,
    ];

    pub fn mask(self) -> u16 {
        1u16 << (self as u16)
    }

    pub fn label(self) -> &'static str {
        match self {
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
            Button::A => "a",
            Button::B => "b",
            Button::C => "c",
            Button::X => "x",
            Button::Y => "y",
            Button::Z => "z",
            Button::L => "l",
            Button::R => "r",
            Button::Start => "start",
        }
    }

    /// Case-insensitive lookup, used by the CLI and the rig command protocol.
    pub fn from_name(name: &str) -> Option<Button> {
        Button::ALL
            .iter()
            .copied()
            .find(|b| b.label().eq_ignore_ascii_case(name))
    }
}

/// Which pad line sits on which data bit during each select phase.
///
/// The pad multiplexes four groups of inputs onto D0..D3 as the console walks
/// the select lines. The last phase carries only L on D0; D1..D3 are the
/// peripheral id.
pub const NIBBLE_LAYOUT: [[Option<Button>; 4]; FRAME_PHASES] = [
    [
        Some(Button::Z),
        Some(Button::Y),
        Some(Button::X),
        Some(Button::R),
    ],
    [
        Some(Button::B),
        Some(Button::C),
        Some(Button::A),
        Some(Button::Start),
    ],
    [
        Some(Button::Up),
        Some(Button::Down),
        Some(Button::Left),
        Some(Button::Right),
    ],
    [Some(Button::L), None, None, None],
];

/// The four 8-bit state registers, one per select phase.
///
/// Raw latched nibbles live in the low four bits; the registers are only a
/// consistent snapshot once the decoder has walked a full frame. The decoder
/// owns that distinction, not callers of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SaturnRegisters {
    pub zyxr: u8,
    pub bcas: u8,
    pub dpad: u8,
    pub lid: u8,
}

impl SaturnRegisters {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Latch one sampled nibble into the register for `phase_index`.
    pub fn latch(&mut self, phase_index: u8, nibble: u8) {
        let nibble = nibble & 0x0F;
        match phase_index {
            0 => self.zyxr = nibble,
            1 => self.bcas = nibble,
            2 => self.dpad = nibble,
            _ => self.lid = nibble,
        }
    }

    pub fn raw(&self) -> [u8; FRAME_PHASES] {
        [self.zyxr, self.bcas, self.dpad, self.lid]
    }

    /// Decode a complete register file into a frame.
    ///
    /// Pad lines are active low: a cleared bit means pressed. The peripheral
    /// id bits are passed through as sampled.
    pub fn decode(&self, timestamp_us: u64) -> SaturnFrame {
        let raw = self.raw();
        let mut buttons = 0u16;

        for (phase, nibble) in raw.iter().enumerate() {
            for (bit, slot) in NIBBLE_LAYOUT[phase].iter().enumerate() {
                if let Some(button) = slot {
                    if nibble & (1 << bit) == 0 {
                        buttons |= button.mask();
                    }
                }
            }
        }

        SaturnFrame {
            buttons,
            peripheral_id: (self.lid >> 1) & 0x7,
            timestamp_us,
        }
    }
}

/// Build the active-low nibbles a pad would drive for a held-button mask.
///
/// This is the inverse of [`SaturnRegisters::decode`] and is what the rig
/// uses to put authentic traffic on the simulated bus.
pub fn encode_nibbles(held: u16) -> [u8; FRAME_PHASES] {
    let mut nibbles = [0x0Fu8; FRAME_PHASES];

    for (phase, nibble) in nibbles.iter_mut().enumerate() {
        for (bit, slot) in NIBBLE_LAYOUT[phase].iter().enumerate() {
            if let Some(button) = slot {
                if held & button.mask() != 0 {
                    *nibble &= !(1 << bit);
                }
            }
        }
    }

    // D1..D3 of the last phase carry the peripheral id, not button state.
    nibbles[FRAME_PHASES - 1] = (nibbles[FRAME_PHASES - 1] & 0x01) | (DIGITAL_PAD_ID << 1);
    nibbles
}

/// One complete, validated controller state snapshot.
///
/// Only the decoder constructs these, and only from a full register file, so
/// holding a `SaturnFrame` is itself the completeness guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaturnFrame {
    /// Active-high button mask, bit positions per [`Button`].
    pub buttons: u16,
    /// Peripheral id bits as sampled on the last phase.
    pub peripheral_id: u8,
    /// Bus timestamp of the edge that completed the frame.
    pub timestamp_us: u64,
}

impl SaturnFrame {
    pub fn pressed(&self, button: Button) -> bool {
        self.buttons & button.mask() != 0
    }

    pub fn pressed_list(&self) -> Vec<Button, 13> {
        let mut list = Vec::new();
        for button in Button::ALL {
            if self.pressed(button) {
                let _ = list.push(button);
            }
        }
        list
    }
}
