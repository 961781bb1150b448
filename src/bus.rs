use heapless::spsc::Queue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Depth of the edge queue between the sampling source and the decoder.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// One observed select-line transition on the controller bus.
///
/// `th`/`tr` are the select lines as they read after the transition; the data
/// nibble D3..D0 is latched at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    pub timestamp_us: u64,
    pub th: bool,
    pub tr: bool,
    pub data: u8,
}

impl BusEvent {
    /// Protocol phase index for this select state, 0..=3 in poll order.
    pub fn select_index(&self) -> u8 {
        (u8::from(self.th) << 1) | u8::from(self.tr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The edge queue overflowed and events were lost.
    #[error("edge queue saturated; bus events were lost")]
    Saturated,
    /// The edge source is gone; no further events will arrive.
    #[error("bus source disconnected")]
    Disconnected,
}

/// Non-blocking source of bus events.
///
/// `WouldBlock` means no edge is pending right now; the caller's poll cycle
/// moves on and retries next tick.
pub trait BusProbe {
    fn poll_event(&mut self) -> nb::Result<BusEvent, ProbeError>;
}

/// Queue-backed probe for a live edge source.
///
/// The sampling side pushes through `push_event`; the decoder drains through
/// [`BusProbe`]. Overflow is reported once, then the stream resumes so the
/// decoder can resynchronize on the next start condition.
#[derive(Debug)]
pub struct QueueProbe {
    queue: Queue<BusEvent, EVENT_QUEUE_DEPTH>,
    overflowed: bool,
}

impl QueueProbe {
    pub fn new() -> Self {
        Self {
            queue: Queue::new(),
            overflowed: false,
        }
    }

    /// Returns false when the event had to be discarded.
    pub fn push_event(&mut self, event: BusEvent) -> bool {
        if self.queue.enqueue(event).is_err() {
            self.overflowed = true;
            return false;
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Default for QueueProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl BusProbe for QueueProbe {
    fn poll_event(&mut self) -> nb::Result<BusEvent, ProbeError> {
        if self.overflowed {
            self.overflowed = false;
            return Err(nb::Error::Other(ProbeError::Saturated));
        }

        match self.queue.dequeue() {
            Some(event) => Ok(event),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture line {line}: {reason}")]
    BadLine { line: usize, reason: &'static str },
}

/// Probe that replays a prerecorded event list, for offline decode and tests.
#[derive(Debug)]
pub struct ReplayProbe {
    events: std::vec::Vec<BusEvent>,
    cursor: usize,
}

impl ReplayProbe {
    pub fn from_events(events: std::vec::Vec<BusEvent>) -> Self {
        Self { events, cursor: 0 }
    }

    /// Parse a capture file: one `<t_us> <th> <tr> <nibble-hex>` record per
    /// line, blank lines and `#` comments skipped.
    pub fn from_capture(text: &str) -> Result<Self, CaptureError> {
        let mut events = std::vec::Vec::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut fields = trimmed.split_whitespace();
            let timestamp_us = fields
                .next()
                .and_then(|f| f.parse::<u64>().ok())
                .ok_or(CaptureError::BadLine {
                    line,
                    reason: "bad timestamp",
                })?;
            let th = parse_line_level(fields.next()).ok_or(CaptureError::BadLine {
                line,
                reason: "bad th level",
            })?;
            let tr = parse_line_level(fields.next()).ok_or(CaptureError::BadLine {
                line,
                reason: "bad tr level",
            })?;
            let data = fields
                .next()
                .and_then(|f| u8::from_str_radix(f, 16).ok())
                .filter(|d| *d <= 0x0F)
                .ok_or(CaptureError::BadLine {
                    line,
                    reason: "bad data nibble",
                })?;

            if fields.next().is_some() {
                return Err(CaptureError::BadLine {
                    line,
                    reason: "trailing fields",
                });
            }

            events.push(BusEvent {
                timestamp_us,
                th,
                tr,
                data,
            });
        }

        Ok(Self { events, cursor: 0 })
    }

    pub fn exhausted(&self) -> bool {
        self.cursor >= self.events.len()
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }
}

impl BusProbe for ReplayProbe {
    fn poll_event(&mut self) -> nb::Result<BusEvent, ProbeError> {
        match self.events.get(self.cursor) {
            Some(event) => {
                self.cursor += 1;
                Ok(*event)
            }
            None => Err(nb::Error::WouldBlock),
        }
    }
}

fn parse_line_level(field: Option<&str>) -> Option<bool> {
    match field {
        Some("0") => Some(false),
        Some("1") => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_index_follows_poll_order() {
        let mut event = BusEvent {
            timestamp_us: 0,
            th: false,
            tr: false,
            data: 0,
        };
        assert_eq!(event.select_index(), 0);

        event.tr = true;
        assert_eq!(event.select_index(), 1);

        event.th = true;
        event.tr = false;
        assert_eq!(event.select_index(), 2);

        event.tr = true;
        assert_eq!(event.select_index(), 3);
    }

    #[test]
    fn queue_probe_reports_overflow_once_then_resumes() {
        let mut probe = QueueProbe::new();
        let event = BusEvent {
            timestamp_us: 1,
            th: false,
            tr: false,
            data: 0x0F,
        };

        let mut accepted = 0;
        for _ in 0..EVENT_QUEUE_DEPTH + 8 {
            if probe.push_event(event) {
                accepted += 1;
            }
        }
        assert!(accepted < EVENT_QUEUE_DEPTH + 8);

        assert_eq!(
            probe.poll_event(),
            Err(nb::Error::Other(ProbeError::Saturated))
        );
        assert!(probe.poll_event().is_ok());
    }

    #[test]
    fn capture_parsing_accepts_comments_and_blanks() {
        let capture = "# saturn capture\n\n100 0 0 f\n140 0 1 b\n";
        let mut probe = ReplayProbe::from_capture(capture).unwrap();

        assert_eq!(probe.remaining(), 2);
        let first = probe.poll_event().unwrap();
        assert_eq!(first.timestamp_us, 100);
        assert_eq!(first.select_index(), 0);
        assert_eq!(first.data, 0x0F);

        let second = probe.poll_event().unwrap();
        assert_eq!(second.select_index(), 1);
        assert_eq!(second.data, 0x0B);

        assert_eq!(probe.poll_event(), Err(nb::Error::WouldBlock));
        assert!(probe.exhausted());
    }

    #[test]
    fn capture_parsing_rejects_malformed_records() {
        assert!(ReplayProbe::from_capture("100 0 0 f extra").is_err());
        assert!(ReplayProbe::from_capture("100 2 0 f").is_err());
        assert!(ReplayProbe::from_capture("100 0 0 1f").is_err());
        assert!(ReplayProbe::from_capture("oops 0 0 f").is_err());
    }
}
