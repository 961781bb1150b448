use padspy::bus::BusEvent;
use padspy::frame::{encode_nibbles, Button, DIGITAL_PAD_ID};
use padspy::spy::{ControllerSpy, DecodeStatus, SaturnSpy};
use padspy::wire::{encode_frame, CaptureSink};

fn phase_event(index: u8, data: u8, timestamp_us: u64) -> BusEvent {
    BusEvent {
        timestamp_us,
        th: index & 0b10 != 0,
        tr: index & 0b01 != 0,
        data,
    }
}

/// The four edges of one well-formed poll cycle for a held-button mask.
fn frame_events(held: u16, start_us: u64) -> Vec<BusEvent> {
    encode_nibbles(held)
        .iter()
        .enumerate()
        .map(|(index, nibble)| phase_event(index as u8, *nibble, start_us + index as u64 * 40))
        .collect()
}

#[test]
fn zero_state_after_construction() {
    let mut spy = SaturnSpy::new();

    assert_eq!(spy.registers().raw(), [0, 0, 0, 0]);
    assert!(spy.latched_frame().is_none());

    let stats = spy.stats();
    assert_eq!(stats.edges_seen, 0);
    assert_eq!(stats.frames_decoded, 0);
    assert_eq!(stats.frames_published, 0);
    assert_eq!(stats.decode_errors(), 0);

    // Publishing before anything was decoded is a strict no-op.
    let mut sink = CaptureSink::new();
    assert!(!spy.write_serial(&mut sink).unwrap());
    assert!(sink.is_empty());
}

#[test]
fn short_sequences_never_publish() {
    for prefix_len in 0..4 {
        let mut spy = SaturnSpy::new();
        let mut sink = CaptureSink::new();

        for event in frame_events(Button::A.mask(), 1_000).into_iter().take(prefix_len) {
            let status = spy.update_state(event);
            assert_ne!(status, DecodeStatus::FrameReady, "prefix {prefix_len}");
        }

        assert!(!spy.write_serial(&mut sink).unwrap(), "prefix {prefix_len}");
        assert!(sink.is_empty(), "prefix {prefix_len}");
    }
}

#[test]
fn complete_frame_publishes_exact_snapshot() {
    let held = Button::A.mask() | Button::Up.mask() | Button::L.mask();
    let mut spy = SaturnSpy::new();

    let mut status = DecodeStatus::Idle;
    for event in frame_events(held, 1_000) {
        status = spy.update_state(event);
    }
    assert_eq!(status, DecodeStatus::FrameReady);

    let latched = spy.latched_frame().expect("frame should be latched");
    assert_eq!(latched.buttons, held);
    assert_eq!(latched.peripheral_id, DIGITAL_PAD_ID);
    assert_eq!(latched.timestamp_us, 1_000 + 3 * 40);

    let mut sink = CaptureSink::new();
    assert!(spy.write_serial(&mut sink).unwrap());
    assert_eq!(sink.packets().len(), 1);
    assert_eq!(sink.packets()[0], encode_frame(&latched).to_vec());

    // The latch is consumed by publication.
    assert!(!spy.write_serial(&mut sink).unwrap());
    assert_eq!(sink.packets().len(), 1);
    assert_eq!(spy.stats().frames_published, 1);
}

#[test]
fn debug_serial_is_read_only_in_every_phase() {
    let mut spy = SaturnSpy::new();
    let events = frame_events(Button::Start.mask(), 1_000);

    for event in events {
        let mut first = String::new();
        let mut second = String::new();
        spy.debug_serial(&mut first).unwrap();
        let regs_before = spy.registers().raw();
        spy.debug_serial(&mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(spy.registers().raw(), regs_before);
        assert!(first.starts_with("saturn"));

        spy.update_state(event);
    }

    // Repeat in the complete phase as well.
    let mut first = String::new();
    let mut second = String::new();
    spy.debug_serial(&mut first).unwrap();
    spy.debug_serial(&mut second).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("start"));
    assert!(spy.latched_frame().is_some());
}

#[test]
fn malformed_edge_then_valid_frame_recovers_cleanly() {
    let mut spy = SaturnSpy::new();

    // Two good edges, then a phase that skips ahead.
    let garbage = frame_events(Button::C.mask(), 1_000);
    spy.update_state(garbage[0]);
    spy.update_state(garbage[1]);
    let status = spy.update_state(phase_event(3, 0x0F, 1_100));
    assert_eq!(status, DecodeStatus::Idle);
    assert_eq!(spy.stats().framing_errors, 1);

    // The next real frame decodes with no residue from the aborted one.
    let held = Button::X.mask();
    let mut status = DecodeStatus::Idle;
    for event in frame_events(held, 20_000) {
        status = spy.update_state(event);
    }
    assert_eq!(status, DecodeStatus::FrameReady);
    assert_eq!(spy.latched_frame().unwrap().buttons, held);
}

#[test]
fn restart_mid_frame_decodes_the_new_poll() {
    let mut spy = SaturnSpy::new();

    let aborted = frame_events(Button::B.mask(), 1_000);
    spy.update_state(aborted[0]);
    spy.update_state(aborted[1]);

    // The console restarts its poll with different pad state.
    let held = Button::R.mask() | Button::Down.mask();
    let mut status = DecodeStatus::Idle;
    for event in frame_events(held, 1_200) {
        status = spy.update_state(event);
    }

    assert_eq!(status, DecodeStatus::FrameReady);
    assert_eq!(spy.latched_frame().unwrap().buttons, held);
    assert_eq!(spy.stats().framing_errors, 1);
}

#[test]
fn exact_frame_completes_and_one_extra_edge_is_overrun() {
    let mut spy = SaturnSpy::new();

    let mut status = DecodeStatus::Idle;
    for event in frame_events(Button::Z.mask(), 1_000) {
        status = spy.update_state(event);
    }
    assert_eq!(status, DecodeStatus::FrameReady);

    // One edge beyond the frame shape: rejected, not truncated.
    let status = spy.update_state(phase_event(1, 0x0F, 1_200));
    assert_eq!(status, DecodeStatus::Idle);
    assert_eq!(spy.stats().overruns, 1);
    assert!(spy.latched_frame().is_none());

    let mut sink = CaptureSink::new();
    assert!(!spy.write_serial(&mut sink).unwrap());
    assert!(sink.is_empty());
}

#[test]
fn stalled_frame_is_abandoned_not_resumed() {
    let mut spy = SaturnSpy::new();

    let events = frame_events(Button::Y.mask(), 1_000);
    spy.update_state(events[0]);
    spy.update_state(events[1]);

    // The walk resumes far past the inter-edge bound; the partial frame
    // must not absorb it.
    let late = phase_event(2, 0x0F, 1_000_000);
    assert_eq!(spy.update_state(late), DecodeStatus::Idle);
    assert_eq!(spy.stats().timeouts, 1);

    // A full fresh frame still decodes.
    let mut status = DecodeStatus::Idle;
    for event in frame_events(0, 1_100_000) {
        status = spy.update_state(event);
    }
    assert_eq!(status, DecodeStatus::FrameReady);
    assert_eq!(spy.latched_frame().unwrap().buttons, 0);
}

#[test]
fn duplicate_phase_edge_is_a_framing_error() {
    let mut spy = SaturnSpy::new();

    let events = frame_events(0, 1_000);
    spy.update_state(events[0]);
    spy.update_state(events[1]);
    // The same phase presented twice cannot be consumed twice.
    let status = spy.update_state(phase_event(1, 0x0F, 1_090));

    assert_eq!(status, DecodeStatus::Idle);
    assert_eq!(spy.stats().framing_errors, 1);
}

#[test]
fn reset_discards_everything() {
    let mut spy = SaturnSpy::new();
    for event in frame_events(Button::A.mask(), 1_000) {
        spy.update_state(event);
    }
    assert!(spy.latched_frame().is_some());

    spy.reset();
    assert!(spy.latched_frame().is_none());
    assert_eq!(spy.registers().raw(), [0, 0, 0, 0]);

    let mut sink = CaptureSink::new();
    assert!(!spy.write_serial(&mut sink).unwrap());
}
