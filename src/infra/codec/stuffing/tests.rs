//! Unit tests for the byte-stuffing codec and the incremental tracker.
use super::*;

#[test]
/// The empty payload encodes to the lone terminator byte.
fn test_stuff_empty() {
    let mut out = [0u8; 4];
    let len = stuff(&[], &mut out).expect("empty payload must stuff");
    assert_eq!(&out[..len], &[0xFF]);
}

#[test]
/// Short payloads get one count byte and the terminator.
fn test_stuff_short_payload() {
    let mut out = [0u8; 8];
    let len = stuff(&[0x01, 0x02, 0x03], &mut out).expect("payload must stuff");
    assert_eq!(&out[..len], &[0x03, 0x01, 0x02, 0x03, 0xFF]);
}

#[test]
/// A 254-byte payload fits a single maximal run.
fn test_stuff_exact_run() {
    let input = [0xAB; 254];
    let mut out = [0u8; 300];
    let len = stuff(&input, &mut out).expect("payload must stuff");
    assert_eq!(len, 256);
    assert_eq!(out[0], 254);
    assert_eq!(out[255], 0xFF);
}

#[test]
/// A 255-byte payload splits into a 254-run and a 1-run.
fn test_stuff_run_boundary() {
    let input = [0x55; 255];
    let mut out = [0u8; 300];
    let len = stuff(&input, &mut out).expect("payload must stuff");
    assert_eq!(len, 258);
    assert_eq!(out[0], 254);
    assert_eq!(out[255], 1);
    assert_eq!(out[256], 0x55);
    assert_eq!(out[257], 0xFF);
}

#[test]
/// Encoding fails cleanly when the output buffer is one byte short.
fn test_stuff_buffer_too_small() {
    let input = [0x11; 16];
    let mut out = [0u8; 17]; // needs 18
    assert_eq!(stuff(&input, &mut out), Err(StuffingError::BufferTooSmall));
}

#[test]
/// Round-trip across payload sizes spanning several run boundaries.
fn test_roundtrip_sizes() {
    let mut input = [0u8; 600];
    for (idx, byte) in input.iter_mut().enumerate() {
        *byte = (idx % 251) as u8;
    }

    for size in [0usize, 1, 8, 253, 254, 255, 508, 509, 600] {
        let mut stuffed = [0u8; 620];
        let stuffed_size = stuff(&input[..size], &mut stuffed).expect("stuff");
        assert_eq!(stuffed_size, stuffed_len(size), "size {size}");

        let mut restored = [0u8; 620];
        let restored_size =
            unstuff(&stuffed[..stuffed_size], &mut restored).expect("unstuff");
        assert_eq!(&restored[..restored_size], &input[..size], "size {size}");
    }
}

#[test]
/// Every stuffed form ends with the terminator and never contains a zero
/// count byte.
fn test_stuffing_invariants() {
    let input = [0x00u8; 509]; // zero *data* bytes are fine, zero *counts* are not
    let mut stuffed = [0u8; 520];
    let len = stuff(&input, &mut stuffed).expect("stuff");
    assert_eq!(stuffed[len - 1], 0xFF);

    // Walk the count bytes and check none is zero.
    let mut idx = 0;
    while idx < len {
        let count = stuffed[idx];
        assert_ne!(count, 0x00, "zero count byte at {idx}");
        if count == 0xFF {
            break;
        }
        idx += 1 + count as usize;
    }
}

#[test]
/// The decoder rejects the reserved error marker.
fn test_unstuff_error_marker() {
    let mut out = [0u8; 8];
    assert_eq!(
        unstuff(&[0x00, 0xFF], &mut out),
        Err(StuffingError::InvalidStuffing)
    );
}

#[test]
/// The decoder rejects a run announcing more bytes than the input holds.
fn test_unstuff_overshoot() {
    let mut out = [0u8; 8];
    assert_eq!(
        unstuff(&[0x05, 0x01, 0x02], &mut out),
        Err(StuffingError::InvalidStuffing)
    );
}

#[test]
/// The decoder rejects a stream that stops before its terminator.
fn test_unstuff_missing_terminator() {
    let mut out = [0u8; 8];
    assert_eq!(
        unstuff(&[0x02, 0x01, 0x02], &mut out),
        Err(StuffingError::InvalidStuffing)
    );
}

#[test]
/// Decoding reports a too-small output buffer rather than truncating.
fn test_unstuff_buffer_too_small() {
    let mut out = [0u8; 2];
    assert_eq!(
        unstuff(&[0x03, 0x01, 0x02, 0x03, 0xFF], &mut out),
        Err(StuffingError::BufferTooSmall)
    );
}

//==================================================================================STREAM_TRACKER

#[test]
/// The tracker spots the terminator inside a fed slice.
fn test_tracker_single_slice() {
    let mut tracker = StreamTracker::new();
    let status = tracker
        .feed(&[0x03, 0x01, 0x02, 0x03, 0xFF])
        .expect("valid stream");
    assert_eq!(status, StreamStatus::Complete { consumed: 5 });
    assert!(tracker.is_complete());
}

#[test]
/// A stream split across frame-sized slices completes on the right byte.
fn test_tracker_across_slices() {
    let input = [0x42u8; 20];
    let mut stuffed = [0u8; 32];
    let len = stuff(&input, &mut stuffed).expect("stuff");

    let mut tracker = StreamTracker::new();
    let mut consumed_total = 0;
    for chunk in stuffed[..len].chunks(8) {
        match tracker.feed(chunk).expect("valid stream") {
            StreamStatus::Continue => consumed_total += chunk.len(),
            StreamStatus::Complete { consumed } => {
                consumed_total += consumed;
                break;
            }
        }
    }
    assert_eq!(consumed_total, len);
}

#[test]
/// Data bytes equal to the markers do not terminate the stream.
fn test_tracker_marker_bytes_in_data() {
    let mut tracker = StreamTracker::new();
    let status = tracker.feed(&[0x02, 0xFF, 0x00]).expect("valid stream");
    assert_eq!(status, StreamStatus::Continue);
    assert!(!tracker.is_complete());
}

#[test]
/// A zero count byte fails the stream.
fn test_tracker_error_marker() {
    let mut tracker = StreamTracker::new();
    assert_eq!(
        tracker.feed(&[0x00]),
        Err(StuffingError::InvalidStuffing)
    );
}

#[test]
/// The empty-payload encoding completes on its first byte.
fn test_tracker_empty_stream() {
    let mut tracker = StreamTracker::new();
    let status = tracker.feed(&[0xFF]).expect("valid stream");
    assert_eq!(status, StreamStatus::Complete { consumed: 1 });
}
