// session.rs — inverter session (C5): pairing and polling
//
// Addressing, retry policy. The core exposes single-attempt operations;
// the surrounding scheduler (out of scope) retries `poll_inverter` up to
// 5 times per spec §4.5/§7 — this crate never retries internally.

use std::time::Duration;

use crate::*;

const PAIR_RESPONSE_WINDOW: Duration = Duration::from_millis(1100);
const PAIR_SETTLE: Duration = Duration::from_millis(1500);
const POLL_RESPONSE_WINDOW: Duration = Duration::from_secs(1);
const POLL_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

const AF_INCOMING_MSG: u16 = 0x4481;
const AF_DATA_REQUEST_CONFIRM: u16 = 0x4480;

/// Build the four pair-conversation requests (cmd, payload), in order.
/// `S` = inverter serial, `R` = reversed controller ID (spec §4.5).
fn pair_requests(serial: [u8; 6], cid: &ControllerId) -> Vec<(u16, Vec<u8>)> {
    let r = cid.reversed();
    let r_tail = [r[4], r[5]];

    let mut step1 = vec![
        0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x14, 0xFF, 0xFF, 0x14, 0x0D, 0x02,
        0x00, 0x00, 0x0F, 0x11, 0x00,
    ];
    step1.extend_from_slice(&serial);
    step1.extend_from_slice(&[0xFF, 0xFF, 0x10, 0xFF, 0xFF]);
    step1.extend_from_slice(&r);

    let mut step2 = vec![
        0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x14, 0xFF, 0xFF, 0x14, 0x0C, 0x02,
        0x01, 0x00, 0x0F, 0x06, 0x00,
    ];
    step2.extend_from_slice(&serial);

    let mut step3 = vec![
        0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x14, 0xFF, 0xFF, 0x14, 0x0F, 0x01,
        0x02, 0x00, 0x0F, 0x11, 0x00,
    ];
    step3.extend_from_slice(&serial);
    step3.extend_from_slice(&r_tail);
    step3.extend_from_slice(&[0x10, 0xFF, 0xFF]);
    step3.extend_from_slice(&r);

    let mut step4 = vec![
        0x0F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x14, 0xFF, 0xFF, 0x14, 0x01, 0x01,
        0x03, 0x00, 0x0F, 0x06, 0x00,
    ];
    step4.extend_from_slice(&r);

    vec![(0x2402, step1), (0x2402, step2), (0x2402, step3), (0x2402, step4)]
}

/// Scan `frames` for a payload containing `serial`; the candidate short ID
/// is the 2 bytes immediately following the match. Accepts the first
/// candidate that is not `0000`, `FFFF`, or the trailing 2 bytes of the
/// reversed controller ID.
fn extract_short_id(frames: &[Frame], serial: [u8; 6], cid: &ControllerId) -> Option<[u8; 2]> {
    let reversed_tail = [cid.reversed()[4], cid.reversed()[5]];

    for frame in frames {
        let payload = &frame.payload;
        if payload.len() < serial.len() + 2 {
            continue;
        }
        let Some(pos) = payload
            .windows(serial.len())
            .position(|w| w == serial)
        else {
            continue;
        };
        let candidate_start = pos + serial.len();
        if candidate_start + 2 > payload.len() {
            continue;
        }
        let candidate = [payload[candidate_start], payload[candidate_start + 1]];
        if candidate == [0x00, 0x00] || candidate == [0xFF, 0xFF] || candidate == reversed_tail {
            continue;
        }
        // the inverter reports little-endian; stored/emitted form is swapped
        return Some([candidate[1], candidate[0]]);
    }
    None
}

/// Run the pairing handshake for an already-registered inverter. Runs the
/// coordinator driver in pair mode first, then the four-step pair
/// conversation. Returns `None` if no step yielded a valid short ID.
pub fn pair<T: SerialTransport>(
    dispatcher: &mut Dispatcher<T>,
    cid: &ControllerId,
    serial: [u8; 6],
) -> io::Result<Option<[u8; 2]>> {
    coordinator::start_coordinator(dispatcher, cid, true)?;

    for (cmd, payload) in pair_requests(serial, cid) {
        let frames = dispatcher.request(cmd, &payload, PAIR_RESPONSE_WINDOW)?;
        std::thread::sleep(PAIR_SETTLE);
        if let Some(short_id) = extract_short_id(&frames, serial, cid) {
            info!(
                "session: pairing found short id {}",
                hexutil::to_hex(&short_id)
            );
            return Ok(Some(short_id));
        }
    }

    warn!("session: pairing did not yield a short id");
    Ok(None)
}

/// Send `2700` and return the raw response bytes for diagnostics. The
/// original Python's `check_coordinator` only prints the result ("Result
/// should contain 0709 (??)" per its own docstring) and has no decoded
/// contract, so this stays a thin passthrough rather than a typed result.
pub fn check_coordinator<T: SerialTransport>(dispatcher: &mut Dispatcher<T>) -> io::Result<Vec<u8>> {
    dispatcher.drain(POLL_DRAIN_TIMEOUT)?;
    dispatcher.request_raw(0x2700, &[], Duration::from_millis(500))
}

/// Poll a paired inverter once. `short_id` must already be set (non-zero).
pub fn poll<T: SerialTransport>(
    dispatcher: &mut Dispatcher<T>,
    cid: &ControllerId,
    short_id: [u8; 2],
    panels: PanelCount,
) -> Result<Measurement, PollError> {
    dispatcher
        .drain(POLL_DRAIN_TIMEOUT)
        .map_err(CoreError::Io)?;

    let mut payload = vec![short_id[1], short_id[0]]; // reverse(short_id)
    payload.extend_from_slice(&[0x14, 0x14, 0x06, 0x00, 0x01, 0x00, 0x0F, 0x13]);
    payload.extend_from_slice(&cid.reversed());
    payload.extend_from_slice(&[
        0xFB, 0xFB, 0x06, 0xBB, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC1, 0xFE, 0xFE,
    ]);

    let frames = dispatcher
        .request(0x2401, &payload, POLL_RESPONSE_WINDOW)
        .map_err(CoreError::Io)?;

    for frame in &frames {
        if frame.cmd == AF_DATA_REQUEST_CONFIRM {
            // matched as a hex-nibble substring, same as the upstream
            // protocol — "CD" can straddle a byte boundary.
            if hexutil::to_hex(&frame.payload).contains("CD") {
                return Err(PollError::NoRoute);
            }
        }
    }

    for frame in &frames {
        if frame.cmd == AF_INCOMING_MSG
            && frame.crc_valid
            && frame.payload.len() >= measurement::MIN_MEASUREMENT_PAYLOAD_BYTES
        {
            let measurement = measurement::decode(&frame.payload, panels).ok_or(PollError::Timeout)?;
            if measurement::is_implausible(&measurement) {
                return Err(PollError::DataError);
            }
            return Ok(measurement);
        }
    }

    Err(PollError::Timeout)
}

// EOF
