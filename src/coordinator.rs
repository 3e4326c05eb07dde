// coordinator.rs — coordinator driver (C4)
//
// Fixed initialisation script that resets the CC2530 and brings up the
// Zigbee coordinator. Represented as a table of steps (request, expected
// prefix, settle time) per spec §9's redesign hint, rather than inlined
// control flow — the same shape as the teacher's own `LEGACY_PROFILE`
// register table in `radio.rs`.
//
// Verification is a raw substring search over everything the radio sent
// back for that step, not frame decoding: the original protocol's own
// verification works the same way, and some expected prefixes here are
// deliberately partial (they don't span a whole, valid frame).

use std::time::Duration;

use crate::*;

struct InitStep {
    cmd: u16,
    payload: fn(&ControllerId) -> Vec<u8>,
    expect: &'static [&'static [u8]],
    settle: Duration,
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

const RESPONSE_WINDOW: Duration = Duration::from_millis(1100);
const SETTLE_SHORT: Duration = Duration::from_millis(20);
const SETTLE_LONG: Duration = Duration::from_millis(1500);

const INIT_SCRIPT: &[InitStep] = &[
    InitStep {
        // ZB_WRITE_CONFIGURATION: write config
        cmd: 0x2605,
        payload: |_| vec![0x03, 0x01, 0x03],
        expect: &[&[0xFE, 0x01, 0x66, 0x05, 0x00, 0x62]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        // SYS_RESET_REQ
        cmd: 0x4100,
        payload: |_| vec![0x00],
        expect: &[&[0xFE, 0x06, 0x41, 0x80, 0x02, 0x02, 0x02, 0x02, 0x07, 0x02, 0xC2]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        cmd: 0x2605,
        payload: |cid| {
            let mut p = vec![0x01, 0x08, 0xFF, 0xFF];
            p.extend_from_slice(&cid.reversed());
            p
        },
        expect: &[&[0xFE, 0x01, 0x66, 0x05, 0x00, 0x62]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        cmd: 0x2605,
        payload: |_| vec![0x87, 0x01, 0x00],
        expect: &[&[0xFE, 0x01, 0x66, 0x05, 0x00, 0x62]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        cmd: 0x2605,
        payload: |cid| {
            let c = cid.bytes();
            vec![0x83, 0x02, c[0], c[1]]
        },
        expect: &[&[0xFE, 0x01, 0x66, 0x05, 0x00, 0x62]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        cmd: 0x2605,
        payload: |_| vec![0x84, 0x04, 0x00, 0x00, 0x01, 0x00],
        expect: &[&[0xFE, 0x01, 0x66, 0x05, 0x00, 0x62]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        // AF_REGISTER
        cmd: 0x2400,
        payload: |_| {
            vec![
                0x14, 0x05, 0x0F, 0x00, 0x01, 0x01, 0x00, 0x02, 0x00, 0x00, 0x15, 0x00, 0x00,
            ]
        },
        expect: &[&[0xFE, 0x01, 0x64, 0x00, 0x00, 0x65]],
        settle: SETTLE_SHORT,
    },
    InitStep {
        // ZB_START_REQUEST
        cmd: 0x2600,
        payload: |_| vec![],
        // second prefix is optional per spec; only the first is required
        // for the step to be considered verified.
        expect: &[&[0xFE, 0x00, 0x66, 0x00, 0x66]],
        settle: SETTLE_LONG,
    },
    InitStep {
        cmd: 0x6700,
        payload: |_| vec![],
        expect: &[&[0xFE, 0x0E, 0x67, 0x00, 0x00, 0xFF, 0xFF]],
        settle: SETTLE_LONG,
    },
];

/// The tenth step, sent only outside pair mode: an initial AF_DATA_REQUEST
/// to the broadcast short address carrying the startup magic.
fn broadcast_startup_step() -> InitStep {
    InitStep {
        cmd: 0x2401,
        payload: |cid| {
            let mut p = vec![0xFF, 0xFF, 0x14, 0x14, 0x06, 0x00, 0x01, 0x00, 0x0F, 0x1E];
            p.extend_from_slice(&cid.reversed());
            p.extend_from_slice(&[0xFB, 0xFB, 0x11]);
            p.extend_from_slice(&[0x00, 0x00, 0x0D, 0x60, 0x30, 0xFB, 0xD3]);
            p.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
            p.extend_from_slice(&[0x04, 0x01, 0x02, 0x81]);
            p.extend_from_slice(&[0xFE, 0xFE]);
            p
        },
        expect: &[&[0xFE, 0x01, 0x64, 0x01, 0x00, 0x64]],
        settle: SETTLE_LONG,
    }
}

/// Run the fixed initialisation script. In pair mode the script stops
/// after step 9 (`6700`); otherwise the broadcast startup step runs too.
/// The driver never retries a failed step itself — callers re-run the
/// whole sequence.
pub fn start_coordinator<T: SerialTransport>(
    dispatcher: &mut Dispatcher<T>,
    controller_id: &ControllerId,
    pair_mode: bool,
) -> io::Result<bool> {
    let mut all_verified = true;

    for (i, step) in INIT_SCRIPT.iter().enumerate() {
        let payload = (step.payload)(controller_id);
        let received = dispatcher.request_raw(step.cmd, &payload, RESPONSE_WINDOW)?;
        let verified = step
            .expect
            .iter()
            .any(|prefix| contains_subsequence(&received, prefix));
        if !verified {
            warn!("coordinator: step {} (cmd {:04X}) not verified", i + 1, step.cmd);
            all_verified = false;
        } else {
            debug!("coordinator: step {} (cmd {:04X}) verified", i + 1, step.cmd);
        }
        std::thread::sleep(step.settle);
    }

    if !pair_mode {
        let step = broadcast_startup_step();
        let payload = (step.payload)(controller_id);
        let received = dispatcher.request_raw(step.cmd, &payload, RESPONSE_WINDOW)?;
        let verified = step
            .expect
            .iter()
            .any(|prefix| contains_subsequence(&received, prefix));
        if !verified {
            warn!("coordinator: broadcast startup step not verified");
            all_verified = false;
        }
        std::thread::sleep(step.settle);
    }

    info!("coordinator: start_coordinator(pair_mode={pair_mode}) -> {all_verified}");
    Ok(all_verified)
}

// EOF
