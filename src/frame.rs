// frame.rs — MT frame codec (C1)
//
// Wire format: 0xFE | LEN | CMD_HI | CMD_LO | PAYLOAD[LEN] | CRC
// LEN counts PAYLOAD only (the 2-byte CMD is not counted). CRC is the
// bytewise XOR across LEN, CMD_HI, CMD_LO and PAYLOAD. There is no
// escaping: frames are parsed purely from the length field, so a dropped
// byte desynchronises the whole stream.

use crate::*;

const START: u8 = 0xFE;

/// A decoded MT frame. Lifetime is one request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u16,
    pub payload: Vec<u8>,
    pub crc_valid: bool,
}

fn xor_crc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode `cmd` and `payload` into a complete wire frame.
pub fn encode(cmd: u16, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u8;
    let cmd_hi = (cmd >> 8) as u8;
    let cmd_lo = (cmd & 0xFF) as u8;

    let mut body = Vec::with_capacity(3 + payload.len());
    body.push(len);
    body.push(cmd_hi);
    body.push(cmd_lo);
    body.extend_from_slice(payload);
    let crc = xor_crc(&body);

    let mut frame = Vec::with_capacity(1 + body.len() + 1);
    frame.push(START);
    frame.extend_from_slice(&body);
    frame.push(crc);
    frame
}

/// Decode one frame starting at `buf[0]`. Returns the frame and the number
/// of bytes it consumed from `buf`, so callers can advance past it.
pub fn decode_one(buf: &[u8]) -> Result<(Frame, usize), CodecError> {
    if buf.is_empty() || buf[0] != START {
        return Err(CodecError::BadStart);
    }
    if buf.len() < 4 {
        return Err(CodecError::Truncated {
            declared: 0,
            available: buf.len(),
        });
    }

    let len = buf[1] as usize;
    let frame_len = 4 + len; // FE LEN CMD_HI CMD_LO PAYLOAD[len] CRC
    if buf.len() < frame_len {
        return Err(CodecError::Truncated {
            declared: frame_len,
            available: buf.len(),
        });
    }

    let cmd = ((buf[2] as u16) << 8) | buf[3] as u16;
    let payload = buf[4..4 + len].to_vec();
    let body_end = 4 + len;
    let expected = xor_crc(&buf[1..body_end]);
    let actual = buf[body_end];
    let crc_valid = expected == actual;

    if !crc_valid {
        trace!(
            "frame codec: CRC mismatch for cmd {:04X} (expected {:02X}, got {:02X})",
            cmd, expected, actual
        );
    }

    Ok((
        Frame {
            cmd,
            payload,
            crc_valid,
        },
        frame_len + 1,
    ))
}

/// Decode every complete frame in `buf`, tolerating trailing noise after
/// the last valid frame. A declared length that runs past the available
/// bytes stops decoding and the corrupt result is appended — it never
/// partially succeeds into a bogus frame.
pub fn decode_all(buf: &[u8]) -> Vec<Result<Frame, CodecError>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if buf[pos] != START {
            break;
        }
        match decode_one(&buf[pos..]) {
            Ok((frame, consumed)) => {
                pos += consumed;
                out.push(Ok(frame));
            }
            Err(e) => {
                out.push(Err(e));
                break;
            }
        }
    }
    out
}

// EOF
