// hexutil.rs — hex <-> bytes helpers for the human-facing trace/log layer
//
// Core decode logic never parses hex strings (spec §9: "a disciplined
// reimplementation operates on byte slices ... only the human-facing
// trace/log layer formats as hex"). This module exists for the two places
// that genuinely need it: parsing a controller ID given as a hex string at
// construction time, and formatting bytes for log lines.

/// Parse an even-length hex string into bytes.
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if !s.len().is_multiple_of(2) {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Format bytes as an uppercase hex string, e.g. `[0xD8, 0xA3] -> "D8A3"`.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

// EOF
