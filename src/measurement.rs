// measurement.rs — measurement decoder + energy reconciler (C6)
//
// The AF_INCOMING_MSG payload is a hex-nibble-addressed binary blob in the
// original protocol (the source literally does `int(data[48:50], 16)`).
// Per spec §9's redesign hint this reimplementation operates on byte
// slices with a small nibble accessor instead of hex-string slicing —
// only logging ever formats these bytes back to hex.

use serde::Serialize;

use crate::*;

/// Nibble offset, within the AF_INCOMING_MSG payload, where the first
/// sensor field begins. The original protocol's "38 hex-nibble header"
/// is measured from the start of the *whole* raw frame (FE, LEN, CMD
/// included); our `Frame::payload` already excludes those 8 leading
/// nibbles, so the header inside `payload` is only 30 nibbles (15 bytes).
const HEADER_NIBBLES_IN_PAYLOAD: usize = 30;

/// Minimum payload length (bytes) for a frame to be treated as a
/// measurement rather than a pairing echo. Spec: total raw frame length
/// >= 222 hex-nibbles (111 bytes: FE + LEN + CMD(2) + payload + CRC), so
/// payload length >= 111 - 5 = 106 bytes.
pub const MIN_MEASUREMENT_PAYLOAD_BYTES: usize = 106;

fn nibble(data: &[u8], n: usize) -> u8 {
    let byte = data[n / 2];
    if n % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0F
    }
}

fn nibbles_u64(data: &[u8], start: usize, count: usize) -> u64 {
    let mut v = 0u64;
    for i in 0..count {
        v = (v << 4) | nibble(data, start + i) as u64;
    }
    v
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Per-panel (per DC input) measurement.
#[derive(Debug, Clone, Serialize)]
pub struct PanelMeasurement {
    pub voltage_dc: f64,
    pub current_dc: f64,
    pub watt: f64,
    pub energy: f64,
}

/// A fully decoded poll response.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub temperature: f64,
    pub freq_ac: f64,
    pub voltage_ac: f64,
    pub panels: Vec<PanelMeasurement>,
}

/// current_start/voltage_start pairs for panels 1..4, in the fixed layout
/// spec.md §4.6 assigns them (voltage always 4 nibbles past current).
fn panel_offsets(panels: PanelCount) -> Vec<usize> {
    match panels {
        PanelCount::Two => vec![48, 54],
        PanelCount::Four => vec![48, 54, 34, 28],
    }
}

/// energy nibble offsets per panel, matching spec.md's table exactly —
/// panels 1/2 are intentionally swapped relative to naive nibble order
/// (upstream erratum); panels 3/4 are not (open question in spec §9,
/// left as specified rather than "corrected").
fn energy_offsets(panels: PanelCount) -> Vec<usize> {
    match panels {
        PanelCount::Two => vec![88, 78],
        PanelCount::Four => vec![88, 78, 98, 108],
    }
}

fn decode_current_voltage(data: &[u8], current_start: usize) -> (f64, f64) {
    let voltage_start = current_start + 4;
    let current_raw =
        nibbles_u64(data, current_start, 2) as f64 + nibble(data, current_start + 3) as f64 * 256.0;
    let voltage_raw =
        nibbles_u64(data, voltage_start, 2) as f64 * 16.0 + nibble(data, current_start + 2) as f64;
    (current_raw * (27.5 / 4096.0), voltage_raw * (82.5 / 4096.0))
}

/// Decode an AF_INCOMING_MSG payload (as carried by [`Frame::payload`])
/// into physical measurements. Returns `None` if the payload is too short
/// to be a measurement frame at all (callers should already have checked
/// [`MIN_MEASUREMENT_PAYLOAD_BYTES`] before calling this).
pub fn decode(payload: &[u8], panels: PanelCount) -> Option<Measurement> {
    if payload.len() < MIN_MEASUREMENT_PAYLOAD_BYTES {
        return None;
    }
    let data = &payload[HEADER_NIBBLES_IN_PAYLOAD / 2..];

    let temp_raw = nibbles_u64(data, 24, 4) as f64;
    let temperature = round2(-258.7 + temp_raw * 0.2752);

    let freq_raw = nibbles_u64(data, 28, 6) as f64;
    let freq_ac = if freq_raw == 0.0 {
        0.0
    } else {
        round2(50_000_000.0 / freq_raw)
    };

    let ac_voltage_raw = nibbles_u64(data, 60, 4) as f64;
    let voltage_ac = round2(ac_voltage_raw / 1.3277 / 4.0);

    let current_starts = panel_offsets(panels);
    let energy_starts = energy_offsets(panels);

    let mut panel_measurements = Vec::with_capacity(current_starts.len());
    for (current_start, energy_start) in current_starts.iter().zip(energy_starts.iter()) {
        let (current_dc, voltage_dc) = decode_current_voltage(data, *current_start);
        let energy_raw = nibbles_u64(data, *energy_start, 6) as f64;
        let energy = round3(energy_raw * (8.311 / 3600.0));
        // watt is the product of the unrounded current/voltage, rounded
        // once on the result — rounding the factors first and then
        // multiplying compounds their rounding error into the product.
        let watt = round2(voltage_dc * current_dc);
        panel_measurements.push(PanelMeasurement {
            voltage_dc: round2(voltage_dc),
            current_dc: round2(current_dc),
            watt,
            energy,
        });
    }

    Some(Measurement {
        temperature,
        freq_ac,
        voltage_ac,
        panels: panel_measurements,
    })
}

/// A decoded measurement is implausible (asleep inverter or a bad frame)
/// when the DC bus voltages sum below 0.1 V.
pub fn is_implausible(measurement: &Measurement) -> bool {
    let sum_dc: f64 = measurement.panels.iter().map(|p| p.voltage_dc).sum();
    sum_dc < 0.1
}

/// Reconcile raw per-panel energy readings against the stored energy
/// state, masking inverter restarts so the externally visible total is
/// monotonic until the next explicit reset. Mutates `energy` in place and
/// returns the values to report to the caller.
pub fn reconcile(energy: &mut EnergyState, raw: &[f64]) -> Vec<f64> {
    let sum_raw: f64 = raw.iter().sum();
    let sum_offset: f64 = energy.offset.iter().sum();
    let sum_last: f64 = energy.last.iter().sum();

    if sum_raw + sum_offset < sum_last {
        debug!("energy reconciler: inverter reset detected, freezing offsets at last high-water mark");
        energy.offset.clone_from(&energy.last);
    }

    let mut returned = Vec::with_capacity(raw.len());
    for i in 0..raw.len() {
        returned.push(round3(energy.offset[i] + raw[i]));
    }
    energy.last.clone_from(&returned);
    returned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_nibbles(nibbles: &mut [u8], start: usize, value: u64, count: usize) {
        for i in 0..count {
            let shift = (count - 1 - i) * 4;
            nibbles[start + i] = ((value >> shift) & 0xF) as u8;
        }
    }

    /// Write one panel's current/voltage fields at `current_start`, per the
    /// layout `decode_current_voltage` reads: current at
    /// `current_start:current_start+2` plus nibble `current_start+3`,
    /// voltage at `current_start+4:current_start+6` plus nibble
    /// `current_start+2`.
    fn put_panel(nibbles: &mut [u8], current_start: usize, current_raw: u16, voltage_raw: u16) {
        put_nibbles(nibbles, current_start, current_raw as u64 & 0xFF, 2);
        nibbles[current_start + 3] = ((current_raw as u64 >> 8) & 0xF) as u8;
        put_nibbles(nibbles, current_start + 4, (voltage_raw as u64 >> 4) & 0xFF, 2);
        nibbles[current_start + 2] = (voltage_raw as u64 & 0xF) as u8;
    }

    fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
        nibbles
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect()
    }

    fn synth_two_panel_payload(
        temp_raw: u16,
        freq_raw: u32,
        ac_voltage_raw: u16,
        dc1_current_raw: u16,
        dc1_voltage_raw: u16,
        dc2_current_raw: u16,
        dc2_voltage_raw: u16,
        en1_raw: u32,
        en2_raw: u32,
    ) -> Vec<u8> {
        // Build a nibble string matching spec.md's offset table, then pack
        // it into bytes. Nibbles not covered by the table are left as 0.
        let mut nibbles = vec![0u8; 120];
        put_nibbles(&mut nibbles, 24, temp_raw as u64, 4);
        put_nibbles(&mut nibbles, 28, freq_raw as u64, 6);
        put_nibbles(&mut nibbles, 60, ac_voltage_raw as u64, 4);

        put_panel(&mut nibbles, 48, dc1_current_raw, dc1_voltage_raw); // panel1
        put_panel(&mut nibbles, 54, dc2_current_raw, dc2_voltage_raw); // panel2

        put_nibbles(&mut nibbles, 88, en1_raw as u64, 6);
        put_nibbles(&mut nibbles, 78, en2_raw as u64, 6);

        nibbles_to_bytes(&nibbles)
    }

    /// Like `synth_two_panel_payload`, but also fills panel 3/4 (QS1,
    /// `PanelCount::Four`) at the offsets spec.md's table adds for the
    /// 4-panel branch: currents at 34/28, voltages at 38/32 (per
    /// `panel_offsets`/`decode_current_voltage`), energies at 98/108
    /// (`energy_offsets`, left unswapped per the upstream erratum).
    fn synth_four_panel_payload(
        dc1: (u16, u16),
        dc2: (u16, u16),
        dc3: (u16, u16),
        dc4: (u16, u16),
        energies: (u32, u32, u32, u32),
    ) -> Vec<u8> {
        let mut nibbles = vec![0u8; 120];
        put_panel(&mut nibbles, 48, dc1.0, dc1.1);
        put_panel(&mut nibbles, 54, dc2.0, dc2.1);
        put_panel(&mut nibbles, 34, dc3.0, dc3.1);
        put_panel(&mut nibbles, 28, dc4.0, dc4.1);

        put_nibbles(&mut nibbles, 88, energies.0 as u64, 6);
        put_nibbles(&mut nibbles, 78, energies.1 as u64, 6);
        put_nibbles(&mut nibbles, 98, energies.2 as u64, 6);
        put_nibbles(&mut nibbles, 108, energies.3 as u64, 6);

        nibbles_to_bytes(&nibbles)
    }

    fn frame_payload_with_header(data: Vec<u8>) -> Vec<u8> {
        let mut payload = vec![0u8; HEADER_NIBBLES_IN_PAYLOAD / 2];
        payload.extend_from_slice(&data);
        while payload.len() < MIN_MEASUREMENT_PAYLOAD_BYTES {
            payload.push(0);
        }
        payload
    }

    #[test]
    fn decode_voltage_ac_matches_worked_example() {
        // nibbles 60:64 = 0x4E20 (= 20000) -> voltage_ac ~= 3766.06
        let data = synth_two_panel_payload(0, 1, 0x4E20, 0, 0, 0, 0, 0, 0);
        let payload = frame_payload_with_header(data);
        let measurement = decode(&payload, PanelCount::Two).unwrap();
        assert!((measurement.voltage_ac - 3766.06).abs() < 0.01);
    }

    #[test]
    fn decode_panel1_current_and_voltage_match_formula() {
        let data = synth_two_panel_payload(0, 1, 0, 272, 83, 0, 0, 0, 0);
        let payload = frame_payload_with_header(data);
        let measurement = decode(&payload, PanelCount::Two).unwrap();
        assert!((measurement.panels[0].current_dc - 1.83).abs() < 0.01);
        assert!((measurement.panels[0].voltage_dc - 1.67).abs() < 0.01);
        // watt is the unrounded current * unrounded voltage, rounded once:
        // 1.826171875 * 1.671142578125 ~= 3.0518 -> 3.05, not
        // round(current, 2) * round(voltage, 2) = 1.83 * 1.67 = 3.06.
        assert_eq!(measurement.panels[0].watt, 3.05);
    }

    #[test]
    fn decode_too_short_returns_none() {
        assert!(decode(&[0u8; 10], PanelCount::Two).is_none());
    }

    #[test]
    fn decode_four_panel_covers_dc3_dc4_and_their_unswapped_energy_offsets() {
        let data = synth_four_panel_payload(
            (272, 83),    // panel1 (current_raw, voltage_raw), same as the panel1 test above
            (120, 200),   // panel2
            (60, 300),    // panel3 (QS1-only)
            (40, 150),    // panel4 (QS1-only)
            (500, 300, 111, 222), // energies panel1..4
        );
        let payload = frame_payload_with_header(data);
        let measurement = decode(&payload, PanelCount::Four).unwrap();
        assert_eq!(measurement.panels.len(), 4);

        // panel1 unaffected by the 4-panel additions.
        assert!((measurement.panels[0].current_dc - 1.83).abs() < 0.01);
        assert!((measurement.panels[0].voltage_dc - 1.67).abs() < 0.01);

        // panel3: current at nibbles 34:36/37, voltage at 38:40/36.
        let expected_current_dc3 = round2(60.0 * (27.5 / 4096.0));
        let expected_voltage_dc3 = round2(300.0 * (82.5 / 4096.0));
        assert_eq!(measurement.panels[2].current_dc, expected_current_dc3);
        assert_eq!(measurement.panels[2].voltage_dc, expected_voltage_dc3);

        // panel4: current at nibbles 28:30/31, voltage at 32:34/30.
        let expected_current_dc4 = round2(40.0 * (27.5 / 4096.0));
        let expected_voltage_dc4 = round2(150.0 * (82.5 / 4096.0));
        assert_eq!(measurement.panels[3].current_dc, expected_current_dc4);
        assert_eq!(measurement.panels[3].voltage_dc, expected_voltage_dc4);

        // energies: panel1/2 swapped (88/78), panel3/4 left unswapped
        // (98/108) per the upstream erratum spec.md documents.
        assert_eq!(measurement.panels[0].energy, round3(500.0 * (8.311 / 3600.0)));
        assert_eq!(measurement.panels[1].energy, round3(300.0 * (8.311 / 3600.0)));
        assert_eq!(measurement.panels[2].energy, round3(111.0 * (8.311 / 3600.0)));
        assert_eq!(measurement.panels[3].energy, round3(222.0 * (8.311 / 3600.0)));
    }

    #[test]
    fn decode_rounds_to_documented_precision() {
        let data = synth_two_panel_payload(1000, 1_000_000, 4000, 100, 2000, 50, 1000, 500, 300);
        let payload = frame_payload_with_header(data);
        let measurement = decode(&payload, PanelCount::Two).unwrap();
        // 2 decimals for everything except energy (3 decimals)
        assert_eq!(measurement.temperature, round2(measurement.temperature));
        assert_eq!(measurement.panels[0].energy, round3(measurement.panels[0].energy));
    }

    #[test]
    fn implausible_when_dc_voltages_near_zero() {
        let measurement = Measurement {
            temperature: 20.0,
            freq_ac: 50.0,
            voltage_ac: 230.0,
            panels: vec![
                PanelMeasurement {
                    voltage_dc: 0.02,
                    current_dc: 0.0,
                    watt: 0.0,
                    energy: 0.0,
                },
                PanelMeasurement {
                    voltage_dc: 0.03,
                    current_dc: 0.0,
                    watt: 0.0,
                    energy: 0.0,
                },
            ],
        };
        assert!(is_implausible(&measurement));
    }

    #[test]
    fn reconcile_masks_inverter_restart() {
        let mut energy = EnergyState {
            last: vec![0.0],
            offset: vec![0.0],
        };
        let sequence = [5.0, 10.0, 15.0, 2.0, 7.0];
        let expected = [5.0, 10.0, 15.0, 17.0, 22.0];
        for (raw, want) in sequence.iter().zip(expected.iter()) {
            let returned = reconcile(&mut energy, &[*raw]);
            assert_eq!(returned[0], *want);
        }
        assert_eq!(energy.offset[0], 15.0);
    }

    #[test]
    fn reconcile_is_non_decreasing_without_a_restart() {
        let mut energy = EnergyState {
            last: vec![0.0, 0.0],
            offset: vec![0.0, 0.0],
        };
        let polls = [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut previous_sum = 0.0;
        for raw in polls {
            let returned = reconcile(&mut energy, &raw);
            let sum: f64 = returned.iter().sum();
            assert!(sum >= previous_sum);
            previous_sum = sum;
        }
    }

    #[test]
    fn measurement_serializes_to_json_for_the_publishing_layer() {
        // The core never calls serde_json itself; the publishing layer
        // (out of scope) does, so this only needs to prove the derive
        // produces sane field names.
        let measurement = Measurement {
            temperature: 21.5,
            freq_ac: 50.0,
            voltage_ac: 230.0,
            panels: vec![PanelMeasurement {
                voltage_dc: 30.0,
                current_dc: 1.5,
                watt: 45.0,
                energy: 1.234,
            }],
        };
        let json = serde_json::to_string(&measurement).unwrap();
        assert!(json.contains("\"voltage_ac\":230.0"));
        assert!(json.contains("\"energy\":1.234"));
    }

    #[test]
    fn reset_zeroes_last_and_offset() {
        let mut energy = EnergyState {
            last: vec![42.0, 17.0],
            offset: vec![5.0, 3.0],
        };
        energy.reset();
        assert_eq!(energy.last, vec![0.0, 0.0]);
        assert_eq!(energy.offset, vec![0.0, 0.0]);
    }
}
// EOF
