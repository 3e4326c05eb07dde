// registry.rs — controller identity, inverter records, energy state
//
// Energy state lives on the registry entry itself rather than in a
// parallel array keyed by the same index (spec §9 redesign hint), so the
// index -> state mapping can't drift out of sync.

use crate::*;

/// 6-byte coordinator identifier, embedded in outgoing frames in both
/// original and byte-reversed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerId([u8; 6]);

impl ControllerId {
    pub fn from_hex(hex: &str) -> Result<Self, CoreError> {
        let bytes = hexutil::parse_hex(hex)
            .ok_or_else(|| CoreError::InvalidArg(format!("controller ID not valid hex: {hex}")))?;
        if bytes.len() != 6 {
            return Err(CoreError::InvalidArg(format!(
                "controller ID must be 6 bytes (12 hex chars), got {} byte(s)",
                bytes.len()
            )));
        }
        let mut id = [0u8; 6];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Byte-reversed form used in most outgoing frames (`R` in spec §4.4/§4.5).
    pub fn reversed(&self) -> [u8; 6] {
        let mut r = self.0;
        r.reverse();
        r
    }
}

/// Number of DC inputs on the inverter — the two supported families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCount {
    Two,
    Four,
}

impl PanelCount {
    pub fn as_usize(self) -> usize {
        match self {
            PanelCount::Two => 2,
            PanelCount::Four => 4,
        }
    }

    pub fn from_count(n: usize) -> Result<Self, CoreError> {
        match n {
            2 => Ok(PanelCount::Two),
            4 => Ok(PanelCount::Four),
            other => Err(CoreError::InvalidArg(format!(
                "unsupported panel count {other} (must be 2 or 4)"
            ))),
        }
    }
}

/// Per-panel energy bookkeeping used by the reconciler (C6).
/// Invariant: `returned[i] = raw[i] + offset[i]`, non-decreasing between
/// explicit resets.
#[derive(Debug, Clone)]
pub struct EnergyState {
    pub last: Vec<f64>,
    pub offset: Vec<f64>,
}

impl EnergyState {
    pub fn new(panels: PanelCount) -> Self {
        let n = panels.as_usize();
        Self {
            last: vec![0.0; n],
            offset: vec![0.0; n],
        }
    }

    pub fn reset(&mut self) {
        self.last.iter_mut().for_each(|v| *v = 0.0);
        self.offset.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// A registered inverter. `short_id` is `[0, 0]` before pairing completes
/// and must be set before polling.
#[derive(Debug, Clone)]
pub struct InverterRecord {
    pub serial: [u8; 6],
    pub short_id: [u8; 2],
    pub panels: PanelCount,
    pub energy: EnergyState,
}

impl InverterRecord {
    pub fn new(serial: [u8; 6], short_id: [u8; 2], panels: PanelCount) -> Self {
        Self {
            serial,
            short_id,
            panels,
            energy: EnergyState::new(panels),
        }
    }

    pub fn is_paired(&self) -> bool {
        self.short_id != [0, 0]
    }
}

/// Ordered, append-only collection of inverter records. Indices are stable
/// for the lifetime of the registry; the core owns it exclusively.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inverters: Vec<InverterRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: InverterRecord) -> usize {
        self.inverters.push(record);
        self.inverters.len() - 1
    }

    pub fn get(&self, index: usize) -> Result<&InverterRecord, CoreError> {
        self.inverters
            .get(index)
            .ok_or_else(|| CoreError::InvalidArg(format!("no inverter at index {index}")))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut InverterRecord, CoreError> {
        self.inverters
            .get_mut(index)
            .ok_or_else(|| CoreError::InvalidArg(format!("no inverter at index {index}")))
    }

    pub fn len(&self) -> usize {
        self.inverters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_id_requires_six_bytes() {
        assert!(ControllerId::from_hex("D8A3011B9780").is_ok());
        assert!(ControllerId::from_hex("D8A3").is_err());
        assert!(ControllerId::from_hex("D8A3011B978000").is_err());
    }

    #[test]
    fn reversed_reverses_bytes() {
        let cid = ControllerId::from_hex("D8A3011B9780").unwrap();
        assert_eq!(cid.reversed(), [0x80, 0x97, 0x1B, 0x01, 0xA3, 0xD8]);
        // reverse(reverse(x)) == x
        let mut twice = cid.reversed();
        twice.reverse();
        assert_eq!(twice, cid.bytes());
    }

    #[test]
    fn panel_count_rejects_unsupported_values() {
        assert!(PanelCount::from_count(2).is_ok());
        assert!(PanelCount::from_count(4).is_ok());
        assert!(PanelCount::from_count(3).is_err());
    }

    #[test]
    fn registry_indices_are_sequential() {
        let mut registry = Registry::new();
        let i0 = registry.add(InverterRecord::new([0; 6], [0, 0], PanelCount::Two));
        let i1 = registry.add(InverterRecord::new([1; 6], [0, 0], PanelCount::Four));
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unpaired_inverter_has_zero_short_id() {
        let record = InverterRecord::new([0; 6], [0, 0], PanelCount::Two);
        assert!(!record.is_paired());
    }
}
// EOF
