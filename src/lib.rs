// lib.rs

pub use std::io;
pub use std::time::Duration;

pub use log::*;
pub use serde::Serialize;

mod error;
pub use error::*;

mod frame;
pub use frame::Frame;

mod transport;
pub use transport::{BufferedTransport, GapTimeoutTransport, SerialTransport};

mod dispatcher;
pub use dispatcher::Dispatcher;

mod hexutil;

mod registry;
pub use registry::{ControllerId, EnergyState, InverterRecord, PanelCount, Registry};

mod coordinator;

mod measurement;
pub use measurement::{Measurement, PanelMeasurement};

mod session;

/// The radio reset GPIO line (spec §6): held low then released before each
/// session start. Platform-specific, so the engine only exposes the hook;
/// callers wire it to their hardware. `()` is a no-op implementation for
/// tests and callers with no reset line to drive.
pub trait RadioReset {
    fn reset(&mut self);
}

impl RadioReset for () {
    fn reset(&mut self) {}
}

/// Tunables the original Python hard-coded inline. Defaults match the
/// upstream timings; callers running against slower or noisier links can
/// widen them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Idle gap (C2) below which a read is still "in progress".
    pub idle_gap: Duration,
    /// How long to wait for a radio ping response.
    pub ping_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_gap: transport::DEFAULT_IDLE_GAP,
            ping_window: Duration::from_millis(500),
        }
    }
}

/// The protocol engine: one CC2530 coordinator and the inverters registered
/// against it. Single-threaded and blocking by design (spec §5) — the
/// engine holds no internal lock, and calling it from more than one thread
/// at a time is the caller's mistake to avoid, not something this crate
/// guards against.
pub struct Core<T: SerialTransport, G: RadioReset = ()> {
    dispatcher: Dispatcher<T>,
    controller_id: ControllerId,
    registry: Registry,
    config: EngineConfig,
    radio_reset: G,
}

impl<T: SerialTransport> Core<T, ()> {
    /// Build a core with no radio-reset hook wired up. Use
    /// [`Core::with_radio_reset`] to supply one.
    pub fn new(transport: T, controller_id: &str, config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_radio_reset(transport, controller_id, config, ())
    }
}

impl<T: SerialTransport, G: RadioReset> Core<T, G> {
    pub fn with_radio_reset(
        transport: T,
        controller_id: &str,
        config: EngineConfig,
        radio_reset: G,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            dispatcher: Dispatcher::new(transport),
            controller_id: ControllerId::from_hex(controller_id)?,
            registry: Registry::new(),
            config,
            radio_reset,
        })
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.dispatcher.transport_mut()
    }

    /// Drive the radio reset GPIO hook (spec §6). Callers typically invoke
    /// this once before the first `start_coordinator` of a session.
    pub fn reset_radio(&mut self) {
        self.radio_reset.reset();
    }

    /// Register an inverter by serial. `short_id` is normally `[0, 0]`
    /// (unpaired) but callers recovering a previously paired inverter from
    /// persisted state can supply the known short ID directly, skipping
    /// `pair_inverter`. Returns the index used by every other per-inverter
    /// call.
    pub fn add_inverter(&mut self, serial: [u8; 6], short_id: [u8; 2], panels: PanelCount) -> usize {
        self.registry.add(InverterRecord::new(serial, short_id, panels))
    }

    /// Set (or overwrite) the short ID of an already-registered inverter,
    /// e.g. after recovering it from persisted state instead of re-pairing.
    pub fn set_inverter_id(&mut self, index: usize, short_id: [u8; 2]) -> Result<(), CoreError> {
        self.registry.get_mut(index)?.short_id = short_id;
        Ok(())
    }

    /// Reset the energy reconciler state for an inverter, e.g. after the
    /// operator has manually zeroed the downstream counter.
    pub fn reset_counters(&mut self, index: usize) -> Result<(), CoreError> {
        self.registry.get_mut(index)?.energy.reset();
        Ok(())
    }

    /// SYS_PING the radio. `Ok(true)` means a well-formed response came
    /// back; `Ok(false)` means the window elapsed with nothing usable —
    /// not itself an error, just an unhealthy radio (spec §7's
    /// `RadioUnhealthy` is the caller's name for this, not ours).
    pub fn ping_radio(&mut self) -> Result<bool, CoreError> {
        let frames = self
            .dispatcher
            .request(0x2101, &[], self.config.ping_window)?;
        Ok(frames
            .iter()
            .any(|f| f.cmd == 0x6101 && f.crc_valid && f.payload == [0x79, 0x07]))
    }

    /// Run the coordinator's fixed bring-up script (C4).
    pub fn start_coordinator(&mut self, pair_mode: bool) -> Result<bool, CoreError> {
        Ok(coordinator::start_coordinator(
            &mut self.dispatcher,
            &self.controller_id,
            pair_mode,
        )?)
    }

    /// Send `2700` to the radio and return the raw response bytes. A thin
    /// diagnostic with no decoded contract, matching the original's own
    /// `check_coordinator` (spec §4.5 supplement).
    pub fn check_coordinator(&mut self) -> Result<Vec<u8>, CoreError> {
        Ok(session::check_coordinator(&mut self.dispatcher)?)
    }

    /// Run the four-step pair conversation for an already-registered
    /// inverter and, on success, store and return the short ID it
    /// discovers so the caller can persist it for a later boot.
    pub fn pair_inverter(&mut self, index: usize) -> Result<Option<[u8; 2]>, CoreError> {
        let serial = self.registry.get(index)?.serial;
        match session::pair(&mut self.dispatcher, &self.controller_id, serial)? {
            Some(short_id) => {
                self.registry.get_mut(index)?.short_id = short_id;
                Ok(Some(short_id))
            }
            None => Ok(None),
        }
    }

    /// Look up the short ID an inverter was registered or paired with.
    /// `[0, 0]` means it has not been paired yet.
    pub fn short_id(&self, index: usize) -> Result<[u8; 2], CoreError> {
        Ok(self.registry.get(index)?.short_id)
    }

    /// Poll one inverter once and reconcile its energy counters. Returns a
    /// fully decoded measurement with `panels[i].energy` already adjusted
    /// for any inverter restart masked since the last poll.
    pub fn poll_inverter(&mut self, index: usize) -> Result<Measurement, PollError> {
        let record = self.registry.get(index).map_err(PollError::Core)?;
        if !record.is_paired() {
            return Err(PollError::Core(CoreError::InvalidArg(format!(
                "inverter at index {index} has not been paired"
            ))));
        }
        let short_id = record.short_id;
        let panels = record.panels;

        let mut measurement = session::poll(&mut self.dispatcher, &self.controller_id, short_id, panels)?;

        let record = self.registry.get_mut(index).map_err(PollError::Core)?;
        let raw: Vec<f64> = measurement.panels.iter().map(|p| p.energy).collect();
        let reconciled = measurement::reconcile(&mut record.energy, &raw);
        for (panel, energy) in measurement.panels.iter_mut().zip(reconciled) {
            panel.energy = energy;
        }

        Ok(measurement)
    }
}


// EOF
