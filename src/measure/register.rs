//! Measurement register: append-only RTMR with a linearized local mirror
//!
//! `extend(data)` sets `value = SHA-384(value ‖ event)`, where `event` is `data`
//! itself when it is 48 bytes and `SHA-384(data)` otherwise. The mutex is held
//! across the device call so extensions from this process apply one at a time.
//! There is no setter and no reset.

use crate::error::Result;
use crate::tee::device::check_rtmr_index;
use crate::tee::report::measurement_from;
use crate::tee::{Measurement, TeeDevice, HASH_LEN};
use sha2::{Digest, Sha384};
use std::sync::{Arc, Mutex, MutexGuard};

struct RegisterState {
    value: Measurement,
    extensions: u64,
}

/// One runtime measurement register of a TEE device
pub struct MeasurementRegister {
    device: Arc<dyn TeeDevice>,
    index: usize,
    state: Mutex<RegisterState>,
}

impl MeasurementRegister {
    /// Bind to RTMR `index`, starting from its current device value
    pub fn open(device: Arc<dyn TeeDevice>, index: usize) -> Result<Self> {
        check_rtmr_index(index)?;
        let value = device.read_rtmr(index)?;
        log::info!("Opened RTMR{}: {}", index, hex::encode(value));
        Ok(Self {
            device,
            index,
            state: Mutex::new(RegisterState {
                value,
                extensions: 0,
            }),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_value(&self) -> Measurement {
        self.lock().value
    }

    /// Run `f` on the current value with extensions held off until it returns.
    /// Quoting goes through here so the attested value cannot go stale mid-quote.
    pub fn with_locked_value<R>(&self, f: impl FnOnce(&Measurement) -> Result<R>) -> Result<R> {
        let state = self.lock();
        f(&state.value)
    }

    /// Extensions applied through this handle
    pub fn extension_count(&self) -> u64 {
        self.lock().extensions
    }

    /// Extend the register with `data` and return the new value
    pub fn extend(&self, data: &[u8]) -> Result<Measurement> {
        let event = event_digest(data);
        let mut state = self.lock();
        let expected = chain(&state.value, &event);

        let value = self.device.extend_rtmr(self.index, &event)?;
        if value != expected {
            log::warn!(
                "RTMR{} was extended outside this process; adopting device value",
                self.index
            );
        }
        state.value = value;
        state.extensions += 1;

        log::info!(
            "Extended RTMR{} (#{}) with {}: {}",
            self.index,
            state.extensions,
            hex::encode(event),
            hex::encode(value)
        );
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, RegisterState> {
        // state is only replaced after a successful device call, so it is
        // consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The 48-byte event a piece of data is extended as
pub fn event_digest(data: &[u8]) -> Measurement {
    if data.len() == HASH_LEN {
        measurement_from(data)
    } else {
        measurement_from(&Sha384::digest(data))
    }
}

/// One extension step: `SHA-384(current ‖ event)`
pub fn chain(current: &Measurement, event: &Measurement) -> Measurement {
    let mut h = Sha384::new();
    h.update(current);
    h.update(event);
    measurement_from(&h.finalize())
}

/// Expected register value after extending `initial` with each of `data` in order
pub fn replay<'a>(initial: &Measurement, data: impl IntoIterator<Item = &'a [u8]>) -> Measurement {
    data.into_iter()
        .fold(*initial, |value, item| chain(&value, &event_digest(item)))
}
