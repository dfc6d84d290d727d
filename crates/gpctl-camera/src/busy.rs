use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gpctl_frame::WriteTracker;
use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
struct BusyInputs {
    /// Session whose writes are counted; `None` between sessions.
    session: Option<u64>,
    in_flight: usize,
    recording: bool,
    device_busy: bool,
}

impl BusyInputs {
    fn busy(&self) -> bool {
        self.in_flight > 0 || self.recording || self.device_busy
    }
}

/// Derives the published busy flag.
///
/// Busy while any outbound send is in flight, while the device reports an
/// active recording, or while the device reports itself busy.
pub struct BusyTracker {
    inputs: Mutex<BusyInputs>,
    tx: watch::Sender<bool>,
}

impl BusyTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inputs: Mutex::new(BusyInputs::default()),
            tx,
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of sends currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn set_recording(&self, recording: bool) {
        self.update(|inputs| inputs.recording = recording);
    }

    pub fn set_device_busy(&self, busy: bool) {
        self.update(|inputs| inputs.device_busy = busy);
    }

    /// Back to idle and start counting writes of session `generation`.
    pub fn begin(&self, generation: u64) {
        self.update(|inputs| {
            *inputs = BusyInputs {
                session: Some(generation),
                ..BusyInputs::default()
            }
        });
    }

    /// Back to idle with no session: every write is ignored until [`begin`](Self::begin).
    pub fn reset(&self) {
        self.update(|inputs| *inputs = BusyInputs::default());
    }

    /// Write tracker for session `generation`.
    ///
    /// Starts and finishes are ignored once another session has begun, so
    /// a send that outlives its session cannot touch the new counter.
    pub fn writes(self: &Arc<Self>, generation: u64) -> SessionWrites {
        SessionWrites {
            tracker: Arc::clone(self),
            generation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusyInputs> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Publishing under the lock keeps the flag ordered with its inputs.
    fn update(&self, apply: impl FnOnce(&mut BusyInputs)) {
        let mut inputs = self.lock();
        apply(&mut inputs);
        let busy = inputs.busy();
        self.tx.send_if_modified(|current| {
            if *current == busy {
                return false;
            }
            trace!(busy, in_flight = inputs.in_flight, "busy changed");
            *current = busy;
            true
        });
    }
}

/// The in-flight counter of one session, handed to its fragmenter.
#[derive(Debug)]
pub struct SessionWrites {
    tracker: Arc<BusyTracker>,
    generation: u64,
}

impl WriteTracker for SessionWrites {
    fn write_started(&self) {
        self.tracker.update(|inputs| {
            if inputs.session == Some(self.generation) {
                inputs.in_flight += 1;
            }
        });
    }

    fn write_finished(&self) {
        self.tracker.update(|inputs| {
            if inputs.session == Some(self.generation) {
                inputs.in_flight = inputs.in_flight.saturating_sub(1);
            }
        });
    }
}

impl Default for BusyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BusyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyTracker")
            .field("inputs", &*self.lock())
            .field("busy", &self.is_busy())
            .finish()
    }
}
