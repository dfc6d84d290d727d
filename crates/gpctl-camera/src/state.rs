use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use gpctl_transport::DeviceIdentity;
use serde::{Serialize, Serializer};
use tokio::sync::watch;

/// Latest known attributes of the connected camera.
///
/// Everything except the identity is unknown (`None`) until the device
/// reports it.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub id: String,
    pub name: String,
    pub model_id: Option<u32>,
    pub model: Option<String>,
    pub board_type: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub ap_mac_address: Option<String>,
    /// Battery charge, 0-100.
    pub battery: Option<u8>,
    pub preset: Option<String>,
    pub remaining_space_bytes: Option<u64>,
    pub wifi_ssid: Option<String>,
    #[serde(serialize_with = "redact_secret")]
    pub wifi_password: Option<String>,
    pub wifi_state: Option<String>,
    pub recording: Option<bool>,
    pub charging: Option<bool>,
    pub hot: Option<bool>,
    pub cold: Option<bool>,
    pub elapsed_seconds: Option<u32>,
    pub last_error: Option<String>,
}

impl DeviceState {
    pub fn new(identity: &DeviceIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            ..Self::default()
        }
    }

    /// Returns true only once the device has reported an active recording.
    pub fn is_recording(&self) -> bool {
        self.recording == Some(true)
    }
}

// The wifi password is credential material; keep it out of logs.
impl fmt::Debug for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("DeviceState");
        dbg.field("id", &self.id)
            .field("name", &self.name)
            .field("model_id", &self.model_id)
            .field("model", &self.model)
            .field("board_type", &self.board_type)
            .field("firmware_version", &self.firmware_version)
            .field("serial_number", &self.serial_number)
            .field("ap_mac_address", &self.ap_mac_address)
            .field("battery", &self.battery)
            .field("preset", &self.preset)
            .field("remaining_space_bytes", &self.remaining_space_bytes)
            .field("wifi_ssid", &self.wifi_ssid);
        if let Some(password) = &self.wifi_password {
            dbg.field(
                "wifi_password",
                &format_args!("<redacted:{} bytes>", password.len()),
            );
        } else {
            dbg.field("wifi_password", &Option::<String>::None);
        }
        dbg.field("wifi_state", &self.wifi_state)
            .field("recording", &self.recording)
            .field("charging", &self.charging)
            .field("hot", &self.hot)
            .field("cold", &self.cold)
            .field("elapsed_seconds", &self.elapsed_seconds)
            .field("last_error", &self.last_error)
            .finish()
    }
}

fn redact_secret<S>(secret: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(_) => serializer.serialize_str(REDACTED),
        None => serializer.serialize_none(),
    }
}

/// Placeholder serialized in place of credential material.
const REDACTED: &str = "<redacted>";

/// Owner of the canonical [`DeviceState`].
///
/// Subscribers get replay-latest semantics: a new receiver sees the current
/// snapshot immediately and every publish after it. `None` means no device
/// session is active.
pub struct DeviceStateStore {
    tx: watch::Sender<Option<DeviceState>>,
    revision: AtomicU64,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            revision: AtomicU64::new(0),
        }
    }

    /// Start a session snapshot holding only the identity.
    pub fn begin(&self, identity: &DeviceIdentity) {
        self.tx.send_modify(|slot| {
            *slot = Some(DeviceState::new(identity));
            self.revision.fetch_add(1, Ordering::AcqRel);
        });
    }

    /// Apply `update` to the current snapshot and publish if it returns true.
    ///
    /// Does nothing when no session is active. Returns whether a publish
    /// happened.
    pub fn modify<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut DeviceState) -> bool,
    {
        self.tx.send_if_modified(|slot| {
            let changed = slot.as_mut().is_some_and(update);
            if changed {
                self.revision.fetch_add(1, Ordering::AcqRel);
            }
            changed
        })
    }

    /// Discard the snapshot.
    pub fn clear(&self) -> bool {
        self.tx.send_if_modified(|slot| {
            let had = slot.take().is_some();
            if had {
                self.revision.fetch_add(1, Ordering::AcqRel);
            }
            had
        })
    }

    pub fn snapshot(&self) -> Option<DeviceState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceState>> {
        self.tx.subscribe()
    }

    /// Number of snapshots published so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceStateStore")
            .field("revision", &self.revision())
            .field("active", &self.tx.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("AA:BB", "GoPro 1234")
    }

    #[test]
    fn begin_seeds_identity_only() {
        let store = DeviceStateStore::new();
        assert!(store.snapshot().is_none());

        store.begin(&identity());
        let state = store.snapshot().expect("session should be active");
        assert_eq!(state.id, "AA:BB");
        assert_eq!(state.name, "GoPro 1234");
        assert!(state.battery.is_none());
        assert!(state.recording.is_none());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn modify_without_session_does_not_publish() {
        let store = DeviceStateStore::new();
        let published = store.modify(|state| {
            state.battery = Some(50);
            true
        });
        assert!(!published);
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn modify_returning_false_does_not_publish() {
        let store = DeviceStateStore::new();
        store.begin(&identity());
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        assert!(!store.modify(|_| false));
        assert!(!rx.has_changed().expect("store should be alive"));
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn new_subscriber_sees_latest_snapshot() {
        let store = DeviceStateStore::new();
        store.begin(&identity());
        store.modify(|state| {
            state.battery = Some(77);
            true
        });

        let rx = store.subscribe();
        assert_eq!(rx.borrow().as_ref().and_then(|s| s.battery), Some(77));
    }

    #[test]
    fn clear_discards_snapshot_once() {
        let store = DeviceStateStore::new();
        store.begin(&identity());
        assert!(store.clear());
        assert!(!store.clear());
        assert!(store.snapshot().is_none());
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn debug_redacts_wifi_password() {
        let mut state = DeviceState::new(&identity());
        state.wifi_password = Some("hunter22".into());
        let rendered = format!("{state:?}");
        assert!(!rendered.contains("hunter22"));
        assert!(rendered.contains("<redacted:8 bytes>"));
    }

    #[test]
    fn serialized_state_omits_wifi_password() {
        let mut state = DeviceState::new(&identity());
        state.wifi_ssid = Some("GP-1234".into());
        state.wifi_password = Some("hunter22".into());

        let json = serde_json::to_string(&state).expect("state should serialize");
        assert!(!json.contains("hunter22"));
        assert!(json.contains(r#""wifi_password":"<redacted>""#));
        assert!(json.contains(r#""wifi_ssid":"GP-1234""#));

        state.wifi_password = None;
        let json = serde_json::to_string(&state).expect("state should serialize");
        assert!(json.contains(r#""wifi_password":null"#));
    }
}
