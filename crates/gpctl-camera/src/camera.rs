use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gpctl_frame::{FrameError, Fragmenter, WriteTracker};
use gpctl_transport::{
    Channel, ChannelMap, ChannelRole, DeviceIdentity, SubscriptionHandle, Transport,
    NOTIFYING_ROLES,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::busy::BusyTracker;
use crate::commands::{CameraCommand, ClockTime, PresetKey};
use crate::config::CameraConfig;
use crate::dispatcher;
use crate::error::{CameraError, ErrorEvent, ErrorSink, Result};
use crate::poller;
use crate::state::{DeviceState, DeviceStateStore};
use crate::status::{self, StatusDecoder};

/// Command surface for one camera.
///
/// Cheap to clone; clones share the same connection, state and streams.
///
/// Published streams:
/// - [`Camera::subscribe_state`]: replay-latest device snapshot (`None` while disconnected)
/// - [`Camera::subscribe_connected`] and [`Camera::subscribe_busy`]: replay-latest flags
/// - [`Camera::subscribe_errors`]: fire-and-forget error events
pub struct Camera<T: Transport> {
    inner: Arc<Inner<T>>,
}

pub(crate) struct Inner<T: Transport> {
    transport: T,
    config: CameraConfig,
    store: Arc<DeviceStateStore>,
    busy: Arc<BusyTracker>,
    errors: ErrorSink,
    connected: watch::Sender<bool>,
    session: Mutex<Option<Arc<Session<T::Channel>>>>,
    generation: AtomicU64,
}

/// Everything owned by one connection.
struct Session<C> {
    generation: u64,
    fragmenter: Fragmenter<C>,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<(ChannelRole, SubscriptionHandle)>>,
}

impl<C: Channel> Session<C> {
    fn channels(&self) -> &ChannelMap<C> {
        self.fragmenter.channels()
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<(ChannelRole, SubscriptionHandle)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Camera<T> {
    /// Create a camera with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::build(transport, CameraConfig::default())
    }

    /// Create a camera with an explicit configuration.
    pub fn with_config(transport: T, config: CameraConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(transport, config))
    }

    fn build(transport: T, config: CameraConfig) -> Self {
        let store = Arc::new(DeviceStateStore::new());
        let errors = ErrorSink::new(Arc::clone(&store), config.error_capacity);
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                store,
                busy: Arc::new(BusyTracker::new()),
                errors,
                connected,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Current device snapshot, if connected.
    pub fn state(&self) -> Option<DeviceState> {
        self.inner.store.snapshot()
    }

    /// Number of device snapshots published so far.
    pub fn revision(&self) -> u64 {
        self.inner.store.revision()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.is_busy()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<DeviceState>> {
        self.inner.store.subscribe()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.inner.busy.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.inner.errors.subscribe()
    }

    /// Discover the device, subscribe to its notifications and prime the state.
    ///
    /// An existing session is disconnected first. On failure the new session
    /// is torn down and the transport disconnected.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.current_session().is_some() {
            debug!("already connected; reconnecting");
            self.disconnect().await;
        }

        let identity = self.inner.transport.identity();
        info!(id = %identity.id, name = %identity.name, "connecting to camera");
        let channels = self.inner.transport.discover().await?.require()?;
        let session = self.start_session(&identity, channels)?;

        let result = match self.initialize(&session).await {
            Ok(()) if !self.inner.is_current(session.generation) => Err(CameraError::Disconnected),
            other => other,
        };
        if let Err(err) = result {
            warn!(error = %err, "connect failed");
            self.inner.teardown(Some(session.generation));
            self.inner.transport.disconnect().await;
            return Err(err);
        }

        self.inner.connected.send_replace(true);
        info!(id = %identity.id, "camera connected");
        Ok(())
    }

    /// Drop the connection and reset every published stream.
    pub async fn disconnect(&self) {
        let torn_down = self.inner.teardown(None);
        self.inner.transport.disconnect().await;
        if torn_down {
            info!("camera disconnected");
        }
    }

    pub async fn record(&self) -> Result<()> {
        self.send(CameraCommand::ShutterOn).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(CameraCommand::ShutterOff).await
    }

    /// Tag a highlight marker in the current recording.
    pub async fn highlight(&self) -> Result<()> {
        self.send(CameraCommand::Highlight).await
    }

    pub async fn set_preset(&self, key: PresetKey) -> Result<()> {
        self.send(CameraCommand::Preset(key)).await
    }

    pub async fn toggle_locate(&self, on: bool) -> Result<()> {
        self.send(CameraCommand::Locate(on)).await
    }

    pub async fn toggle_wifi_ap(&self, on: bool) -> Result<()> {
        self.send(CameraCommand::WifiAp(on)).await
    }

    pub async fn sleep(&self) -> Result<()> {
        self.send(CameraCommand::Sleep).await
    }

    pub async fn set_clock(&self, time: ClockTime) -> Result<()> {
        self.send(CameraCommand::SetClock(time)).await
    }

    pub async fn query_free_space(&self) -> Result<()> {
        self.send(CameraCommand::QueryFreeSpace).await
    }

    pub async fn query_preset(&self) -> Result<()> {
        self.send(CameraCommand::QueryPreset).await
    }

    pub async fn query_all_status(&self) -> Result<()> {
        self.send(CameraCommand::QueryAllStatus).await
    }

    /// Refresh the battery level.
    ///
    /// Reads the battery attribute when the device exposes one and returns
    /// the percentage; otherwise issues the battery status query and returns
    /// `None` (the answer arrives as a status update). Failures are also
    /// reported on the error stream.
    pub async fn read_battery(&self) -> Result<Option<u8>> {
        let session = self
            .inner
            .current_session()
            .ok_or(CameraError::NotConnected)?;
        self.refresh_battery(&session, false).await
    }

    /// Stop, wait for the stop to land, then record again.
    ///
    /// Fails with [`CameraError::StopTimeout`] if recording is not reported
    /// stopped in time; nothing further is sent in that case. The wait for
    /// recording to resume is best effort. The whole sequence is bound to the
    /// session it started on: a disconnect at any step fails with
    /// [`CameraError::Disconnected`].
    pub async fn highlight_with_restart(&self) -> Result<()> {
        let config = &self.inner.config;
        let session = self
            .inner
            .current_session()
            .ok_or(FrameError::ChannelUnavailable(CameraCommand::ShutterOff.role()))?;

        self.send_with(&session, CameraCommand::ShutterOff).await?;
        match self
            .wait_in(&session, |s| s.recording == Some(false), config.stop_timeout)
            .await
        {
            Ok(_) => {}
            Err(CameraError::Timeout(_)) => {
                warn!(timeout = ?config.stop_timeout, "recording did not stop");
                return Err(CameraError::StopTimeout(config.stop_timeout));
            }
            Err(err) => return Err(err),
        }

        self.settle(&session, config.settle_delay).await?;
        self.send_with(&session, CameraCommand::ShutterOn).await?;

        match self
            .wait_in(&session, DeviceState::is_recording, config.restart_timeout)
            .await
        {
            Ok(_) => debug!("recording resumed"),
            Err(CameraError::Timeout(_)) => debug!("recording resume not confirmed"),
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Wait until the device snapshot satisfies `predicate`.
    ///
    /// Resolves immediately if the current snapshot already matches. Fails
    /// with [`CameraError::Timeout`] after `timeout` and with
    /// [`CameraError::Disconnected`] as soon as the session ends.
    pub async fn wait_for_state<F>(&self, predicate: F, timeout: Duration) -> Result<DeviceState>
    where
        F: Fn(&DeviceState) -> bool,
    {
        let session = self
            .inner
            .current_session()
            .ok_or(CameraError::NotConnected)?;
        self.wait_in(&session, predicate, timeout).await
    }

    async fn wait_in<F>(
        &self,
        session: &Session<T::Channel>,
        predicate: F,
        timeout: Duration,
    ) -> Result<DeviceState>
    where
        F: Fn(&DeviceState) -> bool,
    {
        if session.cancel.is_cancelled() {
            return Err(CameraError::Disconnected);
        }
        let mut rx = self.inner.store.subscribe();

        let wait = async {
            loop {
                if let Some(state) = matching(&mut rx, &predicate) {
                    return Ok(state);
                }
                if rx.changed().await.is_err() {
                    return Err(CameraError::Disconnected);
                }
            }
        };

        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => Err(CameraError::Disconnected),
            result = tokio::time::timeout(timeout, wait) => {
                result.unwrap_or_else(|_| Err(CameraError::Timeout(timeout)))
            }
        }
    }

    /// One poller tick: keep-alive, free space, preset, then a quiet battery
    /// refresh. The first failed send ends the tick.
    pub(crate) async fn poll_once(&self) -> Result<()> {
        let session = self
            .inner
            .current_session()
            .ok_or(CameraError::NotConnected)?;
        if session.channels().contains(ChannelRole::Settings) {
            self.send_with(&session, CameraCommand::KeepAlive).await?;
        }
        self.send_with(&session, CameraCommand::QueryFreeSpace)
            .await?;
        self.send_with(&session, CameraCommand::QueryPreset).await?;
        // Quiet: failures are logged, not surfaced.
        let _ = self.refresh_battery(&session, true).await;
        Ok(())
    }

    pub(crate) fn report(&self, operation: &str, err: &CameraError) {
        self.inner.errors.emit(ErrorEvent::operation(operation, err));
    }

    async fn send(&self, command: CameraCommand) -> Result<()> {
        let session = self
            .inner
            .current_session()
            .ok_or(FrameError::ChannelUnavailable(command.role()))?;
        self.send_with(&session, command).await
    }

    async fn send_with(&self, session: &Session<T::Channel>, command: CameraCommand) -> Result<()> {
        let role = command.role();
        debug!(command = %command.name(), %role, "sending");
        session.fragmenter.send(role, &command.encode()).await?;
        Ok(())
    }

    fn start_session(
        &self,
        identity: &DeviceIdentity,
        channels: ChannelMap<T::Channel>,
    ) -> Result<Arc<Session<T::Channel>>> {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let tracker: Arc<dyn WriteTracker> = Arc::new(self.inner.busy.writes(generation));
        let fragmenter =
            Fragmenter::new(Arc::new(channels), tracker).with_mtu(self.inner.config.mtu)?;
        let session = Arc::new(Session {
            generation,
            fragmenter,
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        self.inner.busy.begin(generation);
        self.inner.store.begin(identity);
        *self.inner.lock_session() = Some(Arc::clone(&session));

        let weak = Arc::downgrade(&self.inner);
        self.inner.transport.on_disconnected(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.teardown(Some(generation)) {
                    info!("camera disconnected by device");
                }
            }
        }));

        debug!(generation, "session started");
        Ok(session)
    }

    async fn initialize(&self, session: &Session<T::Channel>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = StatusDecoder::new(
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.busy),
            self.inner.errors.clone(),
        );
        dispatcher::spawn(rx, decoder, session.cancel.clone());

        for role in NOTIFYING_ROLES {
            let Some(channel) = session.channels().get(role) else {
                continue;
            };
            let handle = channel.subscribe(dispatcher::forwarder(role, tx.clone()))?;
            session.lock_subscriptions().push((role, handle));
        }
        drop(tx);

        if let Err(err) = self.read_model(session).await {
            self.report("read-model", &err);
        }
        let _ = self.refresh_battery(session, false).await;
        self.send_with(session, CameraCommand::HardwareInfo).await?;
        if let Err(err) = self.read_wifi_info(session).await {
            self.report("read-wifi-info", &err);
        }
        self.send_with(session, CameraCommand::RegisterAllStatus)
            .await?;
        let _ = self.refresh_battery(session, false).await;

        if self.inner.config.poll_enabled {
            poller::spawn(
                Arc::downgrade(&self.inner),
                self.inner.config.poll_interval,
                session.cancel.clone(),
            );
        }
        Ok(())
    }

    async fn read_model(&self, session: &Session<T::Channel>) -> Result<()> {
        let Some(channel) = session.channels().get(ChannelRole::ModelNumber) else {
            return Ok(());
        };
        let hex = status::text(&channel.read().await?);
        let model_id = u32::from_str_radix(hex.trim().trim_start_matches("0x"), 16).map_err(
            |err| CameraError::InvalidAttribute {
                role: ChannelRole::ModelNumber,
                reason: format!("{hex:?}: {err}"),
            },
        )?;
        self.inner.store.modify(|state| {
            state.model_id = Some(model_id);
            true
        });
        Ok(())
    }

    async fn read_wifi_info(&self, session: &Session<T::Channel>) -> Result<()> {
        for role in [
            ChannelRole::WifiSsid,
            ChannelRole::WifiPassword,
            ChannelRole::WifiState,
        ] {
            let Some(channel) = session.channels().get(role) else {
                continue;
            };
            let value = status::text(&channel.read().await?);
            self.inner.store.modify(|state| {
                let slot = match role {
                    ChannelRole::WifiSsid => &mut state.wifi_ssid,
                    ChannelRole::WifiPassword => &mut state.wifi_password,
                    _ => &mut state.wifi_state,
                };
                *slot = Some(value);
                true
            });
        }
        Ok(())
    }

    async fn refresh_battery(&self, session: &Session<T::Channel>, quiet: bool) -> Result<Option<u8>> {
        let result = self.battery_once(session).await;
        if let Err(err) = &result {
            if quiet {
                debug!(error = %err, "quiet battery refresh failed");
            } else {
                self.report("read-battery", err);
            }
        }
        result
    }

    async fn battery_once(&self, session: &Session<T::Channel>) -> Result<Option<u8>> {
        let Some(channel) = session.channels().get(ChannelRole::BatteryLevel) else {
            self.send_with(session, CameraCommand::QueryBattery).await?;
            return Ok(None);
        };
        let raw = channel.read().await?;
        let percent = *raw.first().ok_or_else(|| CameraError::InvalidAttribute {
            role: ChannelRole::BatteryLevel,
            reason: "empty value".to_string(),
        })?;
        self.inner.store.modify(|state| {
            state.battery = Some(percent);
            true
        });
        Ok(Some(percent))
    }

    async fn settle(&self, session: &Session<T::Channel>, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => Err(CameraError::Disconnected),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn matching<F>(rx: &mut watch::Receiver<Option<DeviceState>>, predicate: &F) -> Option<DeviceState>
where
    F: Fn(&DeviceState) -> bool,
{
    rx.borrow_and_update()
        .as_ref()
        .filter(|state| predicate(state))
        .cloned()
}

impl<T: Transport> Inner<T> {
    fn lock_session(&self) -> MutexGuard<'_, Option<Arc<Session<T::Channel>>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_session(&self) -> Option<Arc<Session<T::Channel>>> {
        self.lock_session().clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    /// End the session with `generation` (any session when `None`).
    ///
    /// Cancels pending waits, the dispatcher and the poller, drops the
    /// notification subscriptions and resets the published streams. Returns
    /// true if a session was ended.
    fn teardown(&self, generation: Option<u64>) -> bool {
        let session = {
            let mut slot = self.lock_session();
            match slot.as_ref() {
                Some(current) if generation.is_none_or(|g| g == current.generation) => slot.take(),
                _ => None,
            }
        };

        let ended = session.is_some();
        if let Some(session) = session {
            session.cancel.cancel();
            let subscriptions = std::mem::take(&mut *session.lock_subscriptions());
            for (role, handle) in subscriptions {
                if let Some(channel) = session.channels().get(role) {
                    channel.unsubscribe(handle);
                }
            }
            debug!(generation = session.generation, "session ended");
        }

        if ended || generation.is_none() {
            self.store.clear();
            self.busy.reset();
            self.connected.send_if_modified(|connected| std::mem::replace(connected, false));
        }
        ended
    }
}

impl<T: Transport> Clone for Camera<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Camera<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("identity", &self.inner.transport.identity())
            .field("connected", &self.is_connected())
            .field("busy", &self.is_busy())
            .field("revision", &self.revision())
            .finish()
    }
}
