use std::collections::BTreeMap;
use std::sync::Arc;

use gpctl_transport::{Channel, ChannelMap, ChannelRole};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::codec::DEFAULT_MTU;
use crate::error::{FrameError, Result};

/// Observer of outbound write activity.
///
/// `write_started` is called once before the first fragment of a send and
/// `write_finished` exactly once after the last fragment completes or fails.
pub trait WriteTracker: Send + Sync {
    fn write_started(&self);
    fn write_finished(&self);
}

/// Tracker that ignores write activity.
impl WriteTracker for () {
    fn write_started(&self) {}
    fn write_finished(&self) {}
}

struct InFlight<'a> {
    tracker: &'a dyn WriteTracker,
}

impl<'a> InFlight<'a> {
    fn start(tracker: &'a dyn WriteTracker) -> Self {
        tracker.write_started();
        Self { tracker }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tracker.write_finished();
    }
}

/// Split `payload` into consecutive slices of at most `mtu` bytes.
pub fn fragments(payload: &[u8], mtu: usize) -> impl Iterator<Item = &[u8]> {
    payload.chunks(mtu.max(1))
}

/// Sends payloads as ordered MTU-sized writes.
///
/// Sends to the same role are serialized; a second send waits until every
/// fragment of the first has completed. Sends to different roles proceed
/// independently.
pub struct Fragmenter<C> {
    channels: Arc<ChannelMap<C>>,
    locks: BTreeMap<ChannelRole, Mutex<()>>,
    tracker: Arc<dyn WriteTracker>,
    mtu: usize,
}

impl<C: Channel> Fragmenter<C> {
    pub fn new(channels: Arc<ChannelMap<C>>, tracker: Arc<dyn WriteTracker>) -> Self {
        let locks = channels
            .roles()
            .map(|role| (role, Mutex::new(())))
            .collect();
        Self {
            channels,
            locks,
            tracker,
            mtu: DEFAULT_MTU,
        }
    }

    /// Override the write size.
    pub fn with_mtu(mut self, mtu: usize) -> Result<Self> {
        if mtu == 0 {
            return Err(FrameError::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        Ok(self)
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn channels(&self) -> &ChannelMap<C> {
        &self.channels
    }

    /// Write `payload` to `role`, one fragment at a time.
    ///
    /// Returns the number of writes issued. The first failing write aborts the
    /// send; fragments after it are not written.
    pub async fn send(&self, role: ChannelRole, payload: &[u8]) -> Result<usize> {
        let (Some(channel), Some(lock)) = (self.channels.get(role), self.locks.get(&role)) else {
            return Err(FrameError::ChannelUnavailable(role));
        };

        let _in_flight = InFlight::start(self.tracker.as_ref());
        let _serial = lock.lock().await;

        let mut written = 0usize;
        for fragment in fragments(payload, self.mtu) {
            channel.write(fragment).await.map_err(|source| {
                debug!(%role, fragment = written, error = %source, "fragment write failed");
                FrameError::WriteFailed { role, source }
            })?;
            written += 1;
        }
        trace!(%role, len = payload.len(), writes = written, "payload sent");
        Ok(written)
    }
}

impl<C> std::fmt::Debug for Fragmenter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fragmenter")
            .field("roles", &self.locks.keys().collect::<Vec<_>>())
            .field("mtu", &self.mtu)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use bytes::Bytes;
    use gpctl_transport::{DeviceIdentity, MemoryTransport, Transport};

    use super::*;

    #[derive(Default)]
    struct Counter {
        in_flight: AtomicUsize,
        history: StdMutex<Vec<usize>>,
    }

    impl WriteTracker for Counter {
        fn write_started(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.history.lock().unwrap().push(now);
        }

        fn write_finished(&self) {
            let now = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
            self.history.lock().unwrap().push(now);
        }
    }

    async fn setup(
        roles: &[ChannelRole],
    ) -> (
        Fragmenter<gpctl_transport::MemoryChannel>,
        gpctl_transport::MemoryDevice,
        Arc<Counter>,
    ) {
        let (transport, device) =
            MemoryTransport::pair(DeviceIdentity::new("dev", "Camera"), roles.iter().copied());
        let channels = Arc::new(transport.discover().await.unwrap());
        let counter = Arc::new(Counter::default());
        let fragmenter = Fragmenter::new(channels, counter.clone());
        (fragmenter, device, counter)
    }

    #[test]
    fn fragments_respect_mtu() {
        let payload: Vec<u8> = (0..45).collect();
        let chunks: Vec<&[u8]> = fragments(&payload, 20).collect();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 20));
        assert_eq!(chunks.concat(), payload);
    }

    #[test]
    fn empty_payload_has_no_fragments() {
        assert_eq!(fragments(&[], 20).count(), 0);
    }

    #[tokio::test]
    async fn send_writes_ceil_len_over_mtu_fragments() {
        let (fragmenter, device, _) = setup(&[ChannelRole::Command]).await;
        let payload: Vec<u8> = (0..41).collect();

        let writes = fragmenter.send(ChannelRole::Command, &payload).await.unwrap();

        assert_eq!(writes, 3);
        let observed = device.writes_to(ChannelRole::Command);
        assert_eq!(observed.len(), 3);
        assert!(observed.iter().all(|w| w.len() <= DEFAULT_MTU));
        assert_eq!(observed.concat(), payload);
    }

    #[tokio::test]
    async fn short_command_is_single_write() {
        let (fragmenter, device, _) = setup(&[ChannelRole::Command]).await;
        fragmenter
            .send(ChannelRole::Command, &[0x03, 0x01, 0x01, 0x01])
            .await
            .unwrap();
        assert_eq!(
            device.writes_to(ChannelRole::Command),
            vec![Bytes::from_static(&[0x03, 0x01, 0x01, 0x01])]
        );
    }

    #[tokio::test]
    async fn unmapped_role_is_unavailable() {
        let (fragmenter, device, counter) = setup(&[ChannelRole::Command]).await;
        let err = fragmenter
            .send(ChannelRole::Settings, &[0x03, 0x5B, 0x01, 0x42])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FrameError::ChannelUnavailable(ChannelRole::Settings)
        ));
        assert!(device.writes().is_empty());
        assert!(counter.history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_surfaces_and_releases_busy() {
        let (fragmenter, device, counter) = setup(&[ChannelRole::Query]).await;
        device.fail_writes(ChannelRole::Query, true);

        let err = fragmenter
            .send(ChannelRole::Query, &[0x02, 0x13, 0x36])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FrameError::WriteFailed {
                role: ChannelRole::Query,
                ..
            }
        ));
        assert_eq!(counter.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(*counter.history.lock().unwrap(), vec![1, 0]);
    }

    #[tokio::test]
    async fn with_mtu_rejects_zero() {
        let (fragmenter, _, _) = setup(&[ChannelRole::Command]).await;
        assert!(matches!(
            fragmenter.with_mtu(0),
            Err(FrameError::InvalidMtu(0))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_sends_stay_busy_until_both_complete() {
        let (fragmenter, device, counter) =
            setup(&[ChannelRole::Command, ChannelRole::Query]).await;
        device.set_write_delay(ChannelRole::Command, Duration::from_millis(30));
        device.set_write_delay(ChannelRole::Query, Duration::from_millis(10));

        let long: Vec<u8> = vec![0xAB; 45];
        let (a, b) = tokio::join!(
            fragmenter.send(ChannelRole::Command, &long),
            fragmenter.send(ChannelRole::Query, &[0x02, 0x13, 0x61]),
        );
        assert_eq!(a.unwrap(), 3);
        assert_eq!(b.unwrap(), 1);

        // Counter climbs to two, drops to one when the short send ends and
        // only reaches zero once the long send has finished.
        assert_eq!(*counter.history.lock().unwrap(), vec![1, 2, 1, 0]);
        let order: Vec<ChannelRole> = device.writes().into_iter().map(|(r, _)| r).collect();
        assert_eq!(order.last(), Some(&ChannelRole::Command));
    }

    #[tokio::test(start_paused = true)]
    async fn same_role_sends_do_not_interleave() {
        let (fragmenter, device, _) = setup(&[ChannelRole::Command]).await;
        device.set_write_delay(ChannelRole::Command, Duration::from_millis(5));

        let first = vec![0x11; 40];
        let second = vec![0x22; 40];
        let (a, b) = tokio::join!(
            fragmenter.send(ChannelRole::Command, &first),
            fragmenter.send(ChannelRole::Command, &second),
        );
        a.unwrap();
        b.unwrap();

        let writes = device.writes_to(ChannelRole::Command);
        assert_eq!(writes.len(), 4);
        assert!(writes[..2].iter().all(|w| w.iter().all(|b| *b == 0x11)));
        assert!(writes[2..].iter().all(|w| w.iter().all(|b| *b == 0x22)));
    }
}
