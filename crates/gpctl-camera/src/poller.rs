use std::sync::Weak;
use std::time::Duration;

use gpctl_transport::Transport;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::camera::{Camera, Inner};

/// Run [`Camera::poll_once`] every `period` until `cancel` fires.
///
/// The first tick comes one full period after the start. A failed tick is
/// reported on the error stream and polling continues.
pub(crate) fn spawn<T: Transport>(
    inner: Weak<Inner<T>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let camera = Camera::from_inner(inner);
            trace!("poll tick");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = camera.poll_once() => {
                    if let Err(err) = result {
                        camera.report("poll", &err);
                    }
                }
            }
        }
        debug!("poller stopped");
    })
}
