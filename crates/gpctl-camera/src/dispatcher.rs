//! Single inbound event queue.
//!
//! Notification callbacks only enqueue; one task owns the per-role
//! reassemblers and the decoder, so neither is ever entered concurrently.

use std::collections::BTreeMap;

use bytes::Bytes;
use gpctl_frame::{Feed, Reassembler};
use gpctl_transport::{ChannelRole, FrameCallback};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::status::StatusDecoder;

/// A raw notification frame and the role it arrived on.
#[derive(Debug, Clone)]
pub(crate) struct Inbound {
    pub role: ChannelRole,
    pub frame: Bytes,
}

pub(crate) type InboundSender = mpsc::UnboundedSender<Inbound>;

/// Callback that forwards a role's frames onto the queue.
pub(crate) fn forwarder(role: ChannelRole, tx: InboundSender) -> FrameCallback {
    std::sync::Arc::new(move |frame: Bytes| {
        // A closed queue means the session is gone; late frames are dropped.
        let _ = tx.send(Inbound { role, frame });
    })
}

pub(crate) fn spawn(
    rx: mpsc::UnboundedReceiver<Inbound>,
    decoder: StatusDecoder,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(rx, decoder, cancel))
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    decoder: StatusDecoder,
    cancel: CancellationToken,
) {
    let mut reassemblers: BTreeMap<ChannelRole, Reassembler> = BTreeMap::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let reassembler = reassemblers.entry(event.role).or_default();
        match reassembler.push(&event.frame) {
            Feed::Complete(message) => {
                let outcome = decoder.decode(event.role, &message);
                trace!(role = %event.role, command_id = message.command_id, ?outcome, "decoded");
            }
            Feed::Pending => {}
            Feed::Dropped(reason) => {
                debug!(role = %event.role, ?reason, "notification dropped");
            }
        }
    }
    debug!("inbound dispatcher stopped");
}
