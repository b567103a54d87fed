use std::sync::Arc;

use crate::error::Error;
use crate::stream::options::FlowControlOrigin;
use crate::stream::StreamSocket;

/// A passive event announced on behalf of one stream socket.
///
/// Each event is routed through the socket's strand when one is set;
/// otherwise it executes on the demultiplexer thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A connection attempt began.
    ConnectInitiated,
    /// The socket is connected.
    ConnectComplete,
    /// An encryption upgrade began.
    UpgradeInitiated,
    /// The encryption session is established.
    UpgradeComplete,
    /// An encryption downgrade began.
    DowngradeInitiated,
    /// The encryption session is terminated; the socket remains open.
    DowngradeComplete,
    /// Read-side flow control was lifted; draining resumes.
    ReadQueueFlowControlRelaxed,
    /// Read-side flow control was applied; draining pauses.
    ReadQueueFlowControlApplied {
        /// What applied it.
        origin: FlowControlOrigin,
    },
    /// The read queue drained down to its low watermark.
    ReadQueueLowWatermark {
        /// The queue size at announcement.
        size: usize,
    },
    /// The read queue grew above its high watermark.
    ReadQueueHighWatermark {
        /// The queue size at announcement.
        size: usize,
    },
    /// Buffered read-queue bytes were discarded by a close.
    ReadQueueDiscarded {
        /// Bytes dropped.
        size: usize,
    },
    /// Write-side flow control was lifted; transmission resumes.
    WriteQueueFlowControlRelaxed,
    /// Write-side flow control was applied; transmission pauses.
    WriteQueueFlowControlApplied {
        /// What applied it.
        origin: FlowControlOrigin,
    },
    /// The write queue drained down to its low watermark.
    WriteQueueLowWatermark {
        /// The queue size at announcement.
        size: usize,
    },
    /// The write queue grew above its high watermark.
    WriteQueueHighWatermark {
        /// The queue size at announcement.
        size: usize,
    },
    /// Queued write-queue entries were discarded by a close.
    WriteQueueDiscarded {
        /// Bytes dropped.
        size: usize,
    },
    /// A shutdown sequence began.
    ShutdownInitiated,
    /// The receive direction is shut down.
    ShutdownReceive,
    /// The send direction is shut down.
    ShutdownSend,
    /// The requested shutdown directions have completed.
    ShutdownComplete,
    /// A fatal condition was observed.
    Error {
        /// The observed error.
        error: Error,
    },
}

/// The observer form of per-socket passive events: one slot per event,
/// every slot defaulting to a no-op.
#[allow(unused_variables)]
pub trait StreamSession: Send + Sync {
    /// A connection attempt began.
    fn on_connect_initiated(&self, socket: &Arc<StreamSocket>) {}

    /// The socket is connected.
    fn on_connect_complete(&self, socket: &Arc<StreamSocket>) {}

    /// An encryption upgrade began.
    fn on_upgrade_initiated(&self, socket: &Arc<StreamSocket>) {}

    /// The encryption session is established.
    fn on_upgrade_complete(&self, socket: &Arc<StreamSocket>) {}

    /// An encryption downgrade began.
    fn on_downgrade_initiated(&self, socket: &Arc<StreamSocket>) {}

    /// The encryption session is terminated; the socket remains open.
    fn on_downgrade_complete(&self, socket: &Arc<StreamSocket>) {}

    /// Read-side flow control was lifted.
    fn on_read_queue_flow_control_relaxed(&self, socket: &Arc<StreamSocket>) {}

    /// Read-side flow control was applied.
    fn on_read_queue_flow_control_applied(
        &self,
        socket: &Arc<StreamSocket>,
        origin: FlowControlOrigin,
    ) {
    }

    /// The read queue drained down to its low watermark.
    fn on_read_queue_low_watermark(&self, socket: &Arc<StreamSocket>, size: usize) {}

    /// The read queue grew above its high watermark.
    fn on_read_queue_high_watermark(&self, socket: &Arc<StreamSocket>, size: usize) {}

    /// Buffered read-queue bytes were discarded.
    fn on_read_queue_discarded(&self, socket: &Arc<StreamSocket>, size: usize) {}

    /// Write-side flow control was lifted.
    fn on_write_queue_flow_control_relaxed(&self, socket: &Arc<StreamSocket>) {}

    /// Write-side flow control was applied.
    fn on_write_queue_flow_control_applied(
        &self,
        socket: &Arc<StreamSocket>,
        origin: FlowControlOrigin,
    ) {
    }

    /// The write queue drained down to its low watermark.
    fn on_write_queue_low_watermark(&self, socket: &Arc<StreamSocket>, size: usize) {}

    /// The write queue grew above its high watermark.
    fn on_write_queue_high_watermark(&self, socket: &Arc<StreamSocket>, size: usize) {}

    /// Queued write-queue entries were discarded.
    fn on_write_queue_discarded(&self, socket: &Arc<StreamSocket>, size: usize) {}

    /// A shutdown sequence began.
    fn on_shutdown_initiated(&self, socket: &Arc<StreamSocket>) {}

    /// The receive direction is shut down.
    fn on_shutdown_receive(&self, socket: &Arc<StreamSocket>) {}

    /// The send direction is shut down.
    fn on_shutdown_send(&self, socket: &Arc<StreamSocket>) {}

    /// The requested shutdown directions have completed.
    fn on_shutdown_complete(&self, socket: &Arc<StreamSocket>) {}

    /// A fatal condition was observed.
    fn on_error(&self, socket: &Arc<StreamSocket>, error: Error) {}
}

/// The callback form of a session: a single function receiving every
/// event as a tagged value.
pub type SessionCallback = Arc<dyn Fn(&Arc<StreamSocket>, &StreamEvent) + Send + Sync>;

/// A coarser observer covering only establishment and close, usable by
/// one object across many sockets.
#[allow(unused_variables)]
pub trait StreamManager: Send + Sync {
    /// The socket reached its established state.
    fn on_established(&self, socket: &Arc<StreamSocket>) {}

    /// The socket finished closing.
    fn on_closed(&self, socket: &Arc<StreamSocket>) {}
}

/// The installed session target, if any.
#[derive(Clone)]
pub(crate) enum SessionTarget {
    Observer(Arc<dyn StreamSession>),
    Callback(SessionCallback),
}

/// Routes one event to the installed session target.
pub(crate) fn dispatch_event(
    socket: &Arc<StreamSocket>,
    target: &Option<SessionTarget>,
    event: &StreamEvent,
) {
    let target = match target {
        Some(target) => target,
        None => return,
    };
    match target {
        SessionTarget::Callback(callback) => callback(socket, event),
        SessionTarget::Observer(session) => match event {
            StreamEvent::ConnectInitiated => session.on_connect_initiated(socket),
            StreamEvent::ConnectComplete => session.on_connect_complete(socket),
            StreamEvent::UpgradeInitiated => session.on_upgrade_initiated(socket),
            StreamEvent::UpgradeComplete => session.on_upgrade_complete(socket),
            StreamEvent::DowngradeInitiated => session.on_downgrade_initiated(socket),
            StreamEvent::DowngradeComplete => session.on_downgrade_complete(socket),
            StreamEvent::ReadQueueFlowControlRelaxed => {
                session.on_read_queue_flow_control_relaxed(socket)
            }
            StreamEvent::ReadQueueFlowControlApplied { origin } => {
                session.on_read_queue_flow_control_applied(socket, *origin)
            }
            StreamEvent::ReadQueueLowWatermark { size } => {
                session.on_read_queue_low_watermark(socket, *size)
            }
            StreamEvent::ReadQueueHighWatermark { size } => {
                session.on_read_queue_high_watermark(socket, *size)
            }
            StreamEvent::ReadQueueDiscarded { size } => {
                session.on_read_queue_discarded(socket, *size)
            }
            StreamEvent::WriteQueueFlowControlRelaxed => {
                session.on_write_queue_flow_control_relaxed(socket)
            }
            StreamEvent::WriteQueueFlowControlApplied { origin } => {
                session.on_write_queue_flow_control_applied(socket, *origin)
            }
            StreamEvent::WriteQueueLowWatermark { size } => {
                session.on_write_queue_low_watermark(socket, *size)
            }
            StreamEvent::WriteQueueHighWatermark { size } => {
                session.on_write_queue_high_watermark(socket, *size)
            }
            StreamEvent::WriteQueueDiscarded { size } => {
                session.on_write_queue_discarded(socket, *size)
            }
            StreamEvent::ShutdownInitiated => session.on_shutdown_initiated(socket),
            StreamEvent::ShutdownReceive => session.on_shutdown_receive(socket),
            StreamEvent::ShutdownSend => session.on_shutdown_send(socket),
            StreamEvent::ShutdownComplete => session.on_shutdown_complete(socket),
            StreamEvent::Error { error } => session.on_error(socket, *error),
        },
    }
}
