use super::{
    registry::Registry,
    tcb::{Arrival, Tcb},
    tcp_parsing::TcpSegment,
    SocketError, SocketId, TIME_WAIT,
};
use crate::{
    logging::segment_event,
    protocols::{
        ipv4::{Ipv4, ProtocolNumber, SendError},
        utility::Endpoints,
    },
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// A segment on its way to a socket.
#[derive(Debug)]
pub struct Incoming {
    pub segment: TcpSegment,
    /// The connection the segment arrived on, from our side
    pub endpoints: Endpoints,
    /// When the segment was demultiplexed. Round trips are timed to here.
    pub arrived: Instant,
}

/// A socket: one control block and the queue of segments waiting for it.
///
/// After the handshake, two tasks serve each socket. One applies arriving
/// segments in order, the other sends and retransmits.
pub struct VSocket {
    id: SocketId,
    tcb: Mutex<Tcb>,
    sender: mpsc::UnboundedSender<Incoming>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Incoming>>,
    /// Woken whenever the control block may have changed
    changed: Notify,
    /// Wakes the send task
    outbound: Notify,
    cancel: CancellationToken,
}

impl VSocket {
    pub fn new(id: SocketId, tcb: Tcb) -> Arc<Self> {
        let (sender, inbound) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            tcb: Mutex::new(tcb),
            sender,
            inbound: AsyncMutex::new(inbound),
            changed: Notify::new(),
            outbound: Notify::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn tcb(&self) -> MutexGuard<'_, Tcb> {
        self.tcb.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a segment for the socket.
    pub fn deliver(&self, incoming: Incoming) -> Result<(), SocketError> {
        self.sender
            .send(incoming)
            .map_err(|_| SocketError::ConnectionReset)
    }

    /// Exclusive access to the segment queue. The handshake holds this
    /// until the receive task takes over.
    pub async fn inbound(&self) -> AsyncMutexGuard<'_, mpsc::UnboundedReceiver<Incoming>> {
        self.inbound.lock().await
    }

    pub fn wake_sender(&self) {
        self.outbound.notify_one();
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Stops the socket's tasks and wakes anyone waiting on it.
    pub fn terminate(&self) {
        self.cancel.cancel();
        self.changed.notify_waiters();
    }

    /// Runs `poll` against the control block until it produces a result,
    /// sleeping between attempts until the connection changes.
    pub async fn wait_for<T>(
        &self,
        mut poll: impl FnMut(&mut Tcb) -> Option<Result<T, SocketError>>,
    ) -> Result<T, SocketError> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let polled = {
                let mut tcb = self.tcb();
                poll(&mut tcb)
            };
            if let Some(result) = polled {
                return result;
            }
            if self.cancel.is_cancelled() {
                Err(SocketError::ConnectionReset)?
            }
            changed.await;
        }
    }

    /// Sends everything the control block has queued.
    pub fn flush(&self, ipv4: &Ipv4) -> Result<(), SendError> {
        let (endpoints, segments) = {
            let mut tcb = self.tcb();
            (tcb.endpoints(), tcb.take_outgoing())
        };
        for segment in segments {
            segment_event(
                self.id,
                true,
                endpoints,
                &segment.header,
                segment.payload.len(),
            );
            ipv4.send_message(
                Some(endpoints.local.address),
                endpoints.remote.address,
                ProtocolNumber::Tcp,
                segment.encode(),
            )?;
        }
        Ok(())
    }

    /// Like [`VSocket::flush`], for callers that leave recovery to the
    /// retransmission timer.
    pub fn flush_or_log(&self, ipv4: &Ipv4) {
        if let Err(e) = self.flush(ipv4) {
            tracing::debug!("Socket {} failed to send: {}", self.id, e);
        }
    }
}

/// Starts the receive and send tasks for an established connection.
pub fn spawn(socket: Arc<VSocket>, ipv4: Arc<Ipv4>, registry: Arc<Registry>) {
    tokio::spawn(receive_loop(socket.clone(), ipv4.clone(), registry));
    tokio::spawn(send_loop(socket, ipv4));
}

async fn receive_loop(socket: Arc<VSocket>, ipv4: Arc<Ipv4>, registry: Arc<Registry>) {
    let mut inbound = socket.inbound().await;
    loop {
        let incoming = tokio::select! {
            _ = socket.cancel.cancelled() => break,
            incoming = inbound.recv() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        let arrival = socket
            .tcb()
            .segment_arrives(incoming.segment, incoming.arrived);
        socket.flush_or_log(&ipv4);
        socket.wake_sender();
        socket.changed.notify_waiters();

        match arrival {
            Arrival::Continue => {}
            Arrival::TimeWait => start_time_wait(socket.clone(), registry.clone()),
            Arrival::Closed => {
                registry.release(socket.id);
                break;
            }
        }
    }
}

async fn send_loop(socket: Arc<VSocket>, ipv4: Arc<Ipv4>) {
    loop {
        let deadline = {
            let mut tcb = socket.tcb();
            tcb.poll_send(Instant::now());
            tcb.next_deadline()
        };
        socket.flush_or_log(&ipv4);
        socket.changed.notify_waiters();

        let timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = socket.cancel.cancelled() => break,
            _ = socket.outbound.notified() => {}
            _ = timer => {}
        }
    }
}

fn start_time_wait(socket: Arc<VSocket>, registry: Arc<Registry>) {
    tokio::spawn(async move {
        tokio::select! {
            _ = socket.cancel.cancelled() => return,
            _ = tokio::time::sleep(TIME_WAIT) => {}
        }
        let timed_out = socket.tcb().time_out();
        match timed_out {
            Ok(()) => registry.release(socket.id),
            Err(e) => tracing::warn!("Socket {} left TIME_WAIT early: {}", socket.id, e),
        }
    });
}
