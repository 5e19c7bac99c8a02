use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use titrate_buffer::{QueueId, ThresholdChange};
use titrate_common::Timestamp;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, Sleep},
};
use tracing::debug;

use crate::{AdmissionController, AdmissionDecision, Arrival, NodeError, NodeOptions, QueueCounters};

const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Requests from a [`NodeHandle`] to its driver.
enum Command {
    Packet { arrival: Arrival, response: oneshot::Sender<AdmissionDecision> },
    Dequeue { queue: QueueId, size: u64, response: oneshot::Sender<u64> },
    Override { queue: QueueId, bytes: u64, response: oneshot::Sender<ThresholdChange> },
    EndFlow { queue: QueueId, response: oneshot::Sender<bool> },
    Counters { queue: QueueId, response: oneshot::Sender<QueueCounters> },
}

/// Cloneable handle to a controller running on its own task.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    to_driver: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Packet { .. } => "Packet",
            Self::Dequeue { .. } => "Dequeue",
            Self::Override { .. } => "Override",
            Self::EndFlow { .. } => "EndFlow",
            Self::Counters { .. } => "Counters",
        };
        f.write_str(name)
    }
}

impl NodeHandle {
    /// Builds a controller from `options` and spawns its driver on the current tokio runtime.
    /// The node's timeline starts now and follows the runtime clock.
    pub fn spawn(options: NodeOptions) -> Result<Self, NodeError> {
        let controller = AdmissionController::new(options)?;
        let (handle, driver) = NodeDriver::new(controller);
        tokio::spawn(driver);
        Ok(handle)
    }

    pub async fn admit(&self, arrival: Arrival) -> Result<AdmissionDecision, NodeError> {
        self.request(|response| Command::Packet { arrival, response }).await
    }

    /// Reports that `size` bytes left `queue`. Returns the bytes actually released.
    pub async fn depart(&self, queue: QueueId, size: u64) -> Result<u64, NodeError> {
        self.request(|response| Command::Dequeue { queue, size, response }).await
    }

    pub async fn override_threshold(
        &self,
        queue: QueueId,
        bytes: u64,
    ) -> Result<ThresholdChange, NodeError> {
        self.request(|response| Command::Override { queue, bytes, response }).await
    }

    pub async fn end_flow(&self, queue: QueueId) -> Result<bool, NodeError> {
        self.request(|response| Command::EndFlow { queue, response }).await
    }

    pub async fn counters(&self, queue: QueueId) -> Result<QueueCounters, NodeError> {
        self.request(|response| Command::Counters { queue, response }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NodeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.to_driver.send(command(response_tx)).await.map_err(|_| NodeError::Closed)?;
        response_rx.await.map_err(|_| NodeError::Closed)
    }
}

/// The node driver. Endless future that owns the [`AdmissionController`], feeds it the
/// commands of every [`NodeHandle`] and wakes up for its timers. Resolves once all handles are
/// dropped.
#[must_use = "futures do nothing unless polled"]
pub struct NodeDriver {
    controller: AdmissionController,
    from_handle: mpsc::Receiver<Command>,
    /// Wall-clock instant of the node's `Timestamp::ZERO`.
    started: Instant,
    /// Armed at the controller's next timer deadline.
    sleep: Pin<Box<Sleep>>,
}

impl std::fmt::Debug for NodeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDriver").field("controller", &self.controller).finish_non_exhaustive()
    }
}

impl NodeDriver {
    pub fn new(controller: AdmissionController) -> (NodeHandle, Self) {
        let (to_driver, from_handle) = mpsc::channel(DEFAULT_BUFFER_SIZE);
        let started = Instant::now();
        let driver = Self {
            controller,
            from_handle,
            started,
            sleep: Box::pin(tokio::time::sleep_until(started)),
        };

        (NodeHandle { to_driver }, driver)
    }

    fn now(&self) -> Timestamp {
        Timestamp::from(self.started.elapsed())
    }

    fn on_command(&mut self, command: Command) {
        let now = self.now();
        // Receivers may have given up on the reply; that is fine.
        match command {
            Command::Packet { arrival, response } => {
                let _ = response.send(self.controller.on_packet(arrival, now));
            }
            Command::Dequeue { queue, size, response } => {
                let _ = response.send(self.controller.on_dequeue(queue, size, now));
            }
            Command::Override { queue, bytes, response } => {
                let _ = response.send(self.controller.override_threshold(queue, bytes, now));
            }
            Command::EndFlow { queue, response } => {
                let _ = response.send(self.controller.end_flow(queue, now));
            }
            Command::Counters { queue, response } => {
                self.controller.advance(now);
                let _ = response.send(self.controller.counters(queue));
            }
        }
    }
}

impl Future for NodeDriver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            let now = this.now();
            this.controller.advance(now);

            match this.from_handle.poll_recv(cx) {
                Poll::Ready(Some(command)) => {
                    this.on_command(command);
                    continue;
                }
                Poll::Ready(None) => {
                    debug!("All node handles dropped, shutting down driver");
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            if let Some(deadline) = this.controller.next_deadline() {
                let at = this.started + Duration::from_nanos(deadline.as_nanos());
                if this.sleep.deadline() != at {
                    this.sleep.as_mut().reset(at);
                }

                if this.sleep.poll_unpin(cx).is_ready() {
                    // The runtime clock may trail the timer wheel slightly.
                    this.controller.advance(deadline);
                    continue;
                }
            }

            return Poll::Pending;
        }
    }
}
