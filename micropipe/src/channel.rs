//! Point-to-point flow channels between stages.
//!
//! A channel carries `Flow<T>` entries: tagged values followed by exactly one
//! end-of-flow sentinel. Senders are cloneable so a stage's concurrently
//! dispatched handlers can all emit; the receiver is owned by the single
//! downstream reader.

use futures::Stream;
use micropipe_shared::{Flow, FlowValue, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Capacity of a flow channel.
///
/// An unbounded channel never suspends its writer. A bounded channel
/// suspends writers once full, which throttles the upstream stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    #[default]
    Unbounded,
    Bounded(usize),
}

impl Capacity {
    /// Map a numeric limit to a capacity, treating 0 as "no limit".
    pub fn from_limit(limit: usize) -> Self {
        if limit == 0 {
            Capacity::Unbounded
        } else {
            Capacity::Bounded(limit)
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        match self {
            Capacity::Bounded(0) => Err(PipelineError::Config(
                "bounded channel capacity must be greater than zero".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Capacity::Bounded(_))
    }
}

/// Create a flow channel with the given capacity.
pub fn flow_channel<T>(capacity: Capacity) -> (FlowSender<T>, FlowReceiver<T>) {
    match capacity {
        Capacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                FlowSender {
                    inner: SenderInner::Unbounded(tx),
                },
                FlowReceiver {
                    inner: ReceiverInner::Unbounded(rx),
                    capacity,
                },
            )
        }
        Capacity::Bounded(n) => {
            // tokio panics on a zero-sized buffer
            let (tx, rx) = mpsc::channel(n.max(1));
            (
                FlowSender {
                    inner: SenderInner::Bounded(tx),
                },
                FlowReceiver {
                    inner: ReceiverInner::Bounded(rx),
                    capacity,
                },
            )
        }
    }
}

enum SenderInner<T> {
    Bounded(mpsc::Sender<Flow<T>>),
    Unbounded(mpsc::UnboundedSender<Flow<T>>),
}

/// Writing side of a flow channel.
pub struct FlowSender<T> {
    inner: SenderInner<T>,
}

impl<T> Clone for FlowSender<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            SenderInner::Bounded(tx) => SenderInner::Bounded(tx.clone()),
            SenderInner::Unbounded(tx) => SenderInner::Unbounded(tx.clone()),
        };
        Self { inner }
    }
}

impl<T> std::fmt::Debug for FlowSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            SenderInner::Bounded(_) => "bounded",
            SenderInner::Unbounded(_) => "unbounded",
        };
        f.debug_struct("FlowSender").field("kind", &kind).finish()
    }
}

impl<T> FlowSender<T> {
    /// Send one entry, suspending while a bounded channel is full.
    pub async fn send(&self, flow: Flow<T>) -> PipelineResult<()> {
        let sent = match &self.inner {
            SenderInner::Bounded(tx) => tx.send(flow).await.is_ok(),
            SenderInner::Unbounded(tx) => tx.send(flow).is_ok(),
        };

        if sent {
            Ok(())
        } else {
            Err(PipelineError::ChannelClosed(
                "downstream receiver dropped".into(),
            ))
        }
    }

    pub async fn send_value(&self, value: FlowValue<T>) -> PipelineResult<()> {
        self.send(Flow::Value(value)).await
    }

    /// Send the end-of-flow sentinel.
    pub async fn send_end(&self) -> PipelineResult<()> {
        self.send(Flow::End).await
    }

    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SenderInner::Bounded(tx) => tx.is_closed(),
            SenderInner::Unbounded(tx) => tx.is_closed(),
        }
    }
}

enum ReceiverInner<T> {
    Bounded(mpsc::Receiver<Flow<T>>),
    Unbounded(mpsc::UnboundedReceiver<Flow<T>>),
}

/// Reading side of a flow channel.
pub struct FlowReceiver<T> {
    inner: ReceiverInner<T>,
    capacity: Capacity,
}

impl<T> std::fmt::Debug for FlowReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowReceiver")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> FlowReceiver<T> {
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Receive the next entry.
    ///
    /// Returns `None` only when every sender is gone without the sentinel
    /// having been read, which a well-behaved upstream never does.
    pub async fn recv(&mut self) -> Option<Flow<T>> {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.recv().await,
            ReceiverInner::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<Flow<T>> {
        match &mut self.inner {
            ReceiverInner::Bounded(rx) => rx.try_recv().ok(),
            ReceiverInner::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Take every value currently buffered, skipping sentinels. Never waits.
    pub fn drain(&mut self) -> Vec<FlowValue<T>> {
        let mut values = Vec::new();
        while let Some(flow) = self.try_recv() {
            if let Flow::Value(v) = flow {
                values.push(v);
            }
        }
        values
    }

    /// Read values until the sentinel (or a closed channel) and collect them.
    pub async fn collect_until_end(&mut self) -> Vec<FlowValue<T>> {
        let mut values = Vec::new();
        while let Some(flow) = self.recv().await {
            match flow {
                Flow::Value(v) => values.push(v),
                Flow::End => break,
            }
        }
        values
    }

    /// Convert into a stream that ends at the sentinel.
    pub fn into_stream(self) -> impl Stream<Item = FlowValue<T>> {
        let mut rx = self;
        async_stream::stream! {
            while let Some(flow) = rx.recv().await {
                match flow {
                    Flow::Value(v) => yield v,
                    Flow::End => break,
                }
            }
        }
    }
}
