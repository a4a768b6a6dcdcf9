//! Engine communication channels
//!
//! Two channels with different shapes: the bounded per-cycle event channel
//! a backend writes [`AgentEvent`]s into (drained exactly once, in order,
//! by the cycle handler), and the unbounded notice stream the embedding
//! process drains for observability and human-facing delivery.

use tokio::sync::mpsc;

use crate::protocol::{AgentEvent, Notice};

/// Producer half of one cycle's event channel, handed to the backend
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSink {
    /// Emit one event. Waits when the channel is at capacity; fails only
    /// if the consuming cycle has gone away.
    pub async fn emit(&self, event: AgentEvent) -> Result<(), ChannelClosed> {
        self.tx.send(event).await.map_err(|_| ChannelClosed)
    }
}

/// Consumer half of one cycle's event channel
pub struct EventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventStream {
    /// Next event in emission order; `None` once the producer is done.
    pub async fn next(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }
}

/// Create the bounded event channel for a single cycle
pub fn cycle_channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSink { tx }, EventStream { rx })
}

/// The cycle consuming this channel has terminated
#[derive(Debug, thiserror::Error)]
#[error("Cycle event channel closed")]
pub struct ChannelClosed;

/// Sender for engine notices, cloned into every component that reports
pub(crate) type NoticeSender = mpsc::UnboundedSender<Notice>;

/// Client-side stream of engine notices
pub struct EngineChannel {
    rx: mpsc::UnboundedReceiver<Notice>,
}

impl EngineChannel {
    pub(crate) fn pair() -> (NoticeSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Receive the next notice; `None` once the engine is dropped.
    pub async fn recv(&mut self) -> Option<Notice> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Notice> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued
    pub fn drain(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.rx.try_recv() {
            out.push(notice);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AgentId;

    #[tokio::test]
    async fn test_cycle_channel_preserves_order() {
        let (sink, mut stream) = cycle_channel(4);
        sink.emit(AgentEvent::ThoughtEmitted { text: "a".into() }).await.unwrap();
        sink.emit(AgentEvent::FinalResponse { text: "b".into() }).await.unwrap();
        drop(sink);

        assert!(matches!(
            stream.next().await,
            Some(AgentEvent::ThoughtEmitted { text }) if text == "a"
        ));
        assert!(matches!(
            stream.next().await,
            Some(AgentEvent::FinalResponse { text }) if text == "b"
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_emit_fails_after_consumer_drops() {
        let (sink, stream) = cycle_channel(1);
        drop(stream);
        let err = sink.emit(AgentEvent::ThoughtEmitted { text: "x".into() }).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_notice_stream_drains() {
        let (tx, mut channel) = EngineChannel::pair();
        let agent = AgentId::new();
        tx.send(Notice::Thought { agent, text: "t1".into() }).unwrap();
        tx.send(Notice::Thought { agent, text: "t2".into() }).unwrap();

        let drained = channel.drain();
        assert_eq!(drained.len(), 2);
        assert!(channel.try_recv().is_none());
    }
}
