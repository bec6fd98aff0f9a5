use tokio::sync::mpsc;
use tracing::trace;

use parley_core::events::TurnEvent;

/// Sending half of a turn's event stream. A caller that stops listening
/// never slows down or aborts the turn.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: TurnEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(event).is_err() {
            trace!("turn event receiver dropped");
        }
    }
}

/// Unbounded event channel for one turn.
pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<TurnEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_after_receiver_dropped_is_harmless() {
        let (sink, rx) = channel();
        drop(rx);
        sink.emit(TurnEvent::Token { delta: "x".into() });
    }

    #[test]
    fn events_arrive_in_order() {
        let (sink, mut rx) = channel();
        sink.emit(TurnEvent::Token { delta: "a".into() });
        sink.emit(TurnEvent::Token { delta: "b".into() });
        assert_eq!(rx.try_recv().unwrap(), TurnEvent::Token { delta: "a".into() });
        assert_eq!(rx.try_recv().unwrap(), TurnEvent::Token { delta: "b".into() });
    }
}
