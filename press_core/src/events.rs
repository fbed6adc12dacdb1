//! Status events reported to the host.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Info,
    Start,
    /// Completion, tagged with the name of the command that finished
    Done,
    Error,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Start => "START",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub text: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.text)
    }
}

/// Destination for controller events. Implementations must not block.
pub trait EventSink {
    fn emit(&mut self, kind: EventKind, text: &str);
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, kind: EventKind, text: &str) {
        match kind {
            EventKind::Error => tracing::warn!(target: "press::event", kind = %kind, "{text}"),
            _ => tracing::info!(target: "press::event", kind = %kind, "{text}"),
        }
    }
}

/// Forwards events to another thread. A disconnected receiver drops them.
impl EventSink for crossbeam_channel::Sender<Event> {
    fn emit(&mut self, kind: EventKind, text: &str) {
        let event = Event {
            kind,
            text: text.to_string(),
        };
        if self.try_send(event).is_err() {
            tracing::debug!(kind = %kind, "event receiver gone; dropping event");
        }
    }
}

/// Send each event to both sinks.
pub struct Tee<A, B>(pub A, pub B);

impl<A: EventSink, B: EventSink> EventSink for Tee<A, B> {
    fn emit(&mut self, kind: EventKind, text: &str) {
        self.0.emit(kind, text);
        self.1.emit(kind, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (mut tx, rx) = crossbeam_channel::unbounded::<Event>();
        tx.emit(EventKind::Done, "home");
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::Done);
        assert_eq!(ev.to_string(), "DONE: home");
    }

    #[test]
    fn channel_sink_tolerates_closed_receiver() {
        let (mut tx, rx) = crossbeam_channel::bounded::<Event>(1);
        drop(rx);
        tx.emit(EventKind::Info, "nobody listening");
    }
}
