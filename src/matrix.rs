//! The per-stream event FIFO plus global-ordering index (the "stream
//! matrix").
//!
//! A map from stream id (or `None` for connection-level events) to a deque
//! of pending events, with a global monotonic counter used to decide, when a
//! caller asks for "the next event" without naming a stream, which stream's
//! head event is actually oldest.

use std::collections::{BTreeMap, VecDeque};

use crate::event::{Event, Ordered, StreamId};

/// A per-stream FIFO of [`Event`]s with a global ordering index.
///
/// The `None` key holds connection-scoped events (handshake, goaway,
/// termination) which must always be visible to every stream's consumer
/// ahead of any per-stream event they causally precede.
#[derive(Debug, Default)]
pub struct StreamMatrix {
    // BTreeMap<Option<u32>, _> gives us a stable, cheap "smallest stream id"
    // scan for `popleft(None)`; `None` sorts before every `Some(_)` key.
    streams: BTreeMap<StreamId, VecDeque<Ordered>>,
    next_global_id: u64,
}

impl StreamMatrix {
    /// An empty matrix.
    pub fn new() -> Self {
        StreamMatrix {
            streams: BTreeMap::new(),
            next_global_id: 0,
        }
    }

    fn stamp(&mut self, event: Event) -> Ordered {
        let global_id = self.next_global_id;
        self.next_global_id += 1;
        Ordered { global_id, event }
    }

    /// Append one event to the tail of its stream's queue.
    pub fn append(&mut self, event: Event) {
        let key = event.stream_id();
        let ordered = self.stamp(event);
        self.streams.entry(key).or_default().push_back(ordered);
    }

    /// Append a batch of events in order.
    pub fn extend<I: IntoIterator<Item = Event>>(&mut self, events: I) {
        for event in events {
            self.append(event);
        }
    }

    /// Push an already-ordered event back onto the head of its stream's
    /// queue, preserving its original global id — used by [`Self::reshelve`].
    fn push_front_ordered(&mut self, ordered: Ordered) {
        let key = ordered.event.stream_id();
        self.streams.entry(key).or_default().push_front(ordered);
    }

    /// Push events back to the head of their stream queues after speculative
    /// inspection, preserving relative order (the first element of `events`
    /// ends up closest to the front).
    pub fn reshelve<I: IntoIterator<Item = Ordered>>(&mut self, events: I) {
        for ordered in events.into_iter().collect::<Vec<_>>().into_iter().rev() {
            self.push_front_ordered(ordered);
        }
    }

    /// Pop the next ready event.
    ///
    /// If `stream_id` is `Some(id)` and that stream has a ready event, it is
    /// popped — *unless* a connection-global (`None`-keyed) event with a
    /// smaller global id exists, in which case the global event is popped
    /// instead. If `stream_id` is `None`, the event
    /// is popped from whichever stream (including the global queue) holds
    /// the smallest-global-id head.
    pub fn popleft(&mut self, stream_id: StreamId) -> Option<Event> {
        match stream_id {
            Some(id) => {
                let global_head = self.streams.get(&None).and_then(|q| q.front());
                let stream_head = self.streams.get(&Some(id)).and_then(|q| q.front());

                let take_global = match (global_head, stream_head) {
                    (Some(g), Some(s)) => g.global_id < s.global_id,
                    (Some(_), None) => true,
                    _ => false,
                };

                if take_global {
                    self.streams.get_mut(&None).unwrap().pop_front().map(|o| o.event)
                } else {
                    self.streams
                        .get_mut(&Some(id))
                        .and_then(|q| q.pop_front())
                        .map(|o| o.event)
                }
            }
            None => {
                let winner = self
                    .streams
                    .iter()
                    .filter_map(|(k, q)| q.front().map(|o| (*k, o.global_id)))
                    .min_by_key(|(_, global_id)| *global_id)
                    .map(|(k, _)| k);

                match winner {
                    Some(k) => self.streams.get_mut(&k).and_then(|q| q.pop_front()).map(|o| o.event),
                    None => None,
                }
            }
        }
    }

    /// Number of events currently queued.
    ///
    /// If `stream_id` is given, counts only that stream (plus the global
    /// queue, since a global event is always eligible to satisfy that
    /// stream's next pop); `exclude` skips events the predicate matches.
    pub fn count(&self, stream_id: StreamId, exclude: Option<&dyn Fn(&Event) -> bool>) -> usize {
        let matches = |o: &Ordered| exclude.map(|f| !f(&o.event)).unwrap_or(true);
        match stream_id {
            Some(id) => {
                let global = self.streams.get(&None).map(|q| q.iter().filter(|o| matches(o)).count()).unwrap_or(0);
                let local = self
                    .streams
                    .get(&Some(id))
                    .map(|q| q.iter().filter(|o| matches(o)).count())
                    .unwrap_or(0);
                global + local
            }
            None => self.streams.values().flat_map(|q| q.iter()).filter(|o| matches(o)).count(),
        }
    }

    /// True if `popleft(stream_id)` would return `Some(_)` right now.
    pub fn has_pending_event(&self, stream_id: StreamId) -> bool {
        match stream_id {
            Some(id) => {
                self.streams.get(&None).map_or(false, |q| !q.is_empty())
                    || self.streams.get(&Some(id)).map_or(false, |q| !q.is_empty())
            }
            None => self.streams.values().any(|q| !q.is_empty()),
        }
    }

    /// The sorted list of stream ids that currently have at least one queued
    /// event, excluding the `None` connection-global key. Recomputed lazily;
    /// cheap enough at matrix scale (one connection's in-flight streams) that
    /// no invalidation bookkeeping is kept.
    pub fn streams(&self) -> Vec<u32> {
        self.streams
            .keys()
            .filter_map(|k| *k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use http::{HeaderMap, StatusCode};

    fn data(stream_id: u32, end_stream: bool) -> Event {
        Event::DataReceived {
            stream_id,
            data: bytes::Bytes::from_static(b"x"),
            end_stream,
        }
    }

    fn headers(stream_id: u32) -> Event {
        Event::HeadersReceived {
            stream_id,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            end_stream: false,
        }
    }

    fn goaway() -> Event {
        Event::GoawayReceived {
            last_stream_id: 7,
            code: 0,
        }
    }

    /// Per-stream FIFO is preserved under popleft(Some(s)).
    #[test]
    fn per_stream_fifo_preserved() {
        let mut m = StreamMatrix::new();
        m.append(headers(1));
        m.append(data(3, false));
        m.append(data(1, false));
        m.append(data(3, true));
        m.append(data(1, true));

        assert!(matches!(m.popleft(Some(1)), Some(Event::HeadersReceived { stream_id: 1, .. })));
        assert!(matches!(m.popleft(Some(1)), Some(Event::DataReceived { stream_id: 1, end_stream: false, .. })));
        assert!(matches!(m.popleft(Some(1)), Some(Event::DataReceived { stream_id: 1, end_stream: true, .. })));
        assert!(m.popleft(Some(1)).is_none());

        assert!(matches!(m.popleft(Some(3)), Some(Event::DataReceived { stream_id: 3, end_stream: false, .. })));
        assert!(matches!(m.popleft(Some(3)), Some(Event::DataReceived { stream_id: 3, end_stream: true, .. })));
    }

    /// Invariant 2: popleft(None) yields events in global-id order.
    #[test]
    fn popleft_without_stream_is_global_order() {
        let mut m = StreamMatrix::new();
        m.append(data(5, false));
        m.append(data(2, false));
        m.append(data(5, true));

        assert!(matches!(m.popleft(None), Some(Event::DataReceived { stream_id: 5, end_stream: false, .. })));
        assert!(matches!(m.popleft(None), Some(Event::DataReceived { stream_id: 2, end_stream: false, .. })));
        assert!(matches!(m.popleft(None), Some(Event::DataReceived { stream_id: 5, end_stream: true, .. })));
    }

    /// A global event queued before a stream event must be delivered first,
    /// even when the caller asks for that specific stream.
    #[test]
    fn global_event_precedes_stream_event_with_larger_id() {
        let mut m = StreamMatrix::new();
        m.append(data(1, false)); // global_id 0, stream 1
        m.append(goaway()); // global_id 1, global queue

        match m.popleft(Some(1)) {
            Some(Event::DataReceived { stream_id: 1, .. }) => {}
            other => panic!("expected the earlier stream event first, got {other:?}"),
        }

        match m.popleft(Some(1)) {
            Some(Event::GoawayReceived { .. }) => {}
            other => panic!("expected goaway, got {other:?}"),
        }
    }

    #[test]
    fn global_event_with_smaller_id_jumps_ahead_of_stream() {
        let mut m = StreamMatrix::new();
        m.append(goaway()); // global_id 0
        m.append(data(1, false)); // global_id 1, stream 1

        match m.popleft(Some(1)) {
            Some(Event::GoawayReceived { .. }) => {}
            other => panic!("expected goaway first, got {other:?}"),
        }
        match m.popleft(Some(1)) {
            Some(Event::DataReceived { stream_id: 1, .. }) => {}
            other => panic!("expected the data event, got {other:?}"),
        }
    }

    #[test]
    fn reshelve_preserves_order() {
        let mut m = StreamMatrix::new();
        m.append(data(1, false));
        m.append(data(1, true));

        let a = m.popleft(Some(1)).unwrap();
        let b = m.popleft(Some(1)).unwrap();
        assert!(m.popleft(Some(1)).is_none());

        // Re-stamp with fake ordering to exercise reshelve directly.
        let ordered_a = Ordered { global_id: 0, event: a };
        let ordered_b = Ordered { global_id: 1, event: b };
        m.reshelve(vec![ordered_a, ordered_b]);

        assert!(matches!(m.popleft(Some(1)), Some(Event::DataReceived { end_stream: false, .. })));
        assert!(matches!(m.popleft(Some(1)), Some(Event::DataReceived { end_stream: true, .. })));
    }

    #[test]
    fn count_excludes_predicate() {
        let mut m = StreamMatrix::new();
        m.append(data(1, false));
        m.append(data(1, true));
        m.append(headers(1));

        let total = m.count(Some(1), None);
        assert_eq!(total, 3);

        let only_data = m.count(Some(1), Some(&|e: &Event| matches!(e, Event::HeadersReceived { .. })));
        assert_eq!(only_data, 2);
    }

    #[test]
    fn streams_lists_active_ids_sorted() {
        let mut m = StreamMatrix::new();
        m.append(data(5, false));
        m.append(data(1, false));
        m.append(goaway());
        assert_eq!(m.streams(), vec![1, 5]);
    }
}
