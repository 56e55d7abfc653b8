//! Ordered queue of pending remote mutations.
//!
//! Exactly one action may be in flight. The head is only taken once the
//! session is active, so an action is never lost to a pending login.

use crate::api::EditRequest;
use std::collections::VecDeque;

/// A queued mutation plus its submission sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub seq: u64,
    pub request: EditRequest,
}

#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: VecDeque<PendingAction>,
    in_flight: Option<PendingAction>,
    next_seq: u64,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request; returns its sequence number.
    pub fn enqueue(&mut self, request: EditRequest) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(PendingAction { seq, request });
        seq
    }

    /// Take the head for dispatch, unless something is already in flight.
    pub fn start_next(&mut self) -> Option<PendingAction> {
        if self.in_flight.is_some() {
            return None;
        }
        let action = self.pending.pop_front()?;
        self.in_flight = Some(action.clone());
        Some(action)
    }

    /// The in-flight action finished, successfully or not. It is gone for good.
    pub fn finish(&mut self, seq: u64) -> Option<PendingAction> {
        match &self.in_flight {
            Some(action) if action.seq == seq => self.in_flight.take(),
            _ => None,
        }
    }

    /// Put the in-flight action back at the head so it is sent again first.
    pub fn requeue(&mut self, seq: u64) {
        if let Some(action) = self.finish(seq) {
            self.pending.push_front(action);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn head(&self) -> Option<&PendingAction> {
        self.pending.front()
    }

    /// Number of actions not yet dispatched.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything, including the in-flight marker.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len() + usize::from(self.in_flight.is_some());
        self.pending.clear();
        self.in_flight = None;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StreamRef;
    use proptest::prelude::*;

    fn sub(url: &str) -> EditRequest {
        EditRequest::Subscribe(url.to_string())
    }

    #[test]
    fn test_single_in_flight() {
        let mut queue = ActionQueue::new();
        queue.enqueue(sub("https://a.example.com/rss"));
        queue.enqueue(sub("https://b.example.com/rss"));

        let first = queue.start_next().unwrap();
        assert_eq!(first.seq, 0);
        assert!(queue.start_next().is_none());
        assert_eq!(queue.len(), 1);

        queue.finish(first.seq);
        let second = queue.start_next().unwrap();
        assert_eq!(second.request, sub("https://b.example.com/rss"));
    }

    #[test]
    fn test_finish_ignores_stale_seq() {
        let mut queue = ActionQueue::new();
        queue.enqueue(sub("https://a.example.com/rss"));
        let action = queue.start_next().unwrap();
        assert!(queue.finish(action.seq + 1).is_none());
        assert!(queue.is_busy());
        assert!(queue.finish(action.seq).is_some());
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_requeue_goes_to_head() {
        let mut queue = ActionQueue::new();
        queue.enqueue(sub("https://a.example.com/rss"));
        queue.enqueue(sub("https://b.example.com/rss"));
        let first = queue.start_next().unwrap();
        queue.requeue(first.seq);
        assert_eq!(queue.head().map(|a| a.seq), Some(first.seq));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_clear_counts_in_flight() {
        let mut queue = ActionQueue::new();
        queue.enqueue(sub("https://a.example.com/rss"));
        queue.enqueue(sub("https://b.example.com/rss"));
        queue.start_next();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(!queue.is_busy());
    }

    #[test]
    fn test_tag_edit_requires_a_tag() {
        let stream = StreamRef::Feed("https://a.example.com/rss".into());
        assert!(EditRequest::tag_edit("i", stream.clone(), None, None).is_none());
        assert_eq!(
            EditRequest::tag_edit("i", stream.clone(), Some("x"), None),
            Some(EditRequest::add_tag("i", stream, "x"))
        );
    }

    proptest! {
        #[test]
        fn prop_dispatch_order_matches_enqueue_order(urls in proptest::collection::vec("[a-z]{1,8}", 0..40)) {
            let mut queue = ActionQueue::new();
            for url in &urls {
                queue.enqueue(sub(url));
            }

            let mut dispatched = Vec::new();
            while let Some(action) = queue.start_next() {
                if let EditRequest::Subscribe(url) = &action.request {
                    dispatched.push(url.clone());
                }
                queue.finish(action.seq);
            }
            prop_assert_eq!(dispatched, urls);
        }
    }
}
