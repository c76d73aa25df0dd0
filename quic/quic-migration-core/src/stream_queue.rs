// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! FIFO of pending outgoing bidirectional stream requests, serviced as the
//! session's stream limiter reports capacity.

use crate::time::Timestamp;
use std::collections::VecDeque;

/// Outcome of [`StreamRequestQueue::try_create_stream`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryCreateStreamResult<S> {
    /// a stream was created immediately
    Created(S),
    /// the session cannot accept any streams right now
    ConnectionClosed,
    /// no capacity right now; the request was enqueued under this ticket
    Pending(RequestId),
}

/// What the queue needs from the session to admit or build a stream.
///
/// The session is the authority on both fail-closed state (goaway received,
/// not connected, going away) and how much outgoing stream capacity remains;
/// the queue only sequences requests against that capacity.
pub trait StreamFactory<R> {
    type Stream;

    /// True once the peer has sent a GOAWAY for this session.
    fn has_received_goaway(&self) -> bool;

    /// True while the session has a usable connection to create streams on.
    fn is_connected(&self) -> bool;

    /// True once the session has started winding down and should accept no
    /// further outgoing stream requests.
    fn is_going_away(&self) -> bool;

    /// True if the stream limiter currently allows one more outgoing
    /// bidirectional stream.
    fn can_create_outgoing_stream(&self) -> bool;

    /// Materializes `request` into a stream. Only called when
    /// `can_create_outgoing_stream` just reported true.
    fn create_stream(&mut self, request: R) -> Self::Stream;
}

struct QueuedRequest<R> {
    id: u64,
    request: R,
    pending_since: Timestamp,
}

/// A FIFO of stream-creation requests waiting on the session's stream
/// limiter. Requests are handed out in arrival order; cancelling a request
/// removes it without disturbing the order of the rest.
pub struct StreamRequestQueue<R> {
    queue: VecDeque<QueuedRequest<R>>,
    next_id: u64,
}

impl<R> Default for StreamRequestQueue<R> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 0,
        }
    }
}

/// A ticket identifying an enqueued request, used to cancel it later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl<R> StreamRequestQueue<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `request`, recording `now` as its arrival time. Returns the
    /// ticket to cancel it with.
    pub fn enqueue(&mut self, request: R, now: Timestamp) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(QueuedRequest {
            id,
            request,
            pending_since: now,
        });
        RequestId(id)
    }

    /// Removes a previously enqueued request, preserving the relative order
    /// of everything else. Returns the request if it was still queued.
    pub fn cancel(&mut self, id: RequestId) -> Option<R> {
        let index = self.queue.iter().position(|req| req.id == id.0)?;
        Some(self.queue.remove(index)?.request)
    }

    /// Pops the oldest request, if any, along with how long it waited.
    pub fn pop(&mut self, now: Timestamp) -> Option<(R, core::time::Duration)> {
        let req = self.queue.pop_front()?;
        Some((req.request, now.saturating_duration_since(req.pending_since)))
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drains every pending request, in FIFO order, for the caller to fail
    /// with a connection-closed error.
    pub fn drain(&mut self) -> impl Iterator<Item = R> + '_ {
        self.queue.drain(..).map(|req| req.request)
    }

    /// Fails closed if `factory` reports goaway/not-connected/going-away;
    /// otherwise creates a stream immediately if capacity allows, or
    /// enqueues the request to be served by
    /// [`Self::on_can_create_new_outgoing_stream`].
    pub fn try_create_stream<F: StreamFactory<R>>(
        &mut self,
        request: R,
        now: Timestamp,
        factory: &mut F,
    ) -> TryCreateStreamResult<F::Stream> {
        if factory.has_received_goaway() || !factory.is_connected() || factory.is_going_away() {
            return TryCreateStreamResult::ConnectionClosed;
        }
        if factory.can_create_outgoing_stream() {
            return TryCreateStreamResult::Created(factory.create_stream(request));
        }
        TryCreateStreamResult::Pending(self.enqueue(request, now))
    }

    /// Called by the session's stream limiter when capacity opens up. Pops
    /// and builds requests, oldest first, for as long as capacity allows.
    pub fn on_can_create_new_outgoing_stream<F: StreamFactory<R>>(
        &mut self,
        now: Timestamp,
        factory: &mut F,
    ) -> Vec<F::Stream> {
        let mut created = Vec::new();
        while factory.can_create_outgoing_stream() {
            let Some((request, _waited)) = self.pop(now) else {
                break;
            };
            created.push(factory.create_stream(request));
        }
        created
    }
}
