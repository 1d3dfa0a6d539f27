//! Per-operation request records and the submission/completion race.
//!
//! Every non-blocking provider call that stays in flight is backed by one
//! `Request` slot, pre-initialized here at allocation. The provider may
//! complete a request at any point after allocating it, including from
//! within the submission call itself, so the slot and the submitter
//! resolve who runs the user callback with a single rule:
//!
//! * completion with no action attached parks the slot with `completed`
//!   set; the submitter finds the flag on return and dispatches inline;
//! * completion with an action attached queues the request for dispatch
//!   on the driving tick;
//! * a submitter that finds `completed` clear attaches its action and
//!   links the request to its connection.
//!
//! Both writers run on the worker's single thread, so the two orders are
//! the only ones possible.

use std::collections::VecDeque;

use bytes::BytesMut;
use slab::Slab;

use connection::ConnectionHandle;
use tag::Tag;
use Status;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RequestHandle(pub usize);

impl From<RequestHandle> for usize {
    fn from(x: RequestHandle) -> usize {
        x.0
    }
}

/// One-shot completion callback for sends and control operations.
pub type SendCb = Box<FnOnce(Status)>;

/// One-shot completion callback for receives; hands the buffer back,
/// truncated to the received length.
pub type RecvCb = Box<FnOnce(Status, BytesMut)>;

/// What to do when a request finishes.
pub enum Action {
    Send(SendCb),
    Recv(RecvCb),
    /// Engine-internal: completion of the connection-id exchange.
    Handshake,
}

/// One in-flight non-blocking operation.
pub struct Request {
    /// Connection the operation belongs to; `None` for worker-level
    /// receives such as the in-band message receive.
    pub conn: Option<ConnectionHandle>,
    pub action: Option<Action>,
    /// Set by completion when no action had been attached yet.
    pub completed: bool,
    /// `InProgress` until the completion entry point runs, a final status
    /// afterwards.
    pub status: Status,
    /// Received length; zero for sends.
    pub len: usize,
    /// Sender tag observed on tagged receives.
    pub sender_tag: Tag,
    /// Receive buffer handed back by the provider on completion.
    pub buf: Option<BytesMut>,
}

/// The worker's request slab plus the dispatch queue of completions that
/// arrived with an action already attached.
pub struct Requests {
    slab: Slab<Request>,
    ready: VecDeque<RequestHandle>,
}

impl Requests {
    pub fn new() -> Self {
        Requests {
            slab: Slab::new(),
            ready: VecDeque::new(),
        }
    }

    /// Pre-initialize a fresh request slot. Providers call this once per
    /// in-flight operation, before returning `Submit::Pending`.
    pub fn alloc(&mut self) -> RequestHandle {
        RequestHandle(self.slab.insert(Request {
            conn: None,
            action: None,
            completed: false,
            status: Status::InProgress,
            len: 0,
            sender_tag: 0,
            buf: None,
        }))
    }

    pub fn get(&self, h: RequestHandle) -> &Request {
        &self.slab[h.0]
    }

    pub fn get_mut(&mut self, h: RequestHandle) -> &mut Request {
        &mut self.slab[h.0]
    }

    pub fn free(&mut self, h: RequestHandle) -> Request {
        self.slab.remove(h.0)
    }

    /// Completion entry point used by providers.
    pub fn complete(
        &mut self,
        h: RequestHandle,
        status: Status,
        len: usize,
        sender_tag: Tag,
        buf: Option<BytesMut>,
    ) {
        let park = {
            let req = &mut self.slab[h.0];
            debug_assert!(status != Status::InProgress, "completion requires a final status");
            debug_assert_eq!(req.status, Status::InProgress, "request completed twice");
            req.status = status;
            req.len = len;
            req.sender_tag = sender_tag;
            if buf.is_some() {
                req.buf = buf;
            }
            req.action.is_none()
        };
        if park {
            self.slab[h.0].completed = true;
        } else {
            self.ready.push_back(h);
        }
    }

    /// Next completed request awaiting dispatch, in completion order.
    pub fn pop_ready(&mut self) -> Option<RequestHandle> {
        self.ready.pop_front()
    }

    /// Poll-style status check: `InProgress` until the request parks.
    pub fn check_status(&self, h: RequestHandle) -> Status {
        let req = &self.slab[h.0];
        if req.completed {
            req.status
        } else {
            Status::InProgress
        }
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Status;

    #[test]
    fn completion_before_attach_parks() {
        let mut reqs = Requests::new();
        let h = reqs.alloc();
        reqs.complete(h, Status::Ok, 8, 0, None);
        assert!(reqs.get(h).completed);
        assert_eq!(reqs.check_status(h), Status::Ok);
        assert!(reqs.pop_ready().is_none());
    }

    #[test]
    fn completion_after_attach_queues() {
        let mut reqs = Requests::new();
        let h = reqs.alloc();
        reqs.get_mut(h).action = Some(Action::Handshake);
        assert_eq!(reqs.check_status(h), Status::InProgress);
        reqs.complete(h, Status::Cancelled, 0, 0, None);
        assert_eq!(reqs.pop_ready(), Some(h));
        assert!(!reqs.get(h).completed);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn double_completion_is_caught() {
        let mut reqs = Requests::new();
        let h = reqs.alloc();
        reqs.get_mut(h).action = Some(Action::Handshake);
        reqs.complete(h, Status::Ok, 0, 0, None);
        reqs.complete(h, Status::Ok, 0, 0, None);
    }
}
