//! Thin capability surface over the underlying transport provider.
//!
//! The provider owns the actual wires: endpoints, tag matching, stream
//! channels, listeners. Everything here is non-blocking; an operation
//! either finishes during the call, fails during the call, or hands back a
//! request that the provider completes during some later [`progress`] of
//! the owning worker. Completions are written into the caller-owned
//! request slab, never delivered through a side channel, which is what
//! keeps the whole engine single-threaded and lock-free.
//!
//! [`progress`]: trait.Provider.html#tymethod.progress

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use request::{RequestHandle, Requests};
use tag::Tag;
use Status;

pub const FEATURE_TAG: u64 = 1 << 0;
pub const FEATURE_STREAM: u64 = 1 << 1;
pub const FEATURE_WAKEUP: u64 = 1 << 2;
pub const FEATURE_RMA: u64 = 1 << 3;
pub const FEATURE_AMO32: u64 = 1 << 4;
pub const FEATURE_AMO64: u64 = 1 << 5;

/// Feature bits the engine cannot operate without.
pub const REQUIRED_FEATURES: u64 = FEATURE_TAG | FEATURE_STREAM;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WorkerId(pub u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ListenerId(pub u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EpId(pub u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnRequestId(pub u64);

/// Result of a non-blocking submission.
#[derive(Debug)]
pub enum Submit {
    /// The operation finished during the call.
    Done,
    /// The operation failed before anything was enqueued.
    Fail(Status),
    /// The operation is in flight under the given request. The provider
    /// may already have completed the request by the time the submission
    /// call returns; the submitter must inspect its `completed` flag.
    Pending(RequestHandle),
}

/// Out-of-band notifications surfaced during a worker's progress tick.
#[derive(Debug)]
pub enum ProviderEvent {
    /// An inbound connection request arrived on a listener.
    ConnRequest {
        listener: ListenerId,
        request: ConnRequestId,
    },
    /// An endpoint failed. Reported once per endpoint.
    EndpointError { ep: EpId, status: Status },
}

/// Static provider properties.
#[derive(Debug, Copy, Clone)]
pub struct ProviderAttrs {
    /// Feature bits the provider can satisfy.
    pub features: u64,
}

/// Capabilities the engine consumes from the transport.
///
/// Receives never report `Submit::Done`: an inline completion travels
/// through the request slot instead (allocate, complete, return
/// `Pending`), so the payload and sender tag always arrive the same way.
pub trait Provider {
    fn context_init(&mut self, features: u64) -> Result<(), Status>;
    fn context_cleanup(&mut self);
    fn query(&self) -> ProviderAttrs;

    fn worker_create(&mut self) -> Result<WorkerId, Status>;
    fn worker_destroy(&mut self, worker: WorkerId);

    fn listener_create(
        &mut self,
        worker: WorkerId,
        addr: SocketAddr,
    ) -> Result<ListenerId, Status>;
    fn listener_destroy(&mut self, listener: ListenerId);
    fn listener_reject(&mut self, request: ConnRequestId);
    /// Remote address of a pending connection request, if still known.
    fn conn_request_remote(&self, request: ConnRequestId) -> Option<SocketAddr>;

    fn ep_connect(&mut self, worker: WorkerId, addr: SocketAddr) -> Result<EpId, Status>;
    fn ep_accept(&mut self, worker: WorkerId, request: ConnRequestId) -> Result<EpId, Status>;
    /// Close an endpoint, aborting its in-flight traffic when `force` is
    /// set. May return a close request to poll for finalization.
    fn ep_close(&mut self, ep: EpId, force: bool, reqs: &mut Requests) -> Submit;

    fn tag_send(&mut self, ep: EpId, data: Bytes, tag: Tag, reqs: &mut Requests) -> Submit;
    fn tag_recv(
        &mut self,
        worker: WorkerId,
        buf: BytesMut,
        tag: Tag,
        mask: Tag,
        reqs: &mut Requests,
    ) -> Submit;
    fn stream_send(&mut self, ep: EpId, data: Bytes, reqs: &mut Requests) -> Submit;
    /// Ordered byte receive with wait-all semantics: the request completes
    /// only once `buf` has been filled to capacity.
    fn stream_recv(&mut self, ep: EpId, buf: BytesMut, reqs: &mut Requests) -> Submit;

    /// Ask the provider to abort an in-flight request. Cancellation is
    /// asynchronous; the request still completes (with a cancelled
    /// status) through the normal path. Unknown or already-completed
    /// requests are ignored.
    fn request_cancel(&mut self, worker: WorkerId, req: RequestHandle);

    /// Drive outstanding work for one worker. Completions land in `reqs`,
    /// out-of-band notifications in `events`. Returns whether anything
    /// made progress.
    fn progress(
        &mut self,
        worker: WorkerId,
        reqs: &mut Requests,
        events: &mut VecDeque<ProviderEvent>,
    ) -> bool;
}
