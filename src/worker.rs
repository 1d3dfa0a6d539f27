//! Worker engine: the single-threaded progress context that drives every
//! connection and in-flight request of one provider worker.
//!
//! The engine performs no I/O and spawns no threads. All observable
//! asynchrony is expressed through callbacks invoked from within
//! [`Worker::progress`], which the application calls in its own loop with
//! its own notion of time. One tick runs, in order: one provider poll
//! (applying request completions and out-of-band events), in-band message
//! dispatch, handshake-timeout expiry, inbound connection-request
//! processing, failed-connection notification, and disconnect reaping.

use std::collections::{BTreeSet, VecDeque};
use std::mem;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};
use fnv::FnvHashMap;
use slab::Slab;
use slog::Logger;

use connection::{Connection, ConnectionHandle, DisconnectCb, EstablishCb, State};
use provider::{
    ConnRequestId, EpId, ListenerId, Provider, ProviderEvent, Submit, WorkerId, REQUIRED_FEATURES,
};
use request::{Action, RecvCb, RequestHandle, Requests, SendCb};
use tag;
use {SetupError, Side, Status};

/// Engine parameters.
pub struct Config {
    /// Time allowed for the connection-id exchange to finish. Also bounds
    /// how long an unaccepted inbound connection request may wait before
    /// being rejected.
    pub connect_timeout: Duration,
    /// Size of the in-band message receive buffer.
    pub iomsg_buf_size: usize,
    /// Provider feature bits requested in addition to TAG|STREAM.
    pub optional_features: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            iomsg_buf_size: 4096,
            optional_features: 0,
        }
    }
}

/// User-overridable notification hooks, dispatched only from within
/// `progress`, never from inside a submission call.
pub trait WorkerHooks<P: Provider> {
    /// An inbound connection finished its handshake and is usable.
    fn on_accepted(&mut self, _worker: &mut Worker<P>, _conn: ConnectionHandle) {}
    /// An in-band message arrived on an established connection.
    fn on_iomsg(&mut self, _worker: &mut Worker<P>, _conn: ConnectionHandle, _msg: &[u8]) {}
    /// An established connection hit a peer error. Dispatched at most
    /// once per connection, on the tick after the provider reported it.
    fn on_error(&mut self, _worker: &mut Worker<P>, _conn: ConnectionHandle) {}
}

/// Hook bundle that ignores every notification.
pub struct NoHooks;

impl<P: Provider> WorkerHooks<P> for NoHooks {}

/// The main entry point to the library.
///
/// Owns the provider worker, the optional listener, the registry of live
/// connections, and the request slab. Everything mutates on the thread
/// that calls `progress`; no locks are taken anywhere.
pub struct Worker<P: Provider> {
    log: Logger,
    provider: P,
    worker: WorkerId,
    listener: Option<ListenerId>,
    config: Config,
    reqs: Requests,
    events: VecDeque<ProviderEvent>,
    conns: Slab<Connection>,
    by_id: FnvHashMap<u32, ConnectionHandle>,
    by_ep: FnvHashMap<EpId, ConnectionHandle>,
    /// Handshakes in flight, ordered by expiry deadline.
    handshaking: BTreeSet<(Instant, ConnectionHandle)>,
    /// Inbound connection requests with their arrival stamps, processed
    /// on the tick after they arrive so staleness is measured across
    /// ticks rather than within one.
    pending_accepts: VecDeque<(Instant, ConnRequestId)>,
    /// Server-side connections whose handshake finished, awaiting the
    /// `on_accepted` dispatch.
    accepted: VecDeque<ConnectionHandle>,
    /// Established connections whose endpoint failed, awaiting the
    /// `on_error` dispatch on the following tick.
    failed: VecDeque<ConnectionHandle>,
    /// Connections whose teardown is waiting for the endpoint close to
    /// finalize.
    disconnecting: VecDeque<ConnectionHandle>,
    /// The single long-lived in-band message receive.
    iomsg_req: Option<RequestHandle>,
    next_conn_id: u32,
}

impl<P: Provider> Worker<P> {
    pub fn new(log: Logger, mut provider: P, config: Config) -> Result<Self, SetupError> {
        provider
            .context_init(REQUIRED_FEATURES | config.optional_features)
            .map_err(SetupError::Context)?;
        let attrs = provider.query();
        if attrs.features & REQUIRED_FEATURES != REQUIRED_FEATURES {
            provider.context_cleanup();
            return Err(SetupError::Unsupported(
                REQUIRED_FEATURES & !attrs.features,
            ));
        }
        let worker = match provider.worker_create() {
            Ok(worker) => worker,
            Err(status) => {
                provider.context_cleanup();
                return Err(SetupError::Worker(status));
            }
        };
        let mut this = Self {
            log,
            provider,
            worker,
            listener: None,
            config,
            reqs: Requests::new(),
            events: VecDeque::new(),
            conns: Slab::new(),
            by_id: FnvHashMap::default(),
            by_ep: FnvHashMap::default(),
            handshaking: BTreeSet::new(),
            pending_accepts: VecDeque::new(),
            accepted: VecDeque::new(),
            failed: VecDeque::new(),
            disconnecting: VecDeque::new(),
            iomsg_req: None,
            next_conn_id: 1,
        };
        if let Err(status) = this.post_iomsg_recv() {
            return Err(SetupError::IomsgRecv(status));
        }
        Ok(this)
    }

    /// Start accepting inbound connections on `addr`.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<(), SetupError> {
        assert!(self.listener.is_none(), "listener already installed");
        let listener = self
            .provider
            .listener_create(self.worker, addr)
            .map_err(SetupError::Listener)?;
        debug!(self.log, "listening"; "addr" => addr.to_string());
        self.listener = Some(listener);
        Ok(())
    }

    /// Initiate a connection to `remote`. The outcome is reported through
    /// `establish_cb` exactly once, from a later `progress` call (or
    /// inline when endpoint creation itself fails).
    pub fn connect(
        &mut self,
        now: Instant,
        remote: SocketAddr,
        establish_cb: EstablishCb,
    ) -> ConnectionHandle {
        let conn_id = self.alloc_conn_id();
        let ch = self.add_connection(conn_id, Side::Client, Some(remote));
        debug!(self.conns[ch.0].log, "connecting");
        self.conns[ch.0].establish_cb = Some(establish_cb);
        match self.provider.ep_connect(self.worker, remote) {
            Ok(ep) => self.begin_handshake(now, ch, ep),
            Err(status) => {
                debug!(self.conns[ch.0].log, "endpoint creation failed"; "status" => %status);
                self.establish_failed(ch, status);
            }
        }
        ch
    }

    /// Accept an inbound connection request. Invoked by the engine itself
    /// for requests arriving on the listener; callable directly by
    /// applications that drain connection requests on their own.
    pub fn accept(
        &mut self,
        now: Instant,
        request: ConnRequestId,
        establish_cb: EstablishCb,
    ) -> ConnectionHandle {
        let remote = self.provider.conn_request_remote(request);
        let conn_id = self.alloc_conn_id();
        let ch = self.add_connection(conn_id, Side::Server, remote);
        debug!(self.conns[ch.0].log, "accepting");
        self.conns[ch.0].establish_cb = Some(establish_cb);
        match self.provider.ep_accept(self.worker, request) {
            Ok(ep) => self.begin_handshake(now, ch, ep),
            Err(status) => {
                debug!(self.conns[ch.0].log, "endpoint creation failed"; "status" => %status);
                self.establish_failed(ch, status);
            }
        }
        ch
    }

    /// Post a tagged send of `data` under sequence number `sn`. Returns
    /// false when the connection no longer admits submissions.
    pub fn send_data(
        &mut self,
        ch: ConnectionHandle,
        data: Bytes,
        sn: u32,
        cb: SendCb,
    ) -> bool {
        let (ep, tag) = match self.conns.get(ch.0) {
            Some(conn) if conn.can_submit() => (
                conn.ep.unwrap(),
                tag::data_tag(conn.remote_conn_id(), sn),
            ),
            _ => return false,
        };
        let submit = self.provider.tag_send(ep, data, tag, &mut self.reqs);
        self.complete_submit(ch, submit, Action::Send(cb));
        true
    }

    /// Post a tagged receive into `buf` for sequence number `sn`. The
    /// buffer travels back through the callback, truncated to the
    /// received length. Returns false when the connection no longer
    /// admits submissions.
    pub fn recv_data(
        &mut self,
        ch: ConnectionHandle,
        buf: BytesMut,
        sn: u32,
        cb: RecvCb,
    ) -> bool {
        let tag = match self.conns.get(ch.0) {
            Some(conn) if conn.can_submit() => tag::data_tag(conn.conn_id(), sn),
            _ => return false,
        };
        let submit = self
            .provider
            .tag_recv(self.worker, buf, tag, tag::TAG_MASK_FULL, &mut self.reqs);
        self.complete_submit(ch, submit, Action::Recv(cb));
        true
    }

    /// Post an in-band control message. Returns false when the connection
    /// no longer admits submissions.
    pub fn send_iomsg(&mut self, ch: ConnectionHandle, data: Bytes, cb: SendCb) -> bool {
        let (ep, tag) = match self.conns.get_mut(ch.0) {
            Some(conn) if conn.can_submit() => {
                let sn = conn.next_iomsg_sn();
                (conn.ep.unwrap(), tag::iomsg_tag(conn.remote_conn_id(), sn))
            }
            _ => return false,
        };
        let submit = self.provider.tag_send(ep, data, tag, &mut self.reqs);
        self.complete_submit(ch, submit, Action::Send(cb));
        true
    }

    /// Begin teardown. Every outstanding request is cancelled and will
    /// still see its callback (with a cancelled status); `disconnect_cb`
    /// fires once all of them have drained and the endpoint close has
    /// finalized. Calling this twice on one connection is a caller bug.
    pub fn disconnect(&mut self, ch: ConnectionHandle, disconnect_cb: DisconnectCb) {
        assert!(
            self.conns[ch.0].state != State::Disconnecting,
            "connection is already disconnecting"
        );
        debug!(self.conns[ch.0].log, "disconnecting");
        self.conns[ch.0].disconnect_cb = Some(disconnect_cb);
        if self.conns[ch.0].state == State::Handshaking {
            self.unqueue_handshake(ch);
            self.conns[ch.0].set_error(Status::Cancelled);
            if let Some(cb) = self.conns[ch.0].establish_cb.take() {
                cb(Status::Cancelled);
            }
        }
        self.teardown(ch);
    }

    /// Drive all outstanding communication. Returns whether anything made
    /// progress.
    pub fn progress<H: WorkerHooks<P>>(&mut self, now: Instant, hooks: &mut H) -> bool {
        let due_accepts = mem::replace(&mut self.pending_accepts, VecDeque::new());
        let due_failed = mem::replace(&mut self.failed, VecDeque::new());

        let mut active = self
            .provider
            .progress(self.worker, &mut self.reqs, &mut self.events);
        while let Some(req) = self.reqs.pop_ready() {
            active = true;
            self.finish_request(req);
        }
        while let Some(event) = self.events.pop_front() {
            active = true;
            match event {
                ProviderEvent::ConnRequest { request, .. } => {
                    trace!(self.log, "inbound connection request");
                    self.pending_accepts.push_back((now, request));
                }
                ProviderEvent::EndpointError { ep, status } => self.handle_ep_error(ep, status),
            }
        }

        self.progress_io_message(hooks);
        self.progress_timed_out_conns(now);
        self.progress_conn_requests(now, due_accepts, hooks);
        self.progress_failed_conns(due_failed, hooks);
        self.progress_disconnecting();
        active
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    pub fn connection(&self, ch: ConnectionHandle) -> Option<&Connection> {
        self.conns.get(ch.0)
    }

    /// Process-local id of `ch`.
    pub fn conn_id(&self, ch: ConnectionHandle) -> u32 {
        self.conns[ch.0].conn_id()
    }

    /// Peer-side id of `ch`; zero until established.
    pub fn remote_conn_id(&self, ch: ConnectionHandle) -> u32 {
        self.conns[ch.0].remote_conn_id()
    }

    pub fn remote_addr(&self, ch: ConnectionHandle) -> Option<SocketAddr> {
        self.conns[ch.0].remote
    }

    pub fn conn_status(&self, ch: ConnectionHandle) -> Status {
        self.conns[ch.0].status()
    }

    pub fn is_established(&self, ch: ConnectionHandle) -> bool {
        self.conns[ch.0].is_established()
    }

    fn alloc_conn_id(&mut self) -> u32 {
        let id = self.next_conn_id;
        self.next_conn_id = self
            .next_conn_id
            .checked_add(1)
            .expect("connection ids exhausted");
        id
    }

    fn add_connection(
        &mut self,
        conn_id: u32,
        side: Side,
        remote: Option<SocketAddr>,
    ) -> ConnectionHandle {
        let ch = {
            let entry = self.conns.vacant_entry();
            let ch = ConnectionHandle(entry.key());
            entry.insert(Connection::new(&self.log, ch, conn_id, side, remote));
            ch
        };
        self.by_id.insert(conn_id, ch);
        ch
    }

    /// Exchange connection ids over the endpoint's stream channel: learn
    /// the peer's id first so post-handshake traffic is routable, then
    /// announce ours. The announce has no completion observer of its own;
    /// a failure surfaces through the endpoint error callback.
    fn begin_handshake(&mut self, now: Instant, ch: ConnectionHandle, ep: EpId) {
        self.by_ep.insert(ep, ch);
        let conn_id = {
            let conn = &mut self.conns[ch.0];
            conn.ep = Some(ep);
            conn.conn_id()
        };

        let deadline = now + self.config.connect_timeout;
        self.conns[ch.0].deadline = Some(deadline);
        self.handshaking.insert((deadline, ch));

        let buf = BytesMut::with_capacity(4);
        match self.provider.stream_recv(ep, buf, &mut self.reqs) {
            Submit::Pending(req) => self.attach(req, Some(ch), Action::Handshake),
            Submit::Fail(status) => {
                self.establish_failed(ch, status);
                return;
            }
            Submit::Done => unreachable!("receives complete through their request slot"),
        }
        match self.conns.get(ch.0) {
            Some(conn) if conn.state == State::Handshaking || conn.state == State::Established => {}
            // The id receive failed during submission and tore us down.
            _ => return,
        }

        let mut idb = [0; 4];
        LittleEndian::write_u32(&mut idb, conn_id);
        match self.provider.stream_send(ep, Bytes::from(idb.to_vec()), &mut self.reqs) {
            Submit::Pending(req) => self.attach(req, Some(ch), Action::Send(Box::new(|_| ()))),
            Submit::Done => {}
            Submit::Fail(status) => {
                debug!(self.conns[ch.0].log, "id send failed"; "status" => %status);
            }
        }
    }

    /// Post-submission half of the completion race: if the provider
    /// finished the request during the submission call, dispatch it right
    /// here; otherwise attach the action and link the request to its
    /// connection for the completion path to find.
    fn attach(&mut self, req: RequestHandle, conn: Option<ConnectionHandle>, action: Action) {
        if self.reqs.get(req).completed {
            let r = self.reqs.free(req);
            self.dispatch_action(conn, action, r.status, r.len, r.buf);
        } else {
            {
                let r = self.reqs.get_mut(req);
                r.conn = conn;
                r.action = Some(action);
            }
            if let Some(ch) = conn {
                self.conns[ch.0].outstanding.insert(req);
            }
        }
    }

    fn complete_submit(&mut self, ch: ConnectionHandle, submit: Submit, action: Action) {
        match submit {
            Submit::Done => self.dispatch_action(Some(ch), action, Status::Ok, 0, None),
            Submit::Fail(status) => self.dispatch_action(Some(ch), action, status, 0, None),
            Submit::Pending(req) => self.attach(req, Some(ch), action),
        }
    }

    fn dispatch_action(
        &mut self,
        conn: Option<ConnectionHandle>,
        action: Action,
        status: Status,
        len: usize,
        buf: Option<BytesMut>,
    ) {
        match action {
            Action::Send(cb) => cb(status),
            Action::Recv(cb) => {
                let mut buf = buf.unwrap_or_else(BytesMut::new);
                buf.truncate(len);
                cb(status, buf)
            }
            Action::Handshake => {
                if let Some(ch) = conn {
                    self.handshake_done(ch, status, buf);
                }
            }
        }
    }

    /// Completion path for requests that went asynchronous: unlink,
    /// dispatch, and release the connection if this was the last thing
    /// holding its teardown open.
    fn finish_request(&mut self, req: RequestHandle) {
        let r = self.reqs.free(req);
        if let Some(ch) = r.conn {
            if let Some(conn) = self.conns.get_mut(ch.0) {
                conn.outstanding.remove(&req);
            }
        }
        if let Some(action) = r.action {
            self.dispatch_action(r.conn, action, r.status, r.len, r.buf);
        }
        if let Some(ch) = r.conn {
            self.maybe_release(ch);
        }
    }

    fn handshake_done(&mut self, ch: ConnectionHandle, status: Status, buf: Option<BytesMut>) {
        match self.conns.get(ch.0) {
            Some(conn) if conn.state == State::Handshaking => {}
            // Cancelled during teardown; the establish callback has
            // already fired.
            _ => return,
        }
        if status.is_err() {
            self.establish_failed(ch, status);
            return;
        }
        let buf = buf.expect("id exchange completed without a buffer");
        debug_assert_eq!(buf.len(), 4);
        let remote_id = LittleEndian::read_u32(&buf);
        if remote_id == 0 {
            debug!(self.conns[ch.0].log, "peer announced a zero connection id");
            self.establish_failed(ch, Status::EndpointFailed);
            return;
        }
        self.unqueue_handshake(ch);
        self.conns[ch.0].set_established(remote_id);
        trace!(self.conns[ch.0].log, "established"; "remote_conn_id" => remote_id);
        if let Some(cb) = self.conns[ch.0].establish_cb.take() {
            cb(Status::Ok);
        }
        if self.conns[ch.0].side == Side::Server {
            self.accepted.push_back(ch);
        }
    }

    /// Handshake-phase failure: the connection was never established from
    /// the caller's viewpoint, so the outcome goes to `establish_cb` (the
    /// error hook stays silent) and the engine tears the record down
    /// itself.
    fn establish_failed(&mut self, ch: ConnectionHandle, status: Status) {
        self.unqueue_handshake(ch);
        self.conns[ch.0].set_error(status);
        if let Some(cb) = self.conns[ch.0].establish_cb.take() {
            cb(status);
        }
        self.teardown(ch);
    }

    /// Shared teardown: cancel outstanding requests, force-close the
    /// endpoint, and queue the record for release once drained.
    fn teardown(&mut self, ch: ConnectionHandle) {
        self.conns[ch.0].state = State::Disconnecting;
        let outstanding: Vec<RequestHandle> =
            self.conns[ch.0].outstanding.iter().cloned().collect();
        for req in outstanding {
            self.provider.request_cancel(self.worker, req);
        }
        if let Some(ep) = self.conns[ch.0].ep.take() {
            self.by_ep.remove(&ep);
            match self.provider.ep_close(ep, true, &mut self.reqs) {
                Submit::Pending(req) => self.conns[ch.0].close_req = Some(req),
                Submit::Done => {}
                Submit::Fail(status) => {
                    debug!(self.conns[ch.0].log, "endpoint close failed"; "status" => %status);
                }
            }
        }
        self.maybe_release(ch);
    }

    fn maybe_release(&mut self, ch: ConnectionHandle) {
        let ready = match self.conns.get(ch.0) {
            Some(conn) => {
                conn.state == State::Disconnecting
                    && conn.outstanding.is_empty()
                    && !conn.reap_queued
            }
            None => false,
        };
        if ready {
            self.conns[ch.0].reap_queued = true;
            self.disconnecting.push_back(ch);
        }
    }

    fn unqueue_handshake(&mut self, ch: ConnectionHandle) {
        if let Some(deadline) = self.conns[ch.0].deadline.take() {
            self.handshaking.remove(&(deadline, ch));
        }
    }

    fn handle_ep_error(&mut self, ep: EpId, status: Status) {
        let ch = match self.by_ep.get(&ep) {
            Some(&ch) => ch,
            None => {
                trace!(self.log, "error on unknown endpoint"; "status" => %status);
                return;
            }
        };
        let (first, established) = {
            let conn = &mut self.conns[ch.0];
            (conn.set_error(status), conn.is_established())
        };
        if !first {
            return;
        }
        debug!(self.conns[ch.0].log, "endpoint failed"; "status" => %status);
        if established {
            self.failed.push_back(ch);
        } else {
            self.establish_failed(ch, status);
        }
    }

    /// The single in-band receive: always reposted after dispatch so
    /// exactly one is outstanding between init and teardown. A failed
    /// post leaves the receive unarmed; the in-band phase re-arms it on
    /// the next tick.
    fn post_iomsg_recv(&mut self) -> Result<(), Status> {
        debug_assert!(self.iomsg_req.is_none());
        let buf = BytesMut::with_capacity(self.config.iomsg_buf_size);
        match self
            .provider
            .tag_recv(self.worker, buf, tag::IOMSG_BIT, tag::IOMSG_BIT, &mut self.reqs)
        {
            Submit::Pending(req) => {
                self.iomsg_req = Some(req);
                Ok(())
            }
            Submit::Fail(status) => Err(status),
            Submit::Done => unreachable!("receives complete through their request slot"),
        }
    }

    fn repost_iomsg(&mut self, req: RequestHandle) {
        self.reqs.free(req);
        self.iomsg_req = None;
        if let Err(status) = self.post_iomsg_recv() {
            warn!(self.log, "failed to repost in-band receive"; "status" => %status);
        }
    }

    fn progress_io_message<H: WorkerHooks<P>>(&mut self, hooks: &mut H) {
        let req = match self.iomsg_req {
            Some(req) => req,
            None => {
                // A previous post failed; try to restore the receive.
                if let Err(status) = self.post_iomsg_recv() {
                    debug!(self.log, "in-band receive still failing to post"; "status" => %status);
                }
                return;
            }
        };
        if !self.reqs.get(req).completed {
            return;
        }
        let (status, sender) = {
            let r = self.reqs.get(req);
            (r.status, tag::iomsg_conn_id(r.sender_tag))
        };
        if status.is_err() {
            warn!(self.log, "in-band receive failed"; "status" => %status);
            self.repost_iomsg(req);
            return;
        }
        let ch = match self.by_id.get(&sender) {
            Some(&ch) => ch,
            None => {
                debug!(self.log, "dropping in-band message from unknown connection";
                       "conn_id" => sender);
                self.repost_iomsg(req);
                return;
            }
        };
        if !self.conns[ch.0].is_established() {
            // Sender is known but its handshake has not finished; leave
            // the message parked and look again next tick.
            return;
        }
        let r = self.reqs.free(req);
        self.iomsg_req = None;
        let mut buf = r.buf.unwrap_or_else(BytesMut::new);
        buf.truncate(r.len);
        trace!(self.conns[ch.0].log, "in-band message"; "len" => r.len);
        hooks.on_iomsg(self, ch, &buf);
        if let Err(status) = self.post_iomsg_recv() {
            warn!(self.log, "failed to repost in-band receive"; "status" => %status);
        }
    }

    fn progress_timed_out_conns(&mut self, now: Instant) {
        loop {
            let expired = {
                match self.handshaking.iter().next() {
                    Some(&(deadline, ch)) if deadline <= now => Some(ch),
                    _ => None,
                }
            };
            let ch = match expired {
                Some(ch) => ch,
                None => break,
            };
            debug!(self.conns[ch.0].log, "handshake timed out");
            self.establish_failed(ch, Status::TimedOut);
        }
    }

    fn progress_conn_requests<H: WorkerHooks<P>>(
        &mut self,
        now: Instant,
        mut due: VecDeque<(Instant, ConnRequestId)>,
        hooks: &mut H,
    ) {
        while let Some((arrived, request)) = due.pop_front() {
            if now.duration_since(arrived) > self.config.connect_timeout {
                debug!(self.log, "rejecting stale connection request");
                self.provider.listener_reject(request);
                continue;
            }
            self.accept(now, request, Box::new(|_| ()));
        }
        while let Some(ch) = self.accepted.pop_front() {
            let live = self
                .conns
                .get(ch.0)
                .map_or(false, |conn| conn.state == State::Established);
            if live {
                hooks.on_accepted(self, ch);
            }
        }
    }

    fn progress_failed_conns<H: WorkerHooks<P>>(
        &mut self,
        mut due: VecDeque<ConnectionHandle>,
        hooks: &mut H,
    ) {
        while let Some(ch) = due.pop_front() {
            // A connection the user already started disconnecting, or one
            // released meanwhile, gets no error dispatch.
            let live = self
                .conns
                .get(ch.0)
                .map_or(false, |conn| conn.state == State::Errored);
            if live {
                hooks.on_error(self, ch);
            }
        }
    }

    fn progress_disconnecting(&mut self) {
        let mut waiting = VecDeque::new();
        while let Some(ch) = self.disconnecting.pop_front() {
            let close_done = match self.conns[ch.0].close_req {
                Some(req) => self.reqs.check_status(req) != Status::InProgress,
                None => true,
            };
            if !close_done {
                waiting.push_back(ch);
                continue;
            }
            if let Some(req) = self.conns[ch.0].close_req.take() {
                self.reqs.free(req);
            }
            if let Some(cb) = self.conns[ch.0].disconnect_cb.take() {
                cb(Status::Ok);
            }
            self.remove_connection(ch);
        }
        self.disconnecting = waiting;
    }

    /// Removing a connection that is already gone is a no-op.
    fn remove_connection(&mut self, ch: ConnectionHandle) {
        if self.conns.get(ch.0).is_none() {
            return;
        }
        let conn = self.conns.remove(ch.0);
        debug_assert!(
            conn.outstanding.is_empty(),
            "connection released with requests in flight"
        );
        self.by_id.remove(&conn.conn_id());
        if let Some(ep) = conn.ep {
            self.by_ep.remove(&ep);
        }
        if let Some(deadline) = conn.deadline {
            self.handshaking.remove(&(deadline, ch));
        }
        trace!(conn.log, "released");
    }
}

impl<P: Provider> Drop for Worker<P> {
    fn drop(&mut self) {
        if let Some(req) = self.iomsg_req.take() {
            self.provider.request_cancel(self.worker, req);
        }
        if let Some(listener) = self.listener.take() {
            self.provider.listener_destroy(listener);
        }
        self.provider.worker_destroy(self.worker);
        self.provider.context_cleanup();
    }
}
