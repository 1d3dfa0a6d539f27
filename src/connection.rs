//! Connection state machine.
//!
//! A connection wraps one provider endpoint and owns every request sent or
//! received through it. Its lifetime is driven entirely by the worker that
//! created it: the id exchange that makes tagged traffic routable, error
//! bookkeeping, and the drain-then-release teardown all happen from within
//! `Worker::progress`.

use std::net::SocketAddr;
use std::time::Instant;

use fnv::FnvHashSet;
use slog::Logger;

use provider::EpId;
use request::RequestHandle;
use {Side, Status};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnectionHandle(pub usize);

impl From<ConnectionHandle> for usize {
    fn from(x: ConnectionHandle) -> usize {
        x.0
    }
}

/// One-shot callback reporting the outcome of connection establishment.
pub type EstablishCb = Box<FnOnce(Status)>;

/// One-shot callback reporting that a disconnect has finalized.
pub type DisconnectCb = Box<FnOnce(Status)>;

/// Connection lifecycle.
///
/// `Handshaking` covers the window between endpoint creation and the
/// completion of the connection-id exchange. Errors before that completion
/// report through the establish callback and the record is torn down by
/// the engine; errors after it surface through the worker's failed queue.
/// `Disconnecting` ends with the record being dropped, so there is no
/// released state to observe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum State {
    Handshaking,
    Established,
    Errored,
    Disconnecting,
}

pub struct Connection {
    pub log: Logger,
    pub handle: ConnectionHandle,
    conn_id: u32,
    remote_conn_id: u32,
    pub side: Side,
    pub state: State,
    status: Status,
    pub ep: Option<EpId>,
    pub remote: Option<SocketAddr>,
    pub establish_cb: Option<EstablishCb>,
    pub disconnect_cb: Option<DisconnectCb>,
    /// Async endpoint-close request, polled during disconnect reaping.
    pub close_req: Option<RequestHandle>,
    /// Requests currently in flight on this connection.
    pub outstanding: FnvHashSet<RequestHandle>,
    /// Handshake deadline; present exactly while queued for expiry.
    pub deadline: Option<Instant>,
    /// Already queued for release once drained.
    pub reap_queued: bool,
    iomsg_sn: u32,
}

impl Connection {
    pub fn new(
        log: &Logger,
        handle: ConnectionHandle,
        conn_id: u32,
        side: Side,
        remote: Option<SocketAddr>,
    ) -> Self {
        debug_assert!(conn_id != 0);
        let peer = match remote {
            Some(addr) => addr.to_string(),
            None => "?".to_owned(),
        };
        Connection {
            log: log.new(o!("conn" => conn_id, "peer" => peer)),
            handle,
            conn_id,
            remote_conn_id: 0,
            side,
            state: State::Handshaking,
            status: Status::InProgress,
            ep: None,
            remote,
            establish_cb: None,
            disconnect_cb: None,
            close_req: None,
            outstanding: FnvHashSet::default(),
            deadline: None,
            reap_queued: false,
            iomsg_sn: 0,
        }
    }

    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    /// Peer's connection id; zero until the handshake finishes.
    pub fn remote_conn_id(&self) -> u32 {
        self.remote_conn_id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_established(&self) -> bool {
        self.remote_conn_id != 0
    }

    /// Whether new sends and receives may be admitted.
    pub fn can_submit(&self) -> bool {
        self.state == State::Established && self.ep.is_some()
    }

    pub fn set_established(&mut self, remote_conn_id: u32) {
        debug_assert!(remote_conn_id != 0);
        debug_assert_eq!(self.state, State::Handshaking);
        self.remote_conn_id = remote_conn_id;
        self.state = State::Established;
        self.status = Status::Ok;
    }

    /// Record a terminal failure. The first error wins; returns whether
    /// this call was it. A connection already mid-disconnect keeps its
    /// state so the teardown machinery is not restarted.
    pub fn set_error(&mut self, status: Status) -> bool {
        debug_assert!(status.is_err());
        if self.status.is_err() {
            return false;
        }
        self.status = status;
        if self.state != State::Disconnecting {
            self.state = State::Errored;
        }
        true
    }

    pub fn next_iomsg_sn(&mut self) -> u32 {
        let sn = self.iomsg_sn;
        self.iomsg_sn = self.iomsg_sn.wrapping_add(1);
        sn
    }
}
