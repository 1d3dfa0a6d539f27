//! Connection and progress engine for tagged-message transports.
//!
//! This library performs no I/O of its own. It sits above a [`Provider`] —
//! a thin capability surface over an RDMA-style transport exposing
//! endpoints, tagged messages, stream channels and request completions —
//! and turns that polling-driven interface into a connection abstraction
//! with lifecycle management, timeout-driven establishment, in-band
//! control messages, and disciplined cancellation of in-flight
//! operations.
//!
//! One [`Worker`] is one cooperative single-threaded progress context.
//! Every user-visible operation either completes inline or returns
//! immediately; observable completion happens later, through a callback,
//! from within some future call to [`Worker::progress`]. The engine never
//! spawns threads and never takes locks on its own state.
//!
//! [`Provider`]: trait.Provider.html
//! [`Worker`]: struct.Worker.html
//! [`Worker::progress`]: struct.Worker.html#method.progress

extern crate byteorder;
extern crate bytes;
#[macro_use]
extern crate failure;
extern crate fnv;
extern crate slab;
#[macro_use]
extern crate slog;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
#[cfg(test)]
extern crate slog_term;

use std::fmt;

mod connection;
mod provider;
mod request;
mod tag;
mod worker;


pub use connection::{Connection, ConnectionHandle, DisconnectCb, EstablishCb, State};
pub use provider::{
    ConnRequestId, EpId, ListenerId, Provider, ProviderAttrs, ProviderEvent, Submit, WorkerId,
    FEATURE_AMO32, FEATURE_AMO64, FEATURE_RMA, FEATURE_STREAM, FEATURE_TAG, FEATURE_WAKEUP,
    REQUIRED_FEATURES,
};
pub use request::{Action, RecvCb, Request, RequestHandle, Requests, SendCb};
pub use tag::{
    data_tag, iomsg_conn_id, iomsg_tag, is_iomsg, tag_conn_id, tag_sn, Tag, IOMSG_BIT,
    TAG_MASK_FULL,
};
pub use worker::{Config, NoHooks, Worker, WorkerHooks};

/// Which side initiated a connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Side {
    Client,
    Server,
}

/// Completion status carried by requests and connections.
///
/// Statuses are values, not `Err` types: they flow through completion
/// callbacks and connection records. `Ok` and `InProgress` are the two
/// non-error kinds; everything else is terminal for the operation (and,
/// on a connection, sticky).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Ok,
    InProgress,
    TimedOut,
    Cancelled,
    PeerClosed,
    EndpointFailed,
    BadAddress,
    OutOfResources,
    Unsupported,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn is_err(self) -> bool {
        match self {
            Status::Ok | Status::InProgress => false,
            _ => true,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Status::Ok => "ok",
            Status::InProgress => "operation in progress",
            Status::TimedOut => "timed out",
            Status::Cancelled => "cancelled",
            Status::PeerClosed => "closed by peer",
            Status::EndpointFailed => "endpoint failed",
            Status::BadAddress => "bad address",
            Status::OutOfResources => "out of resources",
            Status::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by fallible setup paths.
#[derive(Debug, Fail)]
pub enum SetupError {
    #[fail(display = "failed to initialize provider context: {}", _0)]
    Context(Status),
    #[fail(display = "failed to create worker: {}", _0)]
    Worker(Status),
    #[fail(display = "failed to create listener: {}", _0)]
    Listener(Status),
    #[fail(display = "failed to post the in-band receive: {}", _0)]
    IomsgRecv(Status),
    #[fail(display = "provider lacks required feature bits {:#x}", _0)]
    Unsupported(u64),
}
