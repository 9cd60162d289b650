//! The round trip to the authority.
//!
//! The core never performs I/O itself. It hands a payload and a one-shot
//! [`Reply`] to a [`Transport`] and expects the reply to be invoked at most
//! once, eventually. Timeouts are the transport's concern.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    FutureExt, Stream, StreamExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::variable::Reply;


/// Sends payloads to the authority.
pub trait Transport {
    fn send(&self, payload: Value, reply: Reply);
}

impl<F: Fn(Value, Reply)> Transport for F {
    fn send(&self, payload: Value, reply: Reply) {
        self(payload, reply)
    }
}

/// Transport that drops every request. The reply is never invoked.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

impl Transport for Offline {
    fn send(&self, payload: Value, _reply: Reply) {
        tracing::trace!(%payload, "offline; request dropped");
    }
}

/// An authoritative state snapshot with the version it reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityPush {
    pub state: Value,
    pub version: u64,
}

impl AuthorityPush {
    pub fn new(state: Value, version: u64) -> Self {
        Self { state, version }
    }

    /// Interpret a reply payload as a push. Returns `None` for bare acknowledgements.
    pub fn from_reply(reply: &Value) -> Option<Self> {
        if reply.get("state").is_none() {
            return None;
        }
        Self::deserialize(reply).ok()
    }
}

/// A request waiting for the authority.
pub struct Request {
    pub payload: Value,
    reply: Reply,
}

impl Request {
    /// Deliver the authority's answer.
    pub fn reply(self, value: Value) {
        (self.reply)(value)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Transport that queues requests on a channel for the host to service.
#[derive(Clone)]
pub struct ChannelTransport(UnboundedSender<Request>);

impl ChannelTransport {
    pub fn new() -> (Self, Requests) {
        let (tx, rx) = unbounded();
        (Self(tx), Requests(rx))
    }
}

impl Transport for ChannelTransport {
    fn send(&self, payload: Value, reply: Reply) {
        if let Err(e) = self.0.unbounded_send(Request { payload, reply }) {
            tracing::debug!(payload = %e.into_inner().payload, "request channel closed");
        }
    }
}

/// Receiving side of a [`ChannelTransport`].
pub struct Requests(UnboundedReceiver<Request>);

impl Requests {
    /// Take the next queued request without waiting.
    pub fn try_recv(&mut self) -> Option<Request> {
        self.0.next().now_or_never().flatten()
    }

    /// Take every queued request without waiting.
    pub fn drain(&mut self) -> Vec<Request> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for Requests {
    type Item = Request;
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}
