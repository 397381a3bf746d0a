// Copyright (C) 2021  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! The stateful transport: a façade combining a current connection state with
//! listener registration and the send primitives handlers use. `TransportHandle`
//! is the object-safe view handlers receive - no generic methods, so it can be
//! passed around as `&dyn TransportHandle`.
//!
//! The coarse transport mutex is a plain `std::sync::Mutex`, not a `tokio::sync`
//! one: every critical section here is a pointer swap or clone, never spanning an
//! `.await`, so an async mutex would only add a suspension point nothing needs.
//! This also keeps `TransportHandle`'s methods synchronous, which object safety for
//! `&dyn TransportHandle` requires anyway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ii_logging::warn;
use tokio::sync::mpsc;

use crate::dispatch::ResponseShape;
use crate::error::{Error, Result};
use crate::marshaller::{OutgoingMessage, ParsedMessage};
use crate::message::{Request, Response};
use crate::state::ConnectionState;

/// Identifies a registered listener for later unregistration.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct ListenerId(u64);

pub type RequestListener = Arc<dyn Fn(&Request) + Send + Sync>;
pub type ResponseListener = Arc<dyn Fn(&Response) + Send + Sync>;

/// The object-safe view of a transport exposed to request/response handlers.
pub trait TransportHandle: Send + Sync {
    fn send_request(&self, request: Request) -> Result<()>;
    fn send_request_expecting(&self, request: Request, expected: ResponseShape) -> Result<()>;
    fn send_response(&self, response: Response) -> Result<()>;
    /// No-op for direct (e.g. TCP) transports; a polled transport implementation emits
    /// the distinguished poll request instead.
    fn poll_for_messages(&self) -> Result<()>;
    fn move_to_state(&self, next: Arc<ConnectionState>) -> Result<()>;
    fn close(&self);
}

struct ListenerSet<F> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, F)>>,
}

impl<F: Clone> ListenerSet<F> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, listener: F) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .expect("BUG: poisoned listener lock")
            .push((id, listener));
        id
    }

    fn unregister(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("BUG: poisoned listener lock")
            .retain(|(existing, _)| *existing != id);
    }

    fn snapshot(&self) -> Vec<F> {
        self.listeners
            .lock()
            .expect("BUG: poisoned listener lock")
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }
}

/// Guarded by the transport's coarse mutex: the current connection state reference.
/// `set_state`/the reader's line-parsing both take this lock, guaranteeing the state
/// used to parse the next line is whichever `set_state` last installed.
struct Inner {
    state: Option<Arc<ConnectionState>>,
}

/// A connected, stateful transport. Generic over nothing but an outbound message
/// queue - the reference driver (`driver` module) is what actually owns a byte
/// channel; `Transport` itself only needs somewhere to send serialised lines.
pub struct Transport {
    inner: Mutex<Inner>,
    request_listeners: ListenerSet<RequestListener>,
    response_listeners: ListenerSet<ResponseListener>,
    outbound: mpsc::UnboundedSender<OutgoingMessage>,
    closed: std::sync::atomic::AtomicBool,
}

impl Transport {
    /// Builds a transport bound to an outbound queue; the driver's writer worker reads
    /// from the paired receiver. The transport starts detached (`current_state` is
    /// `None`) until `set_state` installs the post-connect state.
    pub fn new(outbound: mpsc::UnboundedSender<OutgoingMessage>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { state: None }),
            request_listeners: ListenerSet::new(),
            response_listeners: ListenerSet::new(),
            outbound,
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn current_state(&self) -> Option<Arc<ConnectionState>> {
        self.inner.lock().expect("BUG: poisoned transport lock").state.clone()
    }

    /// If `next` is already the current state, a no-op. Otherwise calls
    /// `current.end()` (if any), installs `next`, then calls `next.start()`.
    pub fn set_state(&self, next: Arc<ConnectionState>) {
        let mut inner = self.inner.lock().expect("BUG: poisoned transport lock");
        if let Some(current) = &inner.state {
            if Arc::ptr_eq(current, &next) {
                return;
            }
            current.end();
        }
        next.start();
        inner.state = Some(next);
    }

    pub fn register_request_listener(&self, listener: RequestListener) -> ListenerId {
        self.request_listeners.register(listener)
    }

    pub fn unregister_request_listener(&self, id: ListenerId) {
        self.request_listeners.unregister(id)
    }

    pub fn register_response_listener(&self, listener: ResponseListener) -> ListenerId {
        self.response_listeners.register(listener)
    }

    pub fn unregister_response_listener(&self, id: ListenerId) {
        self.response_listeners.unregister(id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Dispatches one line's worth of already-parsed messages, in wire order, to the
    /// registered broadcast listeners and then to the current state's handler tables.
    pub fn receive_messages(&self, messages: Vec<ParsedMessage>) {
        let state = self.current_state();

        for message in messages {
            match message {
                ParsedMessage::Poll => {}
                ParsedMessage::Request {
                    generic,
                    type_id,
                    body,
                } => {
                    for listener in self.request_listeners.snapshot() {
                        listener(&generic);
                    }
                    match &state {
                        Some(state) if state.process_request(type_id, &body, self) => {}
                        Some(state) => warn!(
                            "unhandled request method '{}' in state '{}'",
                            generic.method().unwrap_or("<poll>"),
                            state.name()
                        ),
                        None => warn!("request received on a detached transport"),
                    }
                }
                ParsedMessage::Response {
                    generic,
                    shape,
                    body,
                } => {
                    for listener in self.response_listeners.snapshot() {
                        listener(&generic);
                    }
                    match &state {
                        Some(state) if state.process_response(shape.type_id, &body, self) => {}
                        Some(_) => warn!(
                            "unhandled response of shape '{}' for id {}",
                            shape.type_name(),
                            generic.id()
                        ),
                        None => warn!("response received on a detached transport"),
                    }
                }
            }
        }
    }

    fn enqueue(&self, message: OutgoingMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::invalid_state("transport is closed"));
        }
        self.outbound
            .send(message)
            .map_err(|_| Error::invalid_state("transport's writer worker has exited"))
    }
}

impl TransportHandle for Transport {
    fn send_request(&self, request: Request) -> Result<()> {
        self.enqueue(OutgoingMessage::Request(request))
    }

    fn send_request_expecting(&self, request: Request, expected: ResponseShape) -> Result<()> {
        let id = request.id().cloned().ok_or_else(|| {
            Error::invalid_argument("a request with an expected response must carry an id")
        })?;

        // Registration must be visible before the line reaches the wire, otherwise a
        // fast peer's reply could arrive and be rejected as unsolicited.
        let state = self
            .current_state()
            .ok_or_else(|| Error::invalid_state("transport is not connected"))?;
        state.marshaller().correlation().register(id, expected)?;

        self.enqueue(OutgoingMessage::Request(request))
    }

    fn send_response(&self, response: Response) -> Result<()> {
        self.enqueue(OutgoingMessage::Response(response))
    }

    fn poll_for_messages(&self) -> Result<()> {
        Ok(())
    }

    fn move_to_state(&self, next: Arc<ConnectionState>) -> Result<()> {
        self.set_state(next);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// A `TransportHandle` that discards everything. Used by unit tests that only
    /// need to satisfy the trait bound, not observe the send side.
    pub struct NullTransportHandle;

    impl TransportHandle for NullTransportHandle {
        fn send_request(&self, _request: Request) -> Result<()> {
            Ok(())
        }
        fn send_request_expecting(
            &self,
            _request: Request,
            _expected: ResponseShape,
        ) -> Result<()> {
            Ok(())
        }
        fn send_response(&self, _response: Response) -> Result<()> {
            Ok(())
        }
        fn poll_for_messages(&self) -> Result<()> {
            Ok(())
        }
        fn move_to_state(&self, _next: Arc<ConnectionState>) -> Result<()> {
            Ok(())
        }
        fn close(&self) {}
    }
}
