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

//! Illustrative reference byte-stream driver: a reader/writer worker pair
//! showing how a concrete transport drives the core engine. Generic over an
//! `AsyncRead`/`AsyncWrite` half so it runs equally against a real socket or an
//! in-memory `tokio::io::duplex` pair in tests - standing up a TCP listener is
//! out of scope for the engine itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use ii_async_utils::HaltHandle;
use ii_logging::{error, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::marshaller::OutgoingMessage;
use crate::transport::{Transport, TransportHandle};

/// Default interval the writer worker waits on an empty send queue before looping
/// back to check for cancellation.
const WRITER_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default period of inactivity after which a server-side connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawns the reader worker: reads LF-terminated lines from `reader`, trims and
/// ignores empty ones, and for each non-empty line snapshots the transport's current
/// state's marshaller, parses the line, and dispatches the result. On end-of-stream,
/// a malformed line, or an I/O error, closes the transport and returns (reference
/// policy: stream resynchronisation after arbitrary garbage is unsafe).
///
/// `on_line` is invoked after a line is successfully parsed and dispatched - the
/// server-side reference wiring uses it to reset a `ConnectionRegistry` entry's
/// idle timer.
pub fn spawn_reader<R>(
    halt: &HaltHandle,
    transport: Arc<Transport>,
    reader: R,
    on_line: impl Fn() + Send + Sync + 'static,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    halt.spawn(move |tripwire| async move {
        let lines = FramedRead::new(reader, LinesCodec::new());
        let mut lines = lines.take_until(tripwire);

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!("I/O error reading transport: {}", err);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let state = transport.current_state();
            let parse_result = match &state {
                Some(state) => state.marshaller().parse_line(line),
                None => {
                    error!("line received on a detached transport: {}", line);
                    break;
                }
            };

            match parse_result {
                Ok(messages) => {
                    transport.receive_messages(messages);
                    on_line();
                }
                Err(err) => {
                    error!("malformed message, closing connection: {}", err);
                    break;
                }
            }
        }

        transport.close();
    });
}

/// Spawns the writer worker: dequeues messages from the unbounded send queue (the
/// reference implementation's choice, per spec), snapshots the current state's
/// marshaller, serialises, writes the line with a single LF terminator, and flushes.
/// The queue poll is time-bounded so the worker observes transport closure (the
/// tripwire) without blocking indefinitely.
pub fn spawn_writer<W>(
    halt: &HaltHandle,
    transport: Arc<Transport>,
    writer: W,
    mut outbound: mpsc::UnboundedReceiver<OutgoingMessage>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    halt.spawn(move |mut tripwire| async move {
        let mut sink = FramedWrite::new(writer, LinesCodec::new());

        loop {
            tokio::select! {
                _ = &mut tripwire => break,
                received = tokio::time::timeout(WRITER_POLL_INTERVAL, outbound.recv()) => {
                    match received {
                        Ok(Some(message)) => {
                            let line = match transport.current_state() {
                                Some(state) => state.marshaller().unmarshal(&message),
                                None => {
                                    error!("dropping outbound message on a detached transport");
                                    continue;
                                }
                            };
                            if let Err(err) = sink.send(line).await {
                                error!("I/O error writing transport: {}", err);
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => continue,
                    }
                }
            }
        }

        transport.close();
    });
}

/// An opaque, server-side connection identifier minted by a `ConnectionRegistry` at
/// accept time.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct ConnectionId(u64);

/// Reference implementation of the idle-eviction collaborator described in the
/// engine's I/O driver section: caches accepted transports keyed by `ConnectionId`
/// and evicts (closing) any that have seen no inbound message for `idle_timeout`.
/// Generic over nothing beyond `Transport` itself - it is not wired to any concrete
/// socket library.
pub struct ConnectionRegistry {
    entries: Arc<DashMap<ConnectionId, (Arc<Transport>, Instant)>>,
    idle_timeout: Duration,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            idle_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a freshly accepted transport and returns the identifier minted for
    /// it. The caller is expected to call `touch` on every subsequently parsed line
    /// (the reference reader worker's `on_line` callback does this).
    pub fn insert(&self, transport: Arc<Transport>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.insert(id, (transport, Instant::now()));
        id
    }

    /// Resets `id`'s inactivity timer. Called on every inbound message, not merely on
    /// lookup - a read alone must not be mistaken for activity.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.1 = Instant::now();
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Transport>> {
        self.entries.get(id).map(|entry| entry.0.clone())
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Transport>> {
        self.entries.remove(id).map(|(_, (transport, _))| transport)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts and closes every transport idle for at least `idle_timeout`.
    pub fn sweep(&self) {
        let now = Instant::now();
        let idle: Vec<ConnectionId> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.value().1) >= self.idle_timeout)
            .map(|entry| *entry.key())
            .collect();

        for id in idle {
            if let Some((_, (transport, _))) = self.entries.remove(&id) {
                info!("evicting idle connection");
                transport.close();
            }
        }
    }

    pub fn spawn_sweeper(self: &Arc<Self>, halt: &HaltHandle, sweep_interval: Duration) {
        let registry = self.clone();
        halt.spawn(move |tripwire| async move {
            let mut interval = tokio::time::interval(sweep_interval);
            let mut tripwire = tripwire;
            loop {
                tokio::select! {
                    _ = interval.tick() => registry.sweep(),
                    _ = &mut tripwire => break,
                }
            }
        });
    }

    pub fn spawn_default_sweeper(self: &Arc<Self>, halt: &HaltHandle) {
        self.spawn_sweeper(halt, DEFAULT_SWEEP_INTERVAL)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::correlation::CorrelationTable;
    use crate::dispatch::test_utils::Subscribe;
    use crate::identifier::Identifier;
    use crate::message::Request;
    use crate::state::ConnectionState;
    use std::convert::TryFrom;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn new_state() -> Arc<ConnectionState> {
        Arc::new(ConnectionState::new("test", Arc::new(CorrelationTable::new())))
    }

    #[tokio::test]
    async fn reader_and_writer_round_trip_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let halt = HaltHandle::new();

        // Server side: dispatches a received subscribe request.
        let (server_out_tx, server_out_rx) = mpsc::unbounded_channel();
        let server_transport = Transport::new(server_out_tx);
        let server_state = new_state();
        let received = Arc::new(AtomicBool::new(false));
        {
            let received = received.clone();
            server_state
                .register_request_handler::<Subscribe, _>(
                    move |_, _| received.store(true, Ordering::SeqCst),
                    false,
                )
                .unwrap();
        }
        server_transport.set_state(server_state);
        spawn_reader(&halt, server_transport.clone(), server_read, || {});
        spawn_writer(&halt, server_transport.clone(), server_write, server_out_rx);

        // Client side: just needs a state so the writer can snapshot a marshaller.
        let (client_out_tx, client_out_rx) = mpsc::unbounded_channel();
        let client_transport = Transport::new(client_out_tx);
        client_transport.set_state(new_state());
        spawn_reader(&halt, client_transport.clone(), client_read, || {});
        spawn_writer(&halt, client_transport.clone(), client_write, client_out_rx);

        use crate::transport::TransportHandle;
        client_transport
            .send_request(Request::new(
                Some(Identifier::try_from("1").unwrap()),
                "mining.subscribe",
                vec![serde_json::json!("cgminer")],
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(received.load(Ordering::SeqCst));

        halt.ready();
        client_transport.close();
        server_transport.close();
        halt.halt();
        let _ = halt.join(Some(Duration::from_secs(1))).await;
    }

    #[test]
    fn registry_touch_resets_idle_timer_and_sweep_closes_untouched() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = Transport::new(tx);
        let registry = ConnectionRegistry::with_idle_timeout(Duration::from_millis(0));
        let id = registry.insert(transport.clone());

        registry.sweep();
        assert!(registry.get(&id).is_none());
        assert!(transport.is_closed());
    }

    #[test]
    fn registry_get_and_remove() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = Transport::new(tx);
        let registry = ConnectionRegistry::new();
        let id = registry.insert(transport.clone());
        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
    }
}
