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

//! End-to-end scenarios driving the engine through its public surface: a
//! connection state with registered handlers, a transport, and literal wire
//! lines fed through the marshaller.

use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use stratum_proto::correlation::{CorrelationTable, ExpiryCallback};
use stratum_proto::dispatch::{RequestBody, ResponseBody, ResponseShape};
use stratum_proto::error::{Error, Result};
use stratum_proto::message::{Request, Response};
use stratum_proto::result::StratumResult;
use stratum_proto::state::ConnectionState;
use stratum_proto::transport::{Transport, TransportHandle};
use stratum_proto::Identifier;

struct Subscribe {
    agent: String,
}

impl RequestBody for Subscribe {
    const METHOD: &'static str = "mining.subscribe";

    fn from_params(params: &[Value]) -> Result<Self> {
        let agent = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("missing agent", json!(params)))?;
        Ok(Self {
            agent: agent.to_string(),
        })
    }

    fn to_params(&self) -> Vec<Value> {
        vec![json!(self.agent)]
    }
}

#[derive(Debug, PartialEq)]
struct SubscribeResponse {
    subject: Option<String>,
    subject_key: Option<String>,
    data: Vec<Value>,
}

impl ResponseBody for SubscribeResponse {
    fn from_response(response: &Response) -> Result<Self> {
        match response.result() {
            StratumResult::Array { subject, data } => Ok(Self {
                subject: subject.as_ref().map(|s| s.subject.clone()),
                subject_key: subject.as_ref().and_then(|s| s.subject_key.clone()),
                data: data.clone(),
            }),
            StratumResult::Scalar(_) => Err(Error::malformed("expected an array result", json!(null))),
        }
    }
}

struct GetHistory;

impl ResponseBody for GetHistory {
    fn from_response(response: &Response) -> Result<Self> {
        match response.result() {
            StratumResult::Array { .. } => Ok(Self),
            _ => Err(Error::malformed("expected an array result", json!(null))),
        }
    }
}

fn id(s: &str) -> Identifier {
    Identifier::try_from(s).unwrap()
}

/// Scenario 1: mining subscribe response carries a subject tuple with a key.
#[test]
fn mining_subscribe_response_dispatches_with_subject_and_key() {
    let correlation = Arc::new(CorrelationTable::new());
    let state = ConnectionState::new("connected", correlation.clone());
    correlation
        .register(id("1"), ResponseShape::of::<SubscribeResponse>())
        .unwrap();

    let received = Arc::new(Mutex::new(None));
    {
        let received = received.clone();
        state.register_response_handler::<SubscribeResponse, _>(move |response, _| {
            *received.lock().unwrap() = Some(SubscribeResponse {
                subject: response.subject.clone(),
                subject_key: response.subject_key.clone(),
                data: response.data.clone(),
            });
        });
    }

    let line = r#"{"id":1,"result":[["mining.notify","ae6812eb4cd7735a302a8a9dd95cf71f"],"08000002",4],"error":null}"#;
    let parsed = state.marshaller().parse_line(line).unwrap();

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Transport::new(tx);
    transport.set_state(Arc::new(state));
    transport.receive_messages(parsed);

    let received = received.lock().unwrap().take().unwrap();
    assert_eq!(received.subject.as_deref(), Some("mining.notify"));
    assert_eq!(
        received.subject_key.as_deref(),
        Some("ae6812eb4cd7735a302a8a9dd95cf71f")
    );
    assert_eq!(received.data, vec![json!("08000002"), json!(4)]);
}

/// Scenario 2: electrum-style history response has no subject (first element is a
/// plain string, not an array).
#[test]
fn electrum_history_response_has_no_subject() {
    let correlation = Arc::new(CorrelationTable::new());
    correlation
        .register(id("42"), ResponseShape::of::<GetHistory>())
        .unwrap();
    let marshaller = stratum_proto::marshaller::Marshaller::new(correlation);

    let line = r#"{"id":"42","result":["1DiiVSnksihdpdP1Pex7jghMAZffZiBY9q"],"error":null}"#;
    let mut parsed = marshaller.parse_line(line).unwrap();
    match parsed.remove(0) {
        stratum_proto::marshaller::ParsedMessage::Response { generic, .. } => {
            match generic.result() {
                StratumResult::Array { subject, data } => {
                    assert!(subject.is_none());
                    assert_eq!(data.len(), 1);
                }
                _ => panic!("expected an array result"),
            }
        }
        _ => panic!("expected a response"),
    }
}

/// Scenario 3: a request without an expected response registers no correlation
/// entry and serialises with a null id.
#[test]
fn request_without_expected_response_registers_nothing() {
    let correlation = Arc::new(CorrelationTable::new());
    let state = Arc::new(ConnectionState::new("connected", correlation));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Transport::new(tx);
    transport.set_state(state.clone());

    let request = Request::new(None, "foo", vec![json!(1), json!("x")]);
    transport.send_request(request).unwrap();

    assert_eq!(state.marshaller().correlation().len(), 0);
    let sent = rx.try_recv().unwrap();
    let line = state.marshaller().unmarshal(&sent);
    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value, json!({"id": null, "method": "foo", "params": [1, "x"]}));
}

/// Scenario 4: an unknown method is rejected as malformed.
#[test]
fn unknown_method_is_malformed() {
    let correlation = Arc::new(CorrelationTable::new());
    let state = ConnectionState::new("connected", correlation);
    state
        .register_request_handler::<Subscribe, _>(|_, _| {}, false)
        .unwrap();

    let line = r#"{"id":"7","method":"bogus","params":[]}"#;
    assert!(state.marshaller().parse_line(line).is_err());
}

/// Scenario 5: a pending request expires with exactly one callback invocation.
#[test]
fn pending_request_expires_with_one_callback() {
    struct Counting(Mutex<Vec<Identifier>>);
    impl ExpiryCallback for Counting {
        fn on_expired(&self, id: &Identifier, _shape: &ResponseShape) {
            self.0.lock().unwrap().push(id.clone());
        }
    }

    let callback = Arc::new(Counting(Mutex::new(Vec::new())));
    let table =
        CorrelationTable::with_expiry(Duration::from_millis(0)).with_callback(callback.clone());
    table
        .register(id("99"), ResponseShape::of::<SubscribeResponse>())
        .unwrap();

    std::thread::sleep(Duration::from_millis(5));
    table.sweep();
    table.sweep();

    let seen = callback.0.lock().unwrap();
    assert_eq!(&*seen, &[id("99")]);
}

/// Scenario 6: `poll_for_messages` is a no-op on a direct transport; the distinguished
/// poll request still serialises to `{}` when a caller builds one explicitly.
#[test]
fn poll_for_messages_is_a_no_op_on_a_direct_transport() {
    let correlation = Arc::new(CorrelationTable::new());
    let state = Arc::new(ConnectionState::new("connected", correlation));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Transport::new(tx);
    transport.set_state(state);

    transport.poll_for_messages().unwrap();
    assert!(rx.try_recv().is_err());

    assert_eq!(Request::poll().to_json(), json!({}));
}

/// Invariant 7 / boundary: a method registered only on a derived state is rejected
/// while a sibling base state (without that registration) is active, even though
/// both share the same correlation table lineage.
#[test]
fn state_isolation_rejects_methods_from_other_states() {
    let correlation = Arc::new(CorrelationTable::new());
    let state_a = ConnectionState::new("a", correlation.clone());
    let state_b = ConnectionState::new("b", correlation);
    state_b
        .register_request_handler::<Subscribe, _>(|_, _| {}, false)
        .unwrap();

    let line = r#"{"id":"1","method":"mining.subscribe","params":["cgminer"]}"#;
    assert!(state_a.marshaller().parse_line(line).is_err());
    assert!(state_b.marshaller().parse_line(line).is_ok());
}

/// Chain of responsibility: an unhandled message in the child state falls through to
/// the parent's handler.
#[test]
fn child_state_falls_back_to_parent_handler() {
    let correlation = Arc::new(CorrelationTable::new());
    let handled = Arc::new(AtomicBool::new(false));
    let parent = Arc::new(ConnectionState::new("parent", correlation.clone()));
    {
        let handled = handled.clone();
        parent
            .register_request_handler::<Subscribe, _>(
                move |_, _| handled.store(true, Ordering::SeqCst),
                false,
            )
            .unwrap();
    }
    let child = Arc::new(ConnectionState::with_parent("child", correlation, parent));

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Transport::new(tx);
    transport.set_state(child.clone());

    let line = r#"{"id":"1","method":"mining.subscribe","params":["cgminer"]}"#;
    let parsed = child.marshaller().parse_line(line).unwrap();
    transport.receive_messages(parsed);

    assert!(handled.load(Ordering::SeqCst));
}
