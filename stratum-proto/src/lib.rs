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

//! A transport-agnostic engine for the Stratum JSON line-oriented
//! request/response protocol.
//!
//! Stratum is a lightweight RPC dialect used by (but not tied to)
//! cryptocurrency mining pools and wallet servers: either side may send
//! requests at any time, responses are correlated to requests by identifier,
//! and results are either a single scalar or a structured array with an
//! optional "subject tuple" context header.
//!
//! This crate implements the protocol-generic core: the message model
//! ([`message`], [`result`]), the marshaller that turns wire lines into typed
//! messages while tracking outstanding requests ([`marshaller`],
//! [`correlation`]), the chain-of-responsibility connection-state machine
//! ([`state`]) and the stateful transport ([`transport`]) that dispatches
//! incoming messages to handlers registered for the current conversational
//! state. A concrete Stratum dialect (mining, Electrum, ...) is expected to
//! implement [`dispatch::RequestBody`]/[`dispatch::ResponseBody`] for its own
//! message types and register them with a [`state::ConnectionState`]; no
//! dialect-specific vocabulary lives in this crate. [`driver`] is an
//! illustrative reference byte-stream I/O driver, not a concrete TCP server.

pub mod correlation;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod identifier;
pub mod marshaller;
pub mod message;
pub mod result;
pub mod state;
pub mod transport;

pub use error::{Error, Result};
pub use identifier::{Identifier, IdentifierGenerator};
pub use message::{Message, Request, Response};
pub use result::{StratumResult, Subject};
