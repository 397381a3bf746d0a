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

//! Error taxonomy for the Stratum protocol engine.

use serde_json::Value;
use thiserror::Error;

/// A malformed wire message: any syntactic violation of the wire grammar, or a
/// registered variant's constructor rejecting the decoded JSON object.
#[derive(Error, Clone, PartialEq, Debug)]
#[error("malformed message{}: {description}", method.as_ref().map(|m| format!(" (method: {})", m)).unwrap_or_default())]
pub struct Malformed {
    /// Method name, if one could be extracted before the failure occurred.
    pub method: Option<String>,
    /// Human-readable description of what went wrong.
    pub description: String,
    /// The offending JSON payload, kept for diagnostics.
    pub payload: Value,
}

impl Malformed {
    pub fn new(description: impl Into<String>, payload: Value) -> Self {
        Self {
            method: None,
            description: description.into(),
            payload,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Syntactic violation of the wire grammar, unknown method, or unsolicited response -
    /// all three are indistinguishable from a stream-resynchronization point of view.
    #[error(transparent)]
    Malformed(#[from] Malformed),

    /// A caller tried to register a pending request id that is already pending, register a
    /// handler without `replace` where one already exists, transition into a null state, or
    /// send on a transport that isn't connected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport isn't in a state where the requested operation is legal (e.g. sending
    /// on a closed transport).
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line framing error: {0}")]
    Framing(#[from] tokio_util::codec::LinesCodecError),
}

impl Error {
    pub fn malformed(description: impl Into<String>, payload: Value) -> Self {
        Malformed::new(description, payload).into()
    }

    pub fn invalid_argument(description: impl Into<String>) -> Self {
        Self::InvalidArgument(description.into())
    }

    pub fn invalid_state(description: impl Into<String>) -> Self {
        Self::InvalidState(description.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
