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

//! The generic Request/Response message model, shared by every Stratum dialect.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifier::Identifier;
use crate::result::StratumResult;

/// A generic, untyped Stratum request: a method name and its positional parameters.
///
/// The distinguished *poll* request carries neither an identifier nor a method name
/// and serialises to an empty JSON object `{}`. It lets polled transports ask
/// "anything pending?" without inventing a method name.
#[derive(Clone, PartialEq, Debug)]
pub struct Request {
    id: Option<Identifier>,
    method: Option<String>,
    params: Vec<Value>,
}

impl Request {
    pub fn new(id: Option<Identifier>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: Some(method.into()),
            params,
        }
    }

    /// Builds the distinguished poll request: no id, no method, no params.
    pub fn poll() -> Self {
        Self {
            id: None,
            method: None,
            params: Vec::new(),
        }
    }

    pub fn is_poll(&self) -> bool {
        self.method.is_none()
    }

    pub fn id(&self) -> Option<&Identifier> {
        self.id.as_ref()
    }

    /// The method name. Always `Some` unless this is the poll request.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (Option<Identifier>, Option<String>, Vec<Value>) {
        (self.id, self.method, self.params)
    }

    /// Parses a generic request from a decoded JSON object. The poll request's wire
    /// form `{}` is handled by the marshaller before this is reached; this constructor
    /// always requires `id`, `method`, `params` to be present per the wire grammar.
    pub fn from_json(object: &Map<String, Value>) -> Result<Self> {
        let id = match object.get("id") {
            None => return Err(Error::malformed("request missing 'id' key", Value::Object(object.clone()))),
            Some(Value::Null) => None,
            Some(value) => Some(Identifier::from_json(value)?),
        };

        let method = match object.get("method") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => {
                return Err(Error::malformed(
                    "request 'method' must be a non-empty string",
                    Value::Object(object.clone()),
                ))
            }
        };

        let params = match object.get("params") {
            Some(Value::Array(params)) => params.clone(),
            _ => {
                return Err(Error::malformed(
                    "request 'params' must be an array",
                    Value::Object(object.clone()),
                ))
            }
        };

        Ok(Self {
            id,
            method: Some(method),
            params,
        })
    }

    pub fn to_json(&self) -> Value {
        if self.is_poll() {
            return Value::Object(Map::new());
        }
        let mut object = Map::new();
        object.insert(
            "id".to_string(),
            self.id
                .as_ref()
                .map(|id| Value::String(id.as_str().to_string()))
                .unwrap_or(Value::Null),
        );
        object.insert(
            "method".to_string(),
            Value::String(self.method.clone().unwrap_or_default()),
        );
        object.insert("params".to_string(), Value::Array(self.params.clone()));
        Value::Object(object)
    }
}

/// A generic, untyped Stratum response: the triggering request's identifier paired
/// with a result and/or an error.
///
/// The wire format permits both `result` and `error` to be non-null simultaneously;
/// when that happens the error dominates ([`Response::was_successful`] is `false`).
#[derive(Clone, PartialEq, Debug)]
pub struct Response {
    id: Identifier,
    result: StratumResult,
    error: Option<String>,
}

impl Response {
    pub fn new(id: Identifier, result: StratumResult, error: Option<String>) -> Self {
        Self { id, result, error }
    }

    pub fn ok(id: Identifier, result: StratumResult) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: Identifier, error: impl Into<String>) -> Self {
        Self {
            id,
            result: StratumResult::Scalar(Value::Null),
            error: Some(error.into()),
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn result(&self) -> &StratumResult {
        &self.result
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `true` iff `error` is absent. A response whose `result` is JSON null but whose
    /// `error` is also null still reports success - this mirrors wire behaviour rather
    /// than trying to infer intent from a null result.
    pub fn was_successful(&self) -> bool {
        self.error.is_none()
    }

    pub fn from_json(object: &Map<String, Value>) -> Result<Self> {
        let id = match object.get("id") {
            Some(Value::Null) | None => {
                return Err(Error::malformed(
                    "response 'id' must not be null",
                    Value::Object(object.clone()),
                ))
            }
            Some(value) => Identifier::from_json(value)?,
        };

        let result = match object.get("result") {
            Some(value) => StratumResult::from_json(value.clone())?,
            None => {
                return Err(Error::malformed(
                    "response missing 'result' key",
                    Value::Object(object.clone()),
                ))
            }
        };

        let error = match object.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self { id, result, error })
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".to_string(), Value::String(self.id.as_str().to_string()));
        object.insert("result".to_string(), self.result.to_json());
        object.insert(
            "error".to_string(),
            self.error
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        Value::Object(object)
    }
}

/// A generic, untyped Stratum message as seen at the marshaller boundary - before
/// dialect-specific variant construction.
#[derive(Clone, PartialEq, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
}
