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

//! Converts wire lines to typed messages and back. Owns the request
//! correlation table: the marshaller is what a connection state uses to
//! recognise its own vocabulary, so the table travels with it.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::correlation::CorrelationTable;
use crate::dispatch::{BoxedAny, RequestBody, RequestParser, ResponseShape};
use crate::error::{Error, Malformed, Result};
use crate::message::{Request, Response};

/// A single decoded wire message, already routed to its concrete, type-erased body.
pub enum ParsedMessage {
    /// The distinguished empty-object poll request. Carries no method, no concrete
    /// body, and triggers no handler dispatch.
    Poll,
    Request {
        generic: Request,
        type_id: TypeId,
        body: BoxedAny,
    },
    Response {
        generic: Response,
        shape: ResponseShape,
        body: BoxedAny,
    },
}

/// Either a request or a response the caller wants serialised and sent.
pub enum OutgoingMessage {
    Request(Request),
    Response(Response),
}

impl From<Request> for OutgoingMessage {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for OutgoingMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

pub struct Marshaller {
    request_parsers: DashMap<String, RequestParser>,
    correlation: Arc<CorrelationTable>,
}

impl Marshaller {
    pub fn new(correlation: Arc<CorrelationTable>) -> Self {
        Self {
            request_parsers: DashMap::new(),
            correlation,
        }
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    /// Teaches this marshaller that `T::METHOD` deserialises to `T`. Called by
    /// `ConnectionState::register_request_handler`, never directly.
    pub(crate) fn register_method<T: RequestBody>(&self) {
        self.request_parsers
            .insert(T::METHOD.to_string(), RequestParser::of::<T>());
    }

    pub(crate) fn has_method(&self, method: &str) -> bool {
        self.request_parsers.contains_key(method)
    }

    /// Parses one wire line. A line beginning with `[` is a batch: each array element
    /// is an independent message. Anything else is parsed as a single object.
    pub fn parse_line(&self, line: &str) -> Result<Vec<ParsedMessage>> {
        let line = line.trim();
        let value: Value = serde_json::from_str(line)?;
        match value {
            Value::Array(values) => values.into_iter().map(|v| self.parse_object(v)).collect(),
            other => Ok(vec![self.parse_object(other)?]),
        }
    }

    fn parse_object(&self, value: Value) -> Result<ParsedMessage> {
        let object = match &value {
            Value::Object(object) => object,
            _ => return Err(Error::malformed("expected a JSON object", value.clone())),
        };

        if object.is_empty() {
            return Ok(ParsedMessage::Poll);
        }

        // Presence of `result` (even JSON null) is the only thing distinguishing a
        // response from a request - Stratum responses always emit it, requests never
        // do.
        if object.contains_key("result") {
            self.parse_response(object)
        } else {
            self.parse_request(object)
        }
    }

    fn parse_request(&self, object: &Map<String, Value>) -> Result<ParsedMessage> {
        let generic = Request::from_json(object)?;
        let method = generic
            .method()
            .expect("BUG: non-poll request parsed without a method");

        let parser = self.request_parsers.get(method).ok_or_else(|| {
            Error::from(
                Malformed::new(
                    format!("unhandled method: {}", method),
                    Value::Object(object.clone()),
                )
                .with_method(method),
            )
        })?;

        let type_id = parser.type_id;
        let body = parser.parse(generic.params())?;
        drop(parser);

        Ok(ParsedMessage::Request {
            generic,
            type_id,
            body,
        })
    }

    fn parse_response(&self, object: &Map<String, Value>) -> Result<ParsedMessage> {
        let generic = Response::from_json(object)?;

        let shape = self.correlation.take(generic.id()).ok_or_else(|| {
            Error::malformed(
                format!("unsolicited response for id {}", generic.id()),
                Value::Object(object.clone()),
            )
        })?;

        let body = shape.parse(&generic)?;

        Ok(ParsedMessage::Response {
            generic,
            shape,
            body,
        })
    }

    /// Renders a message as a single-line JSON object, no trailing newline - newline
    /// framing is the driver's concern.
    pub fn unmarshal(&self, message: &OutgoingMessage) -> String {
        let value = match message {
            OutgoingMessage::Request(request) => request.to_json(),
            OutgoingMessage::Response(response) => response.to_json(),
        };
        value.to_string()
    }
}
