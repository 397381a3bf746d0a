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

//! Statically-typed registration replacing the reflective "JSON-object
//! constructor" extension point: each concrete Request/Response variant
//! supplies an explicit parser function rather than being instantiated by type
//! handle at runtime.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::message::Response;

/// A concrete, dialect-specific request body. `METHOD` is the wire method name this
/// type deserialises; a type implements this once and registers itself with a
/// connection state via `register_request_handler`.
pub trait RequestBody: Any + Sized + Send + Sync + 'static {
    const METHOD: &'static str;

    fn from_params(params: &[Value]) -> Result<Self>;
    fn to_params(&self) -> Vec<Value>;
}

/// A concrete, dialect-specific response body, constructed from the generic
/// [`Response`] once the correlation table has matched the reply to its request.
pub trait ResponseBody: Any + Sized + Send + Sync + 'static {
    fn from_response(response: &Response) -> Result<Self>;
}

pub(crate) type BoxedAny = Box<dyn Any + Send + Sync>;

/// Type-erased handle to a registered [`RequestBody`]'s parser, keyed by method name
/// in the marshaller's dispatch table.
#[derive(Clone)]
pub(crate) struct RequestParser {
    pub(crate) type_id: TypeId,
    parse: Arc<dyn Fn(&[Value]) -> Result<BoxedAny> + Send + Sync>,
}

impl RequestParser {
    pub(crate) fn of<T: RequestBody>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            parse: Arc::new(|params| T::from_params(params).map(|v| Box::new(v) as BoxedAny)),
        }
    }

    pub(crate) fn parse(&self, params: &[Value]) -> Result<BoxedAny> {
        (self.parse)(params)
    }
}

/// Type-erased "opaque handle to a Response variant constructor": what the
/// correlation table stores per pending request, and what flows through
/// `send_request_expecting` / `register_response_handler`.
#[derive(Clone)]
pub struct ResponseShape {
    pub(crate) type_id: TypeId,
    type_name: &'static str,
    parse: Arc<dyn Fn(&Response) -> Result<BoxedAny> + Send + Sync>,
}

impl fmt::Debug for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseShape")
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl ResponseShape {
    pub fn of<T: ResponseBody>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            parse: Arc::new(|response| T::from_response(response).map(|v| Box::new(v) as BoxedAny)),
        }
    }

    pub(crate) fn parse(&self, response: &Response) -> Result<BoxedAny> {
        (self.parse)(response)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}
