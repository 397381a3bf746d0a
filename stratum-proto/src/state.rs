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

//! A connection state is a named vocabulary: it decides which request methods
//! and response shapes are legal right now, and who handles each. States form
//! a chain of responsibility via composition rather than inheritance - a
//! state that doesn't handle a message consults its optional `parent`.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;

use crate::correlation::CorrelationTable;
use crate::dispatch::{BoxedAny, RequestBody, ResponseBody};
use crate::error::{Error, Result};
use crate::marshaller::Marshaller;
use crate::transport::TransportHandle;

type RequestHandlerFn = Arc<dyn Fn(&BoxedAny, &dyn TransportHandle) + Send + Sync>;
type ResponseHandlerFn = Arc<dyn Fn(&BoxedAny, &dyn TransportHandle) + Send + Sync>;

/// A named conversational phase: owns a fresh marshaller (scoping its accepted
/// vocabulary) and the handler tables for the request/response types it knows about.
pub struct ConnectionState {
    name: &'static str,
    marshaller: Marshaller,
    request_handlers: DashMap<TypeId, RequestHandlerFn>,
    response_handlers: DashMap<TypeId, ResponseHandlerFn>,
    parent: Option<Arc<ConnectionState>>,
}

impl ConnectionState {
    pub fn new(name: &'static str, correlation: Arc<CorrelationTable>) -> Self {
        Self {
            name,
            marshaller: Marshaller::new(correlation),
            request_handlers: DashMap::new(),
            response_handlers: DashMap::new(),
            parent: None,
        }
    }

    /// Builds a state that falls back to `parent` for any request/response type it
    /// doesn't itself handle - the chain-of-responsibility composition replacing the
    /// source's state-inheritance hierarchy.
    pub fn with_parent(
        name: &'static str,
        correlation: Arc<CorrelationTable>,
        parent: Arc<ConnectionState>,
    ) -> Self {
        Self {
            name,
            marshaller: Marshaller::new(correlation),
            request_handlers: DashMap::new(),
            response_handlers: DashMap::new(),
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn marshaller(&self) -> &Marshaller {
        &self.marshaller
    }

    /// Subscribe this state's listeners. The default implementation has nothing to
    /// attach beyond what `Transport::set_state` already wires (the state becomes the
    /// active dispatch target directly); a dialect-specific state may override with
    /// additional side effects (e.g. emitting a greeting) by wrapping this type.
    pub fn start(&self) {}

    /// Unsubscribe this state's listeners, called before the transport moves to the
    /// next state.
    pub fn end(&self) {}

    /// Teaches this state's marshaller that `T::METHOD` parses to `T`, and binds `T`
    /// to `handler`. A duplicate registration without `replace` is rejected.
    pub fn register_request_handler<T, H>(&self, handler: H, replace: bool) -> Result<()>
    where
        T: RequestBody,
        H: Fn(&T, &dyn TransportHandle) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if !replace && self.request_handlers.contains_key(&type_id) {
            return Err(Error::invalid_argument(format!(
                "a handler for method '{}' is already registered",
                T::METHOD
            )));
        }
        self.marshaller.register_method::<T>();
        self.request_handlers.insert(
            type_id,
            Arc::new(move |body, transport| {
                let concrete = body
                    .downcast_ref::<T>()
                    .expect("BUG: request dispatch type mismatch");
                handler(concrete, transport);
            }),
        );
        Ok(())
    }

    /// Binds `T` to `handler`. Has no marshaller-side effect: responses are keyed by
    /// the pending-request table, not by a method name.
    pub fn register_response_handler<T, H>(&self, handler: H)
    where
        T: ResponseBody,
        H: Fn(&T, &dyn TransportHandle) + Send + Sync + 'static,
    {
        self.response_handlers.insert(
            TypeId::of::<T>(),
            Arc::new(move |body, transport| {
                let concrete = body
                    .downcast_ref::<T>()
                    .expect("BUG: response dispatch type mismatch");
                handler(concrete, transport);
            }),
        );
    }

    /// Looks up a handler keyed by the request body's concrete type and invokes it.
    /// Returns `true` iff a handler was found here or in an ancestor state.
    pub(crate) fn process_request(
        &self,
        type_id: TypeId,
        body: &BoxedAny,
        transport: &dyn TransportHandle,
    ) -> bool {
        if let Some(handler) = self.request_handlers.get(&type_id) {
            handler(body, transport);
            true
        } else if let Some(parent) = &self.parent {
            parent.process_request(type_id, body, transport)
        } else {
            false
        }
    }

    /// Symmetric to `process_request`, for response variants.
    pub(crate) fn process_response(
        &self,
        type_id: TypeId,
        body: &BoxedAny,
        transport: &dyn TransportHandle,
    ) -> bool {
        if let Some(handler) = self.response_handlers.get(&type_id) {
            handler(body, transport);
            true
        } else if let Some(parent) = &self.parent {
            parent.process_response(type_id, body, transport)
        } else {
            false
        }
    }
}
