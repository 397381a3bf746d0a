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

//! Message identifiers. Opaque to the engine, non-empty by construction.

use std::convert::TryFrom;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::error::{Error, Result};

/// A non-empty textual token used to pair a response with its triggering request.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Parses an identifier out of a JSON value as it appears on the wire: either a string or
    /// an integer, both are coerced to the stored string form.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Self::try_from(s.as_str()),
            Value::Number(n) => Self::try_from(n.to_string()),
            other => Err(Error::malformed(
                "identifier must be a string or number",
                other.clone(),
            )),
        }
    }
}

impl TryFrom<&str> for Identifier {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::invalid_argument("identifier must not be empty"));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for Identifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::invalid_argument("identifier must not be empty"));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Atomic, monotonic counter producing decimal string identifiers for locally-initiated
/// requests. Uniqueness is only guaranteed within the process lifetime.
#[derive(Debug, Default)]
pub struct IdentifierGenerator(AtomicU64);

impl IdentifierGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Returns the next identifier in the sequence and advances the counter.
    pub fn next(&self) -> Identifier {
        let value = self.0.fetch_add(1, Ordering::SeqCst);
        Identifier(value.to_string())
    }
}
