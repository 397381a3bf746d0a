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

//! The polymorphic Stratum result: either a bare scalar or an array optionally
//! prefixed with a subject tuple.

use serde_json::Value;

use crate::error::{Error, Result as EngineResult};

/// The optional leading element of an array result: a human-readable subject and an
/// opaque correlation key the receiver may quote back later.
///
/// Invariant: `subject_key.is_some() => true` (subject is always present - a
/// `Subject` without one is represented by `subject_key: None`).
#[derive(Clone, PartialEq, Debug)]
pub struct Subject {
    pub subject: String,
    pub subject_key: Option<String>,
}

impl Subject {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            subject_key: None,
        }
    }

    pub fn with_key(subject: impl Into<String>, subject_key: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            subject_key: Some(subject_key.into()),
        }
    }

    fn to_json(&self) -> Value {
        match &self.subject_key {
            Some(key) => Value::Array(vec![
                Value::String(self.subject.clone()),
                Value::String(key.clone()),
            ]),
            None => Value::Array(vec![Value::String(self.subject.clone())]),
        }
    }

    /// Parses a value already known to be the subject-tuple candidate (`V[0]` of an
    /// array result that is itself an array).
    fn from_json(tuple: &[Value]) -> EngineResult<Self> {
        match tuple.len() {
            1 | 2 => {}
            _ => {
                return Err(Error::malformed(
                    "subject tuple must have length 1 or 2",
                    Value::Array(tuple.to_vec()),
                ))
            }
        }
        let subject = tuple[0].as_str().ok_or_else(|| {
            Error::malformed(
                "subject tuple's first element must be a string",
                Value::Array(tuple.to_vec()),
            )
        })?;
        let subject_key = match tuple.get(1) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(Error::malformed(
                    "subject key must be a string",
                    other.clone(),
                ))
            }
            None => None,
        };
        Ok(Self {
            subject: subject.to_string(),
            subject_key,
        })
    }
}

/// A Stratum result value: either an opaque scalar, or an ordered list of data
/// elements with an optional subject-tuple header.
#[derive(Clone, PartialEq, Debug)]
pub enum StratumResult {
    /// A single JSON scalar or object, wrapped verbatim.
    Scalar(Value),
    /// An ordered list of data elements, with an optional subject-tuple prefix.
    Array {
        subject: Option<Subject>,
        data: Vec<Value>,
    },
}

impl StratumResult {
    pub fn scalar(value: Value) -> Self {
        Self::Scalar(value)
    }

    pub fn array(data: Vec<Value>) -> Self {
        Self::Array {
            subject: None,
            data,
        }
    }

    pub fn array_with_subject(subject: Subject, data: Vec<Value>) -> Self {
        Self::Array {
            subject: Some(subject),
            data,
        }
    }

    /// Maps an untyped JSON result payload to the appropriate variant: arrays are
    /// inspected for a leading subject tuple, everything else is a scalar.
    pub fn from_json(value: Value) -> EngineResult<Self> {
        match value {
            Value::Array(mut elements) => {
                let has_subject = matches!(elements.first(), Some(Value::Array(_)));
                if has_subject {
                    let tuple = match elements.remove(0) {
                        Value::Array(tuple) => tuple,
                        _ => unreachable!(),
                    };
                    let subject = Subject::from_json(&tuple)?;
                    Ok(Self::Array {
                        subject: Some(subject),
                        data: elements,
                    })
                } else {
                    Ok(Self::Array {
                        subject: None,
                        data: elements,
                    })
                }
            }
            other => Ok(Self::Scalar(other)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Array { subject, data } => {
                let mut elements = Vec::with_capacity(data.len() + 1);
                if let Some(subject) = subject {
                    elements.push(subject.to_json());
                }
                elements.extend(data.iter().cloned());
                Value::Array(elements)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_round_trips_verbatim() {
        let value = json!({"height": 1});
        let result = StratumResult::from_json(value.clone()).unwrap();
        assert_eq!(result, StratumResult::Scalar(value.clone()));
        assert_eq!(result.to_json(), value);
    }

    #[test]
    fn array_without_subject() {
        let value = json!(["1DiiVSnksihdpdP1Pex7jghMAZffZiBY9q"]);
        let result = StratumResult::from_json(value.clone()).unwrap();
        match &result {
            StratumResult::Array { subject, data } => {
                assert!(subject.is_none());
                assert_eq!(data.len(), 1);
            }
            _ => panic!("expected array"),
        }
        assert_eq!(result.to_json(), value);
    }

    #[test]
    fn array_with_subject_and_key() {
        let value = json!([["mining.notify", "ae6812eb4cd7735a302a8a9dd95cf71f"], "08000002", 4]);
        let result = StratumResult::from_json(value.clone()).unwrap();
        match &result {
            StratumResult::Array { subject, data } => {
                let subject = subject.as_ref().unwrap();
                assert_eq!(subject.subject, "mining.notify");
                assert_eq!(
                    subject.subject_key.as_deref(),
                    Some("ae6812eb4cd7735a302a8a9dd95cf71f")
                );
                assert_eq!(data.len(), 2);
            }
            _ => panic!("expected array"),
        }
        assert_eq!(result.to_json(), value);
    }

    #[test]
    fn subject_tuple_length_zero_or_over_two_is_malformed() {
        assert!(StratumResult::from_json(json!([[], "x"])).is_err());
        assert!(StratumResult::from_json(json!([["a", "b", "c"], "x"])).is_err());
    }

    #[test]
    fn subject_tuple_first_element_must_be_string() {
        assert!(StratumResult::from_json(json!([[1, "b"]])).is_err());
    }

    #[test]
    fn array_length_matches_data_with_and_without_subject() {
        let no_subject = StratumResult::array(vec![json!(1), json!(2)]);
        assert_eq!(no_subject.to_json().as_array().unwrap().len(), 2);

        let with_subject =
            StratumResult::array_with_subject(Subject::new("s"), vec![json!(1), json!(2)]);
        assert_eq!(with_subject.to_json().as_array().unwrap().len(), 3);
    }
}
