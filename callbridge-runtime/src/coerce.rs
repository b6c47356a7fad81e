// Copyright 2025 Callbridge (https://github.com/callbridge/callbridge)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Best-effort argument coercion toward declared parameter shapes.
//!
//! Wire callers often send numbers as strings and booleans as words. Values
//! are nudged toward the declared shape, recursing into array element and
//! map value shapes. Only an unconvertible string errors; a value of an
//! unrelated family passes through untouched and the target operation
//! decides what to do with it.

use serde_json::{Map, Value as Json};
use thiserror::Error;

use callbridge_core::{ShapeKind, TypeShape};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot shape {found} as {expected}")]
pub struct CoerceError {
    pub expected: &'static str,
    pub found: String,
}

impl CoerceError {
    fn new(expected: &'static str, found: &Json) -> Self {
        let found = match found {
            Json::String(s) => format!("string \"{s}\""),
            Json::Null => "null".to_string(),
            Json::Bool(_) => "boolean".to_string(),
            Json::Number(n) => format!("number {n}"),
            Json::Array(_) => "array".to_string(),
            Json::Object(_) => "object".to_string(),
        };
        Self { expected, found }
    }
}

/// Coerce one argument toward a declared shape. Undeclared and nominal
/// shapes pass everything through.
pub fn coerce_argument(value: Json, shape: &TypeShape) -> Result<Json, CoerceError> {
    let Some(kind) = shape.kind else {
        return Ok(value);
    };
    match kind {
        ShapeKind::String => Ok(match value {
            Json::Number(number) => Json::String(number.to_string()),
            Json::Bool(flag) => Json::String(flag.to_string()),
            other => other,
        }),
        ShapeKind::Integer => coerce_integer(value),
        ShapeKind::Number => coerce_number(value),
        ShapeKind::Boolean => coerce_boolean(value),
        ShapeKind::Array => {
            let Json::Array(items) = value else {
                return Ok(value);
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(match shape.items.as_deref() {
                    Some(element) => coerce_argument(item, element)?,
                    None => item,
                });
            }
            Ok(Json::Array(out))
        }
        ShapeKind::Object => {
            let Json::Object(entries) = value else {
                return Ok(value);
            };
            let mut out = Map::new();
            for (key, item) in entries {
                let target = shape
                    .properties
                    .as_ref()
                    .and_then(|properties| properties.get(&key))
                    .or(shape.values.as_deref());
                let item = match target {
                    Some(target) => coerce_argument(item, target)?,
                    None => item,
                };
                out.insert(key, item);
            }
            Ok(Json::Object(out))
        }
    }
}

fn coerce_integer(value: Json) -> Result<Json, CoerceError> {
    match &value {
        Json::Number(number) => {
            if number.is_i64() || number.is_u64() {
                return Ok(value);
            }
            match number.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Json::from(f as i64)),
                _ => Err(CoerceError::new("integer", &value)),
            }
        }
        Json::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Json::from)
            .map_err(|_| CoerceError::new("integer", &value)),
        _ => Ok(value),
    }
}

fn coerce_number(value: Json) -> Result<Json, CoerceError> {
    match &value {
        Json::Number(_) => Ok(value),
        Json::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Json::Number)
            .ok_or_else(|| CoerceError::new("number", &value)),
        _ => Ok(value),
    }
}

fn coerce_boolean(value: Json) -> Result<Json, CoerceError> {
    match &value {
        Json::Bool(_) => Ok(value),
        Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Json::Bool(true)),
            "false" | "0" | "no" => Ok(Json::Bool(false)),
            _ => Err(CoerceError::new("boolean", &value)),
        },
        Json::Number(number) => {
            let truthy = number.as_f64().map_or(true, |f| f != 0.0);
            Ok(Json::Bool(truthy))
        }
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_parse_toward_numeric_shapes() {
        assert_eq!(
            coerce_argument(json!("42"), &TypeShape::integer()).unwrap(),
            json!(42)
        );
        assert_eq!(
            coerce_argument(json!(" 7 "), &TypeShape::integer()).unwrap(),
            json!(7)
        );
        assert_eq!(
            coerce_argument(json!("3.5"), &TypeShape::number()).unwrap(),
            json!(3.5)
        );
    }

    #[test]
    fn unparseable_strings_error() {
        let err = coerce_argument(json!("12x"), &TypeShape::integer()).unwrap_err();
        assert_eq!(err.expected, "integer");
        assert!(err.to_string().contains("12x"));
        assert!(coerce_argument(json!("maybe"), &TypeShape::boolean()).is_err());
    }

    #[test]
    fn whole_floats_become_integers() {
        assert_eq!(
            coerce_argument(json!(2.0), &TypeShape::integer()).unwrap(),
            json!(2)
        );
        assert!(coerce_argument(json!(2.5), &TypeShape::integer()).is_err());
    }

    #[test]
    fn numbers_and_booleans_render_as_strings() {
        assert_eq!(
            coerce_argument(json!(42), &TypeShape::string()).unwrap(),
            json!("42")
        );
        assert_eq!(
            coerce_argument(json!(true), &TypeShape::string()).unwrap(),
            json!("true")
        );
        // Strings stay themselves.
        assert_eq!(
            coerce_argument(json!("keep"), &TypeShape::string()).unwrap(),
            json!("keep")
        );
    }

    #[test]
    fn boolean_words_and_numbers_coerce() {
        assert_eq!(
            coerce_argument(json!("yes"), &TypeShape::boolean()).unwrap(),
            json!(true)
        );
        assert_eq!(
            coerce_argument(json!("0"), &TypeShape::boolean()).unwrap(),
            json!(false)
        );
        assert_eq!(
            coerce_argument(json!(0), &TypeShape::boolean()).unwrap(),
            json!(false)
        );
        assert_eq!(
            coerce_argument(json!(2), &TypeShape::boolean()).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn arrays_recurse_into_element_shapes() {
        let shape = TypeShape::array(TypeShape::integer());
        assert_eq!(
            coerce_argument(json!(["1", "2", 3]), &shape).unwrap(),
            json!([1, 2, 3])
        );
        assert!(coerce_argument(json!(["1", "oops"]), &shape).is_err());
    }

    #[test]
    fn maps_recurse_into_value_shapes() {
        let shape = TypeShape::map_of(TypeShape::number());
        assert_eq!(
            coerce_argument(json!({"a": "1.5", "b": 2}), &shape).unwrap(),
            json!({"a": 1.5, "b": 2})
        );
    }

    #[test]
    fn undeclared_shapes_pass_everything_through() {
        let any = TypeShape::any();
        let value = json!({"deep": ["untouched", 1]});
        assert_eq!(coerce_argument(value.clone(), &any).unwrap(), value);
    }

    #[test]
    fn unrelated_families_pass_through() {
        // A map offered to an integer parameter is left for the operation.
        let value = json!({"a": 1});
        assert_eq!(
            coerce_argument(value.clone(), &TypeShape::integer()).unwrap(),
            value
        );
        assert_eq!(
            coerce_argument(json!(null), &TypeShape::integer()).unwrap(),
            json!(null)
        );
    }
}
