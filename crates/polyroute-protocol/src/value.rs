use serde_json::{Map, Value};

/// Shape mismatch while reading a runtime-flexible payload.
///
/// Payloads stay as `serde_json::Value`; codecs and filters read them through
/// these accessors and fail fast instead of silently coercing.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("missing field: {path}")]
    Missing { path: String },
    #[error("field {path} is not {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
    },
}

pub fn path_of(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

pub fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ShapeError> {
    value.as_object().ok_or(ShapeError::WrongType {
        path: path.to_string(),
        expected: "an object",
    })
}

pub fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, ShapeError> {
    value.as_array().ok_or(ShapeError::WrongType {
        path: path.to_string(),
        expected: "an array",
    })
}

pub fn as_str<'a>(value: &'a Value, path: &str) -> Result<&'a str, ShapeError> {
    value.as_str().ok_or(ShapeError::WrongType {
        path: path.to_string(),
        expected: "a string",
    })
}

pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object().and_then(|map| map.get(key))
}

pub fn get_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, ShapeError> {
    let field = get(value, key).ok_or(ShapeError::Missing {
        path: key.to_string(),
    })?;
    as_str(field, key)
}

pub fn get_object<'a>(value: &'a Value, key: &str) -> Result<&'a Map<String, Value>, ShapeError> {
    let field = get(value, key).ok_or(ShapeError::Missing {
        path: key.to_string(),
    })?;
    as_object(field, key)
}

pub fn get_array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, ShapeError> {
    let field = get(value, key).ok_or(ShapeError::Missing {
        path: key.to_string(),
    })?;
    as_array(field, key)
}

pub fn get_u64(value: &Value, key: &str) -> Option<u64> {
    get(value, key).and_then(Value::as_u64)
}

pub fn get_i64(value: &Value, key: &str) -> Option<i64> {
    get(value, key).and_then(Value::as_i64)
}

pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get(value, key).and_then(Value::as_bool)
}

pub fn set(value: &mut Value, key: &str, field: Value) {
    if let Some(map) = value.as_object_mut() {
        map.insert(key.to_string(), field);
    }
}

pub fn ensure_object_mut<'a>(
    value: &'a mut Value,
    path: &str,
) -> Result<&'a mut Map<String, Value>, ShapeError> {
    value.as_object_mut().ok_or(ShapeError::WrongType {
        path: path.to_string(),
        expected: "an object",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_fail_fast_on_shape() {
        let value = json!({"model": 42, "messages": []});
        assert_eq!(
            get_str(&value, "model"),
            Err(ShapeError::WrongType {
                path: "model".to_string(),
                expected: "a string"
            })
        );
        assert!(get_array(&value, "messages").unwrap().is_empty());
        assert_eq!(
            get_str(&value, "absent"),
            Err(ShapeError::Missing {
                path: "absent".to_string()
            })
        );
    }

    #[test]
    fn set_inserts_on_objects_only() {
        let mut value = json!({"a": 1});
        set(&mut value, "b", json!(2));
        assert_eq!(value["b"], 2);
        let mut not_object = json!([1]);
        set(&mut not_object, "b", json!(2));
        assert_eq!(not_object, json!([1]));
    }
}
