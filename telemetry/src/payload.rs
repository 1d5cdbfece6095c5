//! Structural validation of ingestion bodies.
//!
//! Bodies arrive as `{"type": ..., "payload": {...}}`. Validation collects
//! every problem per field so the caller gets the full list in one response.

use crate::errors::{ApiError, FieldErrors};
use crate::model::{ErrorPayload, EventKind, EventPayload, PerformancePayload};
use serde_json::{Map, Value};

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_METHOD_LENGTH: usize = 10;
pub const MAX_ERROR_TYPE_LENGTH: usize = 255;
const MAX_POSITIVE_INT: i64 = 2_147_483_647;

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const NOT_BLANK: &str = "This field may not be blank.";
const NOT_STRING: &str = "Not a valid string.";
const NOT_INTEGER: &str = "A valid integer is required.";
const NOT_OBJECT: &str = "Invalid data. Expected a dictionary.";

/// Parses and validates a raw ingestion body.
pub fn parse_envelope(body: &[u8]) -> Result<EventPayload, ApiError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ApiError::bad_field("non_field_errors", format!("JSON parse error - {e}"))
    })?;

    let Value::Object(envelope) = value else {
        return Err(ApiError::bad_field("non_field_errors", NOT_OBJECT));
    };

    let kind = envelope
        .get("type")
        .and_then(Value::as_str)
        .and_then(EventKind::parse)
        .ok_or_else(|| ApiError::bad_field("type", "Invalid data type specified"))?;

    match envelope.get("payload") {
        None | Some(Value::Null) => Err(ApiError::bad_field("payload", REQUIRED)),
        Some(payload) => validate_payload(kind, payload).map_err(ApiError::BadPayload),
    }
}

/// Validates `payload` against the shape required by `kind`.
pub fn validate_payload(kind: EventKind, payload: &Value) -> Result<EventPayload, FieldErrors> {
    let Value::Object(object) = payload else {
        return Err(FieldErrors::from([(
            "non_field_errors".to_string(),
            vec![NOT_OBJECT.to_string()],
        )]));
    };

    let mut reader = FieldReader::new(object);
    match kind {
        EventKind::Performance => {
            let url = reader.string("url", Some(MAX_URL_LENGTH));
            let method = reader.string("method", Some(MAX_METHOD_LENGTH));
            let status_code = reader.positive_int("status_code");
            let duration_ms = reader.positive_int("duration_ms");
            reader.finish(|| {
                Some(EventPayload::Performance(PerformancePayload {
                    url: url?,
                    method: method?,
                    status_code: status_code?,
                    duration_ms: duration_ms?,
                }))
            })
        }
        EventKind::Error => {
            let error_type = reader.string("error_type", Some(MAX_ERROR_TYPE_LENGTH));
            let error_message = reader.string("error_message", None);
            let traceback = reader.string("traceback", None);
            let url = reader.string("url", Some(MAX_URL_LENGTH));
            let method = reader.string("method", Some(MAX_METHOD_LENGTH));
            reader.finish(|| {
                Some(EventPayload::Error(ErrorPayload {
                    error_type: error_type?,
                    error_message: error_message?,
                    traceback: traceback?,
                    url: url?,
                    method: method?,
                }))
            })
        }
    }
}

struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: FieldErrors,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>) -> Self {
        FieldReader {
            object,
            errors: FieldErrors::new(),
        }
    }

    fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn present(&mut self, field: &str) -> Option<&'a Value> {
        let object = self.object;
        match object.get(field) {
            None => {
                self.reject(field, REQUIRED);
                None
            }
            Some(Value::Null) => {
                self.reject(field, NOT_NULL);
                None
            }
            Some(value) => Some(value),
        }
    }

    fn string(&mut self, field: &str, max_len: Option<usize>) -> Option<String> {
        let value = match self.present(field)? {
            Value::String(s) => s.clone(),
            // Numbers are coerced to their text form; booleans are not
            Value::Number(n) => n.to_string(),
            _ => {
                self.reject(field, NOT_STRING);
                return None;
            }
        };

        if value.trim().is_empty() {
            self.reject(field, NOT_BLANK);
            return None;
        }
        if let Some(max) = max_len
            && value.chars().count() > max
        {
            self.reject(
                field,
                format!("Ensure this field has no more than {max} characters."),
            );
            return None;
        }
        Some(value)
    }

    fn positive_int(&mut self, field: &str) -> Option<u32> {
        let value = self.present(field)?;
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };

        let Some(number) = parsed else {
            self.reject(field, NOT_INTEGER);
            return None;
        };
        if number < 0 {
            self.reject(field, "Ensure this value is greater than or equal to 0.");
            return None;
        }
        if number > MAX_POSITIVE_INT {
            self.reject(
                field,
                format!("Ensure this value is less than or equal to {MAX_POSITIVE_INT}."),
            );
            return None;
        }
        u32::try_from(number).ok()
    }

    fn finish<F>(self, build: F) -> Result<EventPayload, FieldErrors>
    where
        F: FnOnce() -> Option<EventPayload>,
    {
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        // Every field read without error yields a value
        build().ok_or(self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_errors(err: ApiError) -> FieldErrors {
        match err {
            ApiError::BadPayload(fields) => fields,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_valid_performance() {
        let body = json!({
            "type": "performance",
            "payload": {"url": "/api/items", "method": "GET", "status_code": 200, "duration_ms": "125", "extra": 1}
        });
        let payload = parse_envelope(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            payload,
            EventPayload::Performance(PerformancePayload {
                url: "/api/items".into(),
                method: "GET".into(),
                status_code: 200,
                duration_ms: 125,
            })
        );
    }

    #[test]
    fn test_valid_error() {
        let body = json!({
            "type": "error",
            "payload": {
                "error_type": "ValueError",
                "error_message": "bad value 42",
                "traceback": "File app.py, line 10",
                "url": "/checkout",
                "method": "POST"
            }
        });
        let payload = parse_envelope(body.to_string().as_bytes()).unwrap();
        assert_eq!(payload.kind(), EventKind::Error);
    }

    #[test]
    fn test_field_errors_collected() {
        let body = json!({
            "type": "performance",
            "payload": {"url": "", "method": "PROPFINDXXXX", "status_code": "abc", "duration_ms": -1}
        });
        let errors = field_errors(parse_envelope(body.to_string().as_bytes()).unwrap_err());

        assert_eq!(errors["url"], vec![NOT_BLANK.to_string()]);
        assert_eq!(
            errors["method"],
            vec!["Ensure this field has no more than 10 characters.".to_string()]
        );
        assert_eq!(errors["status_code"], vec![NOT_INTEGER.to_string()]);
        assert_eq!(
            errors["duration_ms"],
            vec!["Ensure this value is greater than or equal to 0.".to_string()]
        );
    }

    #[test]
    fn test_missing_and_null_fields() {
        let errors = validate_payload(
            EventKind::Error,
            &json!({"error_type": "KeyError", "traceback": null, "url": ["/x"], "method": "GET"}),
        )
        .unwrap_err();

        assert_eq!(errors.len(), 3);
        assert_eq!(errors["error_message"], vec![REQUIRED.to_string()]);
        assert_eq!(errors["traceback"], vec![NOT_NULL.to_string()]);
        assert_eq!(errors["url"], vec![NOT_STRING.to_string()]);
    }

    #[test]
    fn test_boolean_is_not_a_string() {
        let errors = validate_payload(
            EventKind::Error,
            &json!({
                "error_type": true,
                "error_message": 404,
                "traceback": "tb",
                "url": "/x",
                "method": false
            }),
        )
        .unwrap_err();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors["error_type"], vec![NOT_STRING.to_string()]);
        assert_eq!(errors["method"], vec![NOT_STRING.to_string()]);
    }

    #[test]
    fn test_integer_bounds() {
        let errors = validate_payload(
            EventKind::Performance,
            &json!({"url": "/", "method": "GET", "status_code": 2_147_483_648i64, "duration_ms": 1.5}),
        )
        .unwrap_err();
        assert_eq!(
            errors["status_code"],
            vec!["Ensure this value is less than or equal to 2147483647.".to_string()]
        );
        assert_eq!(errors["duration_ms"], vec![NOT_INTEGER.to_string()]);
    }

    #[test]
    fn test_envelope_errors() {
        let errors = field_errors(parse_envelope(b"not json").unwrap_err());
        assert!(errors.contains_key("non_field_errors"));

        let errors = field_errors(parse_envelope(b"[1, 2]").unwrap_err());
        assert_eq!(errors["non_field_errors"], vec![NOT_OBJECT.to_string()]);

        let errors = field_errors(
            parse_envelope(json!({"type": "trace", "payload": {}}).to_string().as_bytes())
                .unwrap_err(),
        );
        assert_eq!(
            errors["type"],
            vec!["Invalid data type specified".to_string()]
        );

        let errors =
            field_errors(parse_envelope(json!({"type": "error"}).to_string().as_bytes()).unwrap_err());
        assert_eq!(errors["payload"], vec![REQUIRED.to_string()]);

        let errors = field_errors(
            parse_envelope(json!({"type": "error", "payload": "x"}).to_string().as_bytes())
                .unwrap_err(),
        );
        assert_eq!(errors["non_field_errors"], vec![NOT_OBJECT.to_string()]);
    }
}
