use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PositionError {
    #[error("resume point must be a JSON object")]
    NotAnObject,
}

//
// ─── LAST POSITION ─────────────────────────────────────────────────────────────
//

/// Last-known resume point within a lesson.
///
/// The payload is opaque to the sync layer: the lesson player decides what it
/// stores (slide index, audio offset, ...). Validation is shallow — anything
/// that is a JSON object is accepted, so malformed positions are rejected here
/// rather than by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LastPosition(Value);

impl LastPosition {
    /// Wraps an arbitrary JSON object as a resume point.
    ///
    /// # Errors
    ///
    /// Returns `PositionError::NotAnObject` for any non-object payload.
    pub fn new(value: Value) -> Result<Self, PositionError> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(PositionError::NotAnObject)
        }
    }

    /// Convenience constructor for the slide/audio player shape.
    #[must_use]
    pub fn slide_audio(slide: u32, audio_seconds: f64, captured_at: DateTime<Utc>) -> Self {
        Self(json!({
            "slide": slide,
            "audioTime": audio_seconds,
            "timestamp": captured_at.timestamp_millis(),
        }))
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn accepts_object_payloads() {
        let pos = LastPosition::new(json!({"slide": 2})).unwrap();
        assert_eq!(pos.as_value()["slide"], 2);
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert_eq!(
            LastPosition::new(json!(42)).unwrap_err(),
            PositionError::NotAnObject
        );
        assert_eq!(
            LastPosition::new(json!("slide 2")).unwrap_err(),
            PositionError::NotAnObject
        );
        assert_eq!(
            LastPosition::new(Value::Null).unwrap_err(),
            PositionError::NotAnObject
        );
    }

    #[test]
    fn slide_audio_carries_player_fields() {
        let pos = LastPosition::slide_audio(3, 12.5, fixed_now());
        assert_eq!(pos.as_value()["slide"], 3);
        assert_eq!(pos.as_value()["audioTime"], 12.5);
        assert_eq!(
            pos.as_value()["timestamp"],
            fixed_now().timestamp_millis()
        );
    }

    #[test]
    fn serializes_transparently() {
        let pos = LastPosition::new(json!({"slide": 1})).unwrap();
        let text = serde_json::to_string(&pos).unwrap();
        assert_eq!(text, r#"{"slide":1}"#);
        let back: LastPosition = serde_json::from_str(&text).unwrap();
        assert_eq!(back, pos);
    }
}
