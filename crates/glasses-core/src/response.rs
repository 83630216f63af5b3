//! Typed decode and interpretation of the inference service's reply.
//!
//! Fields are read in a fixed precedence: `recognized_faces`, `unknown_faces`,
//! `objects`, `context`. Only the two face fields influence the recognition
//! result, and a later field never overrides an earlier one.
//!
//! Decoding is lenient below the top level: a field of the wrong type reads as
//! absent and a list entry that is not an object is skipped. Only a body that
//! is not a JSON object is rejected.

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::status::{RecognitionResult, truncate_name, truncate_to};

/// Characters of the raw body shown in the preview line.
pub const PREVIEW_CHARS: usize = 57;
/// Longest line handed to the display, in bytes.
pub const DISPLAY_LINE_CAPACITY: usize = 63;

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response body is empty")]
    Empty,
    #[error("response body is not valid analysis JSON")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AnalysisResponse {
    #[serde(default, deserialize_with = "entries")]
    pub recognized_faces: Option<Vec<Labelled>>,
    #[serde(default, deserialize_with = "count")]
    pub unknown_faces: Option<i64>,
    #[serde(default, deserialize_with = "entries")]
    pub objects: Option<Vec<Labelled>>,
    #[serde(default, deserialize_with = "lenient")]
    pub context: Option<String>,
}

/// A named detection with its confidence in `0.0..=1.0`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Labelled {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Option<f64>,
}

/// Any value that does not fit `T` reads as `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Array of detections; entries that are not objects are dropped.
fn entries<'de, D>(deserializer: D) -> Result<Option<Vec<Labelled>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
    ))
}

/// Integer count; a float is truncated toward zero.
fn count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_i64()
        .or_else(|| value.as_f64().map(|count| count as i64)))
}

impl Labelled {
    /// Name and confidence, or `None` when either is missing.
    fn complete(&self) -> Option<(&str, f64)> {
        match (&self.name, self.confidence) {
            (Some(name), Some(confidence)) => Some((name.as_str(), confidence)),
            _ => None,
        }
    }
}

/// Display lines and recognition result derived from one response.
#[derive(Clone, Debug, PartialEq)]
pub struct Interpretation {
    pub lines: Vec<String>,
    pub result: RecognitionResult,
}

pub fn decode(body: &str) -> Result<AnalysisResponse, ResponseError> {
    if body.trim().is_empty() {
        return Err(ResponseError::Empty);
    }
    Ok(serde_json::from_str(body)?)
}

/// `Resp: ` followed by the start of the raw body.
pub fn preview_line(body: &str) -> String {
    let head: String = body.chars().take(PREVIEW_CHARS).collect();
    format!("Resp: {head}")
}

impl AnalysisResponse {
    pub fn interpret(&self) -> Interpretation {
        let mut lines = Vec::new();
        let mut result = None;

        for face in self.recognized_faces.iter().flatten() {
            let Some((name, confidence)) = face.complete() else {
                continue;
            };
            lines.push(display_line(&format!(
                "Hello {name}! ({:.0}%)",
                confidence * 100.0
            )));
            result = Some(RecognitionResult::Recognized {
                id: face.id,
                name: truncate_name(name),
            });
        }

        if let Some(count) = self.unknown_faces.filter(|count| *count > 0) {
            tracing::debug!("unknown faces detected: {count}");
            lines.push("Unknown person".to_string());
            result.get_or_insert(RecognitionResult::Unknown);
        }

        for object in self.objects.iter().flatten() {
            let Some((name, confidence)) = object.complete() else {
                continue;
            };
            tracing::debug!("object detected: {name} ({:.0}%)", confidence * 100.0);
            lines.push(display_line(&format!("Object: {name}")));
        }

        if let Some(context) = &self.context {
            lines.push(display_line(context));
        }

        Interpretation {
            lines,
            result: result.unwrap_or(RecognitionResult::NoFace),
        }
    }
}

fn display_line(text: &str) -> String {
    truncate_to(text, DISPLAY_LINE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpret(body: &str) -> Interpretation {
        decode(body).unwrap().interpret()
    }

    #[test]
    fn recognized_face_is_greeted_with_confidence() {
        let out = interpret(r#"{"recognized_faces":[{"name":"Alice","confidence":0.92}]}"#);
        assert_eq!(out.lines, vec!["Hello Alice! (92%)".to_string()]);
        assert_eq!(
            out.result,
            RecognitionResult::Recognized {
                id: None,
                name: "Alice".into()
            }
        );
    }

    #[test]
    fn latest_recognized_face_wins() {
        let out = interpret(
            r#"{"recognized_faces":[
                {"name":"Alice","confidence":0.92},
                {"id":7,"name":"Bob","confidence":0.81}
            ]}"#,
        );
        assert_eq!(out.lines.len(), 2);
        assert_eq!(
            out.result,
            RecognitionResult::Recognized {
                id: Some(7),
                name: "Bob".into()
            }
        );
    }

    #[test]
    fn unknown_faces_signal_an_unrecognized_person() {
        let out = interpret(r#"{"unknown_faces":1}"#);
        assert_eq!(out.lines, vec!["Unknown person".to_string()]);
        assert_eq!(out.result, RecognitionResult::Unknown);
    }

    #[test]
    fn unknown_faces_do_not_override_a_recognized_face() {
        let out = interpret(
            r#"{"recognized_faces":[{"name":"Alice","confidence":0.5}],"unknown_faces":2}"#,
        );
        assert_eq!(out.lines, vec!["Hello Alice! (50%)", "Unknown person"]);
        assert!(matches!(out.result, RecognitionResult::Recognized { .. }));
    }

    #[test]
    fn objects_and_context_are_presented_without_touching_faces() {
        let out = interpret(
            r#"{"objects":[{"name":"laptop","confidence":0.78},{"name":"pen"}],
                "context":"You're in an office environment"}"#,
        );
        assert_eq!(
            out.lines,
            vec!["Object: laptop", "You're in an office environment"]
        );
        assert_eq!(out.result, RecognitionResult::NoFace);
    }

    #[test]
    fn incomplete_face_entries_are_skipped() {
        let out = interpret(r#"{"recognized_faces":[{"name":"Alice"},{"confidence":0.4}]}"#);
        assert!(out.lines.is_empty());
        assert_eq!(out.result, RecognitionResult::NoFace);
    }

    #[test]
    fn zero_unknown_faces_is_not_reported() {
        let out = interpret(r#"{"unknown_faces":0,"recognized_faces":[]}"#);
        assert!(out.lines.is_empty());
        assert_eq!(out.result, RecognitionResult::NoFace);
    }

    #[test]
    fn malformed_and_empty_bodies_are_errors() {
        assert!(matches!(decode("not json"), Err(ResponseError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(ResponseError::Malformed(_))));
        assert!(matches!(decode("  "), Err(ResponseError::Empty)));
    }

    #[test]
    fn mistyped_face_entry_does_not_hide_the_valid_one() {
        let out = interpret(
            r#"{"recognized_faces":[{"name":"Alice","confidence":0.92},{"name":42,"confidence":0.5},"Bob"]}"#,
        );
        assert_eq!(out.lines, vec!["Hello Alice! (92%)"]);
        assert_eq!(
            out.result,
            RecognitionResult::Recognized {
                id: None,
                name: "Alice".into()
            }
        );
    }

    #[test]
    fn fractional_unknown_count_is_accepted() {
        let out = interpret(r#"{"unknown_faces":1.0}"#);
        assert_eq!(out.result, RecognitionResult::Unknown);
        assert_eq!(out.lines, vec!["Unknown person"]);

        let out = interpret(r#"{"unknown_faces":"many"}"#);
        assert_eq!(out.result, RecognitionResult::NoFace);
    }

    #[test]
    fn non_text_context_is_ignored() {
        let out = interpret(
            r#"{"recognized_faces":[{"name":"Alice","confidence":0.92}],"context":{"scene":"office"}}"#,
        );
        assert_eq!(out.lines, vec!["Hello Alice! (92%)"]);
        assert!(matches!(out.result, RecognitionResult::Recognized { .. }));
    }

    #[test]
    fn mistyped_lists_read_as_absent() {
        let out = interpret(r#"{"recognized_faces":{"name":"Alice"},"objects":null}"#);
        assert!(out.lines.is_empty());
        assert_eq!(out.result, RecognitionResult::NoFace);
    }

    #[test]
    fn preview_is_bounded() {
        let body = "x".repeat(200);
        let line = preview_line(&body);
        assert_eq!(line.len(), "Resp: ".len() + PREVIEW_CHARS);
    }

    #[test]
    fn long_context_is_cut_for_the_display() {
        let context = "a".repeat(100);
        let out = interpret(&format!(r#"{{"context":"{context}"}}"#));
        assert_eq!(out.lines[0].len(), DISPLAY_LINE_CAPACITY);
    }

    #[test]
    fn identical_responses_interpret_identically() {
        let body = r#"{"recognized_faces":[{"name":"Alice","confidence":0.92}],"objects":[{"name":"cup","confidence":0.8}]}"#;
        assert_eq!(interpret(body), interpret(body));
    }
}
