//! Trace Event Format JSON ingestion
//!
//! Accepts either a bare JSON array of events or an object carrying a
//! `traceEvents` array. Anything else is not an event collection and is
//! rejected as a whole; individual defective elements are dropped and
//! reported as diagnostics.

use crate::config::TimestampUnit;
use crate::diagnostics::Diagnostics;
use crate::error::{ModelError, Result};
use crate::event::{Phase, RawEvent};
use fnv::FnvHasher;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::hash::Hasher;

/// One element of the wire array, before validation
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cat: String,
    #[serde(default)]
    ph: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    ts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    dur: Option<f64>,
    #[serde(default)]
    pid: Option<Value>,
    #[serde(default)]
    tid: Option<Value>,
    #[serde(default, deserialize_with = "string_or_number")]
    id: Option<String>,
    #[serde(default)]
    id2: Option<Value>,
    #[serde(default)]
    args: Option<Value>,
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Deserialize::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_string))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `id2` is `{"local": ..}` or `{"global": ..}`
fn id2_string(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    obj.get("local")
        .and_then(scalar_string)
        .map(|id| format!("local:{id}"))
        .or_else(|| {
            obj.get("global")
                .and_then(scalar_string)
                .map(|id| format!("global:{id}"))
        })
}

/// Numeric process/thread id; non-numeric strings get a stable FNV hash
pub fn numeric_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v as u64))
            .or_else(|| n.as_f64().map(|v| v as u64)),
        Value::String(s) => Some(s.trim().parse().unwrap_or_else(|_| fnv_hash(s))),
        _ => None,
    }
}

fn fnv_hash(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

/// Parse a trace document into raw events with millisecond timestamps
pub fn parse_trace_json(
    text: &str,
    unit: TimestampUnit,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<RawEvent>> {
    let document: Value = serde_json::from_str(text)?;
    parse_trace_value(document, unit, diagnostics)
}

pub fn parse_trace_value(
    document: Value,
    unit: TimestampUnit,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<RawEvent>> {
    let elements = match document {
        Value::Array(elements) => elements,
        Value::Object(mut obj) => match obj.remove("traceEvents") {
            Some(Value::Array(elements)) => elements,
            Some(_) => {
                return Err(ModelError::InvalidTrace(
                    "'traceEvents' is not an array".to_string(),
                ))
            }
            None => {
                return Err(ModelError::InvalidTrace(
                    "object has no 'traceEvents' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ModelError::InvalidTrace(
                "expected an array of events or an object with 'traceEvents'".to_string(),
            ))
        }
    };

    let mut events = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        if let Some(event) = convert_element(index, element, unit, diagnostics) {
            events.push(event);
        }
    }
    tracing::debug!(events = events.len(), "parsed trace document");
    Ok(events)
}

fn convert_element(
    index: usize,
    element: Value,
    unit: TimestampUnit,
    diagnostics: &mut Diagnostics,
) -> Option<RawEvent> {
    if !element.is_object() {
        diagnostics.malformed(format!("element #{index} is not an object"), None);
        return None;
    }
    let wire: WireEvent = match serde_json::from_value(element) {
        Ok(wire) => wire,
        Err(err) => {
            diagnostics.malformed(format!("element #{index}: {err}"), None);
            return None;
        }
    };

    let Some(name) = wire.name else {
        diagnostics.malformed(format!("element #{index} has no name"), None);
        return None;
    };
    let phase = match wire.ph.as_deref().map(Phase::from_code) {
        Some(Some(phase)) => phase,
        Some(None) | None => {
            diagnostics.malformed(
                format!("'{name}' has unknown phase {:?}", wire.ph.unwrap_or_default()),
                None,
            );
            return None;
        }
    };
    let timestamp = match (wire.ts, phase) {
        (Some(ts), _) if ts.is_finite() => unit.to_millis(ts),
        (_, Phase::Metadata) => 0.0,
        _ => {
            diagnostics.malformed(format!("'{name}' has no timestamp"), None);
            return None;
        }
    };

    let mut event = RawEvent::new(name, phase, timestamp);
    event.categories = wire
        .cat
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    event.pid = wire.pid.as_ref().and_then(numeric_id).unwrap_or(0);
    event.tid = wire.tid.as_ref().and_then(numeric_id).unwrap_or(0);
    event.id = wire.id.or_else(|| wire.id2.as_ref().and_then(id2_string));
    if let Some(Value::Object(args)) = wire.args {
        event.args = args;
    } else {
        event.args = Map::new();
    }

    match wire.dur {
        Some(dur) if dur.is_finite() && dur >= 0.0 => event.duration = Some(unit.to_millis(dur)),
        Some(dur) => {
            diagnostics.consistency(
                format!("'{}' has invalid duration {dur}; treated as zero", event.name),
                Some(timestamp),
            );
            if phase == Phase::Complete {
                event.duration = Some(0.0);
            }
        }
        None if phase == Phase::Complete => event.duration = Some(0.0),
        None => {}
    }
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;

    fn parse(text: &str) -> (Result<Vec<RawEvent>>, Diagnostics) {
        let mut diags = Diagnostics::default();
        let result = parse_trace_json(text, TimestampUnit::Micros, &mut diags);
        (result, diags)
    }

    #[test]
    fn test_array_and_object_forms() {
        let (events, _) = parse(r#"[{"name":"A","ph":"X","ts":1000,"dur":500,"pid":1,"tid":2}]"#);
        let events = events.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 1.0);
        assert_eq!(events[0].duration, Some(0.5));
        assert_eq!(events[0].thread().to_string(), "1:2");

        let (events, _) = parse(r#"{"traceEvents":[{"name":"A","ph":"I","ts":0}],"metadata":{}}"#);
        assert_eq!(events.unwrap().len(), 1);
    }

    #[test]
    fn test_top_level_rejected() {
        let (result, _) = parse(r#"{"events": []}"#);
        assert!(matches!(result, Err(ModelError::InvalidTrace(_))));
        let (result, _) = parse("42");
        assert!(matches!(result, Err(ModelError::InvalidTrace(_))));
        let (result, _) = parse("[{");
        assert!(matches!(result, Err(ModelError::Json(_))));
    }

    #[test]
    fn test_malformed_elements_dropped() {
        let (events, diags) = parse(
            r#"[
                "junk",
                {"ph":"X","ts":1},
                {"name":"NoTs","ph":"X"},
                {"name":"BadPhase","ph":"?","ts":1},
                {"name":"Good","ph":"B","ts":1}
            ]"#,
        );
        assert_eq!(events.unwrap().len(), 1);
        assert_eq!(diags.count(DiagnosticKind::MalformedEvent), 4);
    }

    #[test]
    fn test_metadata_defaults_timestamp() {
        let (events, diags) =
            parse(r#"[{"name":"thread_name","ph":"M","pid":1,"tid":1,"args":{"name":"CrRendererMain"}}]"#);
        let events = events.unwrap();
        assert_eq!(events[0].timestamp, 0.0);
        assert_eq!(events[0].arg_string("name").as_deref(), Some("CrRendererMain"));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_ids_and_string_pids() {
        let (events, _) = parse(
            r#"[
                {"name":"a","ph":"S","ts":1,"id":7,"pid":"browser","tid":"3"},
                {"name":"b","ph":"b","ts":1,"id2":{"local":"0x1"}},
                {"name":"c","ph":"b","ts":1,"id":"0xff"}
            ]"#,
        );
        let events = events.unwrap();
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].pid, fnv_hash("browser"));
        assert_eq!(events[0].tid, 3);
        assert_eq!(events[1].id.as_deref(), Some("local:0x1"));
        assert_eq!(events[2].id.as_deref(), Some("0xff"));
    }

    #[test]
    fn test_categories_split() {
        let (events, _) = parse(r#"[{"name":"x","cat":"devtools.timeline, v8","ph":"I","ts":5}]"#);
        let events = events.unwrap();
        assert_eq!(events[0].categories, vec!["devtools.timeline", "v8"]);
    }

    #[test]
    fn test_millis_unit() {
        let mut diags = Diagnostics::default();
        let events = parse_trace_json(
            r#"[{"name":"x","ph":"X","ts":3,"dur":2}]"#,
            TimestampUnit::Millis,
            &mut diags,
        )
        .unwrap();
        assert_eq!(events[0].timestamp, 3.0);
        assert_eq!(events[0].duration, Some(2.0));
    }

    #[test]
    fn test_complete_without_duration() {
        let (events, _) = parse(r#"[{"name":"x","ph":"X","ts":3}]"#);
        assert_eq!(events.unwrap()[0].duration, Some(0.0));
    }
}
