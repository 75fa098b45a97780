//! The `Emit` envelope, the universal value envelope produced by every data source.
//!
//! At most one of `value`/`enum_value` is meaningful at a time; both absent
//! means "no data yet". Emits are immutable value objects; equality is
//! field-wise unless a pipeline supplies its own comparer.

use serde::{Deserialize, Serialize};

use crate::time;

/// A raw value envelope, before it is attributed to an observable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Emit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Emit {
    /// A numeric emit.
    #[must_use]
    pub fn value(value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// A symbolic emit.
    #[must_use]
    pub fn enum_value(enum_value: impl Into<String>) -> Self {
        Self {
            enum_value: Some(enum_value.into()),
            ..Self::default()
        }
    }

    /// An empty emit carrying only a diagnostic note.
    #[must_use]
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }

    /// Attach (or replace) the note, keeping value/enum fields.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether this emit carries neither a value nor an enum value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.enum_value.is_none()
    }

    /// Boolean interpretation used by expression conditions: a non-zero
    /// numeric value is true, everything else false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        self.value.is_some_and(|v| v != 0.0)
    }
}

/// An emit attributed to an observable, stamped with producer time.
///
/// The stamp comes from the simulated clock, not necessarily the wall
/// clock, so accelerated runs produce consistent timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableEmit {
    pub observable_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub stamp: f64,
}

impl ObservableEmit {
    /// Strip the attribution, returning the raw envelope.
    #[must_use]
    pub fn raw(&self) -> Emit {
        Emit {
            value: self.value,
            enum_value: self.enum_value.clone(),
            note: self.note.clone(),
        }
    }

    /// Encode as the wire tuple: `[id, stamp*10, value?, enum_value?, note?]`,
    /// trailing absent fields omitted. A present note forces all five slots.
    #[must_use]
    pub fn to_transport(&self) -> serde_json::Value {
        let mut tuple = vec![
            serde_json::Value::String(self.observable_id.clone()),
            serde_json::Value::from(stamp_to_transport(self.stamp)),
            self.value
                .map_or(serde_json::Value::Null, |v| serde_json::Value::String(v.to_string())),
        ];
        if self.note.is_some() {
            tuple.push(
                self.enum_value
                    .clone()
                    .map_or(serde_json::Value::Null, serde_json::Value::String),
            );
            tuple.push(serde_json::Value::String(
                self.note.clone().unwrap_or_default(),
            ));
        } else if let Some(enum_value) = self.enum_value.clone() {
            tuple.push(serde_json::Value::String(enum_value));
        }
        serde_json::Value::Array(tuple)
    }
}

/// Stamps travel as integers in tenths of a second.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn stamp_to_transport(stamp: f64) -> i64 {
    (stamp * 10.0) as i64
}

/// Attribute a raw emit to `id`, stamped with the current time.
#[must_use]
pub fn emit_raw(id: &str, raw: Emit) -> ObservableEmit {
    ObservableEmit {
        observable_id: id.to_string(),
        value: raw.value,
        enum_value: raw.enum_value,
        note: raw.note,
        stamp: time::now(),
    }
}

/// The "no data yet" emit for `id`.
#[must_use]
pub fn emit_empty(id: &str) -> ObservableEmit {
    emit_raw(id, Emit::note("empty default"))
}

/// A stamped numeric emit for `id`.
#[must_use]
pub fn emit_value(id: &str, value: f64) -> ObservableEmit {
    emit_raw(id, Emit::value(value))
}

/// A stamped symbolic emit for `id`.
#[must_use]
pub fn emit_enum(id: &str, enum_value: impl Into<String>) -> ObservableEmit {
    emit_raw(id, Emit::enum_value(enum_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_no_data() {
        let emit = Emit::default();
        assert!(emit.is_empty());
        assert!(!emit.truthy());
    }

    #[test]
    fn should_report_truthy_only_for_nonzero_values() {
        assert!(Emit::value(1.0).truthy());
        assert!(Emit::value(-0.5).truthy());
        assert!(!Emit::value(0.0).truthy());
        assert!(!Emit::enum_value("on").truthy());
    }

    #[test]
    fn should_stamp_attributed_emits() {
        let before = crate::time::now();
        let emit = emit_value("1:temp", 24.5);
        assert_eq!(emit.observable_id, "1:temp");
        assert_eq!(emit.value, Some(24.5));
        assert!(emit.stamp >= before);
    }

    #[test]
    fn should_strip_attribution_when_converting_to_raw() {
        let emit = emit_enum("1:mode", "day");
        let raw = emit.raw();
        assert_eq!(raw.enum_value.as_deref(), Some("day"));
        assert_eq!(raw.value, None);
    }

    #[test]
    fn should_encode_value_only_as_three_element_tuple() {
        let emit = ObservableEmit {
            observable_id: "1:temp".to_string(),
            value: Some(24.5),
            enum_value: None,
            note: None,
            stamp: 1000.0,
        };
        assert_eq!(
            emit.to_transport(),
            serde_json::json!(["1:temp", 10000, "24.5"])
        );
    }

    #[test]
    fn should_encode_enum_as_four_element_tuple() {
        let emit = ObservableEmit {
            observable_id: "1:mode?".to_string(),
            value: None,
            enum_value: Some("running".to_string()),
            note: None,
            stamp: 2.5,
        };
        assert_eq!(
            emit.to_transport(),
            serde_json::json!(["1:mode?", 25, null, "running"])
        );
    }

    #[test]
    fn should_encode_note_as_five_element_tuple() {
        let emit = ObservableEmit {
            observable_id: "1:ph?".to_string(),
            value: None,
            enum_value: Some("alarm".to_string()),
            note: Some("Value above 7.8".to_string()),
            stamp: 10.0,
        };
        assert_eq!(
            emit.to_transport(),
            serde_json::json!(["1:ph?", 100, null, "alarm", "Value above 7.8"])
        );
    }

    #[test]
    fn should_roundtrip_emit_through_serde_json() {
        let emit = Emit::value(1.5).with_note("hello");
        let json = serde_json::to_string(&emit).unwrap();
        let parsed: Emit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, emit);
    }
}
