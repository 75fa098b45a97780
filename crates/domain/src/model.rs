//! Device and observable descriptors, the configuration model entities
//! are built from.
//!
//! Descriptors are plain serde data: the engine turns them into live
//! entities with reactive pipelines. The observable variants form a closed
//! set; an unknown kind is rejected at parse time, which is what makes an
//! unknown variant a fatal configuration error.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::expr::Expr;

/// Whether an entity takes part in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enablement {
    #[default]
    Enabled,
    Disabled,
    Discovered,
    Deleted,
    Ignored,
}

impl Enablement {
    /// Whether pipelines should exist for this enablement.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Enabled | Self::Discovered)
    }
}

/// A key/value driver parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// Reference to a driver, with its instantiation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

impl DriverRef {
    /// Look up a parameter value by key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

/// An alarm/warning condition given as a free-form expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub condition: Expr,
}

/// Threshold/condition requirements for numeric observables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueRequire {
    pub warning_above: Option<f64>,
    pub warning_below: Option<f64>,
    pub alarm_above: Option<f64>,
    pub alarm_below: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warning_conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alarm_conditions: Vec<Condition>,
}

/// Membership/condition requirements for symbolic observables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumRequire {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alarm_if_in: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alarm_if_not_in: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warning_conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alarm_conditions: Vec<Condition>,
}

/// Emit shaping for measures: rounding, rate limiting, and suppression of
/// insignificant changes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureEmitControl {
    pub decimals: Option<u32>,
    pub suppress_same_limit: Option<f64>,
    pub at_most_every_second: Option<f64>,
}

impl MeasureEmitControl {
    /// Fill unset fields from the measure's precision: the decimal count
    /// follows the precision's decimal places, and the suppression epsilon
    /// defaults to the precision itself.
    #[must_use]
    pub fn effective(control: Option<Self>, precision: Option<f64>) -> Option<Self> {
        let mut control = match (control, precision) {
            (None, None) => return None,
            (control, _) => control.unwrap_or_default(),
        };
        if let Some(precision) = precision {
            if control.decimals.is_none() {
                control.decimals = Some(decimals_of(precision));
            }
            if control.suppress_same_limit.is_none() {
                control.suppress_same_limit = Some(precision);
            }
        }
        Some(control)
    }
}

/// Decimal places needed to represent `precision` (e.g. 0.05 → 2).
#[must_use]
pub fn decimals_of(precision: f64) -> u32 {
    if precision >= 0.9999 {
        return 0;
    }
    let text = format!("{precision}");
    match text.find('.') {
        Some(dot) => u32::try_from(text.len() - dot - 1).unwrap_or(0),
        None => 0,
    }
}

/// Emit shaping for events.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventEmitControl {
    pub debounce_value: Option<f64>,
}

/// Fields shared by every observable kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableCommon {
    /// Local id, unique within the owning device.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub enablement: Enablement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
}

/// The closed set of observable kinds, used for dispatch and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservableKind {
    Measure,
    Amount,
    State,
    Event,
    Action,
    Chore,
}

impl ObservableKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Measure => "measure",
            Self::Amount => "amount",
            Self::State => "state",
            Self::Event => "event",
            Self::Action => "action",
            Self::Chore => "chore",
        }
    }
}

impl std::fmt::Display for ObservableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observable descriptor, dispatched on its declared kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObservableSpec {
    /// Read-only numeric quantity.
    Measure {
        #[serde(flatten)]
        common: ObservableCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        require: Option<ValueRequire>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emit_control: Option<MeasureEmitControl>,
    },
    /// Read/write numeric quantity with add/reset semantics.
    Amount {
        #[serde(flatten)]
        common: ObservableCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        require: Option<ValueRequire>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_expr: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset_expr: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        add_expr: Option<Expr>,
    },
    /// Read/write symbolic state.
    State {
        #[serde(flatten)]
        common: ObservableCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enum_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_expr: Option<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        require: Option<EnumRequire>,
    },
    /// Write-only symbolic pulse.
    Event {
        #[serde(flatten)]
        common: ObservableCommon,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emit_control: Option<EventEmitControl>,
    },
    /// Workflow observable; the step executor lives outside the core.
    Action {
        #[serde(flatten)]
        common: ObservableCommon,
    },
    /// Recurring-task observable; planning lives outside the core.
    Chore {
        #[serde(flatten)]
        common: ObservableCommon,
    },
}

impl ObservableSpec {
    /// The shared descriptor fields.
    #[must_use]
    pub fn common(&self) -> &ObservableCommon {
        match self {
            Self::Measure { common, .. }
            | Self::Amount { common, .. }
            | Self::State { common, .. }
            | Self::Event { common, .. }
            | Self::Action { common }
            | Self::Chore { common } => common,
        }
    }

    /// The declared kind.
    #[must_use]
    pub fn kind(&self) -> ObservableKind {
        match self {
            Self::Measure { .. } => ObservableKind::Measure,
            Self::Amount { .. } => ObservableKind::Amount,
            Self::State { .. } => ObservableKind::State,
            Self::Event { .. } => ObservableKind::Event,
            Self::Action { .. } => ObservableKind::Action,
            Self::Chore { .. } => ObservableKind::Chore,
        }
    }

    /// Whether this kind drives its own value subject instead of a driver
    /// or expression source.
    #[must_use]
    pub fn is_self_driven(&self) -> bool {
        matches!(self, Self::Action { .. } | Self::Chore { .. })
    }
}

/// A device descriptor: one driver and an ordered set of observables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Globally unique id; assigned sequentially by the registry when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Device type, matched by `>type:localId<` wildcard references.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub enablement: Enablement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observables: Vec<ObservableSpec>,
}

impl DeviceSpec {
    /// Check descriptor invariants: a non-empty name, non-empty and unique
    /// observable ids, and non-empty driver ids.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError("device name must not be empty".into()));
        }
        if let Some(driver) = &self.driver {
            if driver.id.trim().is_empty() {
                return Err(ConfigurationError(format!(
                    "device {} has a driver reference without an id",
                    self.name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for observable in &self.observables {
            let id = &observable.common().id;
            if id.trim().is_empty() {
                return Err(ConfigurationError(format!(
                    "device {} has an observable without an id",
                    self.name
                )));
            }
            if !seen.insert(id.clone()) {
                return Err(ConfigurationError(format!(
                    "device {} declares observable id {id} twice",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Qualified observable id: `deviceId:localId`.
#[must_use]
pub fn qualified_id(device_id: &str, local_id: &str) -> String {
    format!("{device_id}:{local_id}")
}

/// Status-stream id for an entity id: `id?`.
#[must_use]
pub fn status_id(id: &str) -> String {
    format!("{id}?")
}
