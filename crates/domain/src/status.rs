//! Status enums covering entity health states and driver lifecycle states.
//!
//! Statuses travel through pipelines as the `enum_value` of an [`Emit`],
//! so both enums expose stable lowercase string forms.

use serde::{Deserialize, Serialize};

use crate::emit::Emit;

/// Health/operational state of a device or observable.
///
/// This is a continuous signal, not a lifecycle: there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Running,
    ScheduleRunning,
    ProgramRunning,
    Idle,
    StepsRunning,
    WaitingInput,
    Paused,
    Warning,
    Alarm,
    Error,
    Initializing,
    Disabled,
}

impl Status {
    /// Stable string form, as carried in `Emit.enum_value`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ScheduleRunning => "schedule_running",
            Self::ProgramRunning => "program_running",
            Self::Idle => "idle",
            Self::StepsRunning => "steps_running",
            Self::WaitingInput => "waiting_input",
            Self::Paused => "paused",
            Self::Warning => "warning",
            Self::Alarm => "alarm",
            Self::Error => "error",
            Self::Initializing => "initializing",
            Self::Disabled => "disabled",
        }
    }

    /// Whether `emit` carries this status as its enum value.
    #[must_use]
    pub fn matches(self, emit: &Emit) -> bool {
        emit.enum_value.as_deref() == Some(self.as_str())
    }

    /// An emit carrying this status.
    #[must_use]
    pub fn emit(self) -> Emit {
        Emit::enum_value(self.as_str())
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state reported by a driver on its status stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    NoInit,
    NotStarted,
    Starting,
    Running,
    ProgramRunning,
    ScheduleRunning,
    InError,
    Closing,
}

impl DriverStatus {
    /// Stable string form, as carried in `Emit.enum_value`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoInit => "no_init",
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ProgramRunning => "program_running",
            Self::ScheduleRunning => "schedule_running",
            Self::InError => "in_error",
            Self::Closing => "closing",
        }
    }

    /// Whether `emit` carries this driver status as its enum value.
    #[must_use]
    pub fn matches(self, emit: &Emit) -> bool {
        emit.enum_value.as_deref() == Some(self.as_str())
    }

    /// An emit carrying this driver status.
    #[must_use]
    pub fn emit(self) -> Emit {
        Emit::enum_value(self.as_str())
    }

    /// Whether this state counts as actively producing data.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Running | Self::ProgramRunning | Self::ScheduleRunning
        )
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_status_as_snake_case() {
        let json = serde_json::to_string(&Status::StepsRunning).unwrap();
        assert_eq!(json, "\"steps_running\"");
        let parsed: Status = serde_json::from_str("\"alarm\"").unwrap();
        assert_eq!(parsed, Status::Alarm);
    }

    #[test]
    fn should_match_emits_by_enum_value() {
        let emit = Status::Paused.emit();
        assert!(Status::Paused.matches(&emit));
        assert!(!Status::Running.matches(&emit));
        assert!(!Status::Paused.matches(&Emit::value(1.0)));
    }

    #[test]
    fn should_display_the_wire_form() {
        assert_eq!(Status::WaitingInput.to_string(), "waiting_input");
        assert_eq!(DriverStatus::InError.to_string(), "in_error");
    }

    #[test]
    fn should_classify_running_driver_states() {
        assert!(DriverStatus::Running.is_running());
        assert!(DriverStatus::ProgramRunning.is_running());
        assert!(DriverStatus::ScheduleRunning.is_running());
        assert!(!DriverStatus::Starting.is_running());
        assert!(!DriverStatus::Closing.is_running());
    }

    #[test]
    fn should_share_the_running_wire_form_between_enums() {
        // Observable pipelines compare driver statuses against Status
        // strings, so the overlapping variants must agree.
        assert_eq!(Status::Running.as_str(), DriverStatus::Running.as_str());
        assert_eq!(
            Status::ProgramRunning.as_str(),
            DriverStatus::ProgramRunning.as_str()
        );
        assert_eq!(
            Status::ScheduleRunning.as_str(),
            DriverStatus::ScheduleRunning.as_str()
        );
    }
}
