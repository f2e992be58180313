use itertools::Itertools;
use thiserror::Error;
use tracing::{error, warn};

/// Errors raised when a calling module misuses the registry. These indicate a defect in the
/// caller rather than bad user input, and the run is expected to stop on the first one.
#[derive(Debug, Error, PartialEq)]
pub enum OutputProcessorError {
    #[error("Invalid units '{units}' given for output variable '{name}'")]
    InvalidUnits { name: String, units: String },
    #[error("Output variable '{name} [{units}]' is longer than the maximum of {max} characters")]
    NameTooLong {
        name: String,
        units: String,
        max: usize,
    },
    #[error("A meter named '{0}' has already been created")]
    DuplicateMeter(String),
    #[error("Handle {index} is out of range for the {registry} registry (size {len})")]
    HandleOutOfRange {
        registry: &'static str,
        index: usize,
        len: usize,
    },
    #[error("Unknown {kind} token '{token}'")]
    UnknownToken { kind: &'static str, token: String },
    #[error("Output variable '{0}' is averaged and cannot be placed on a meter")]
    AveragedVariableOnMeter(String),
    #[error("Output variables cannot be registered once setup has been finalised")]
    RegistrationClosed,
    #[error("Reporting cannot start before setup has been finalised")]
    SetupNotFinalised,
    #[error("The update entry point was re-entered while an update was in progress")]
    UpdateInProgress,
}

/// Problems with user input. These are collected during a validating pass so that as many as
/// possible are surfaced before the run stops.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SevereInputError {
    #[error("Unrecognised resource type '{0}'")]
    UnknownResourceType(String),
    #[error("Unrecognised end use '{0}'")]
    UnknownEndUse(String),
    #[error("Unrecognised meter group '{0}'")]
    UnknownGroup(String),
    #[error("Schedule '{schedule}' requested for output variable '{variable}' was not found")]
    UnknownSchedule { variable: String, schedule: String },
    #[error("Meter:Custom '{meter}' has a malformed entry at position {position}")]
    MalformedCustomEntry { meter: String, position: usize },
    #[error("Meter:Custom '{0}' duplicates the name of an existing meter")]
    DuplicateCustomMeter(String),
    #[error("Meter:CustomDecrement '{meter}' refers to source meter '{source_meter}' which does not exist")]
    UnknownSourceMeter { meter: String, source_meter: String },
    #[error("Meter:CustomDecrement '{meter}' entry '{key}:{variable}' is not on source meter '{source_meter}'")]
    DecrementEntryNotOnSource {
        meter: String,
        key: String,
        variable: String,
        source_meter: String,
    },
}

/// Raised once a validating pass that accumulated one or more severe input errors completes.
#[derive(Debug, Error)]
#[error(
    "Terminated after {} severe input error(s): {}",
    .errors.len(),
    .errors.iter().join("; ")
)]
pub struct DeferredFatalError {
    pub errors: Vec<SevereInputError>,
}

/// Collects severe input errors during a validating pass.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    errors: Vec<SevereInputError>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&mut self, err: SevereInputError) {
        error!("{err}");
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[SevereInputError] {
        &self.errors
    }

    /// Drains the accumulated errors, failing if there were any.
    pub fn check(&mut self) -> Result<(), DeferredFatalError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(DeferredFatalError {
                errors: std::mem::take(&mut self.errors),
            })
        }
    }
}

/// Recoverable problems, logged as they happen and kept for inspection after the run.
#[derive(Clone, Debug, Default)]
pub struct Warnings {
    messages: Vec<String>,
}

impl Warnings {
    pub fn push(&mut self, message: String) {
        warn!("{message}");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
