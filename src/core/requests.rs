use crate::core::frequency::ReportingFrequency;
use crate::core::schedule::ScheduleLookup;
use crate::errors::{ErrorAccumulator, SevereInputError, Warnings};
use crate::input::OutputVariableRequest;
use indexmap::IndexSet;
use tracing::debug;

/// Blank or `*` keys match every key.
pub fn is_wildcard_key(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || key == "*"
}

/// The key as echoed back to the user, with wildcards shown as `*`.
pub fn display_key(key: &str) -> &str {
    if is_wildcard_key(key) {
        "*"
    } else {
        key.trim()
    }
}

/// A user request to report a variable, resolved against the schedule engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRequest {
    pub key: String,
    pub variable_name: String,
    pub frequency: ReportingFrequency,
    pub schedule: Option<usize>,
    pub consumed: bool,
}

/// One distinct way a matched variable should be reported.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RequestMatch {
    pub frequency: ReportingFrequency,
    pub schedule: Option<usize>,
}

/// Matches user report requests against variables as they are registered.
#[derive(Debug)]
pub struct RequestResolver {
    input: Vec<OutputVariableRequest>,
    minimum_frequency: Option<ReportingFrequency>,
    requests: Option<Vec<ReportRequest>>,
}

impl RequestResolver {
    pub fn new(
        input: Vec<OutputVariableRequest>,
        minimum_frequency: Option<ReportingFrequency>,
    ) -> Self {
        Self {
            input,
            minimum_frequency,
            requests: None,
        }
    }

    /// Applies the minimum reporting frequency, which only ever makes a frequency coarser.
    pub fn apply_floor(&self, frequency: ReportingFrequency) -> ReportingFrequency {
        match self.minimum_frequency {
            Some(floor) => frequency.max(floor),
            None => frequency,
        }
    }

    /// Parses the requests the first time they are needed.
    fn loaded(
        &mut self,
        schedules: &dyn ScheduleLookup,
        errors: &mut ErrorAccumulator,
    ) -> &mut Vec<ReportRequest> {
        if self.requests.is_none() {
            let mut requests = Vec::with_capacity(self.input.len());
            for request in &self.input {
                let schedule = match request.schedule.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() => match schedules.schedule_index(name) {
                        Some(index) => Some(index),
                        None => {
                            errors.push(SevereInputError::UnknownSchedule {
                                variable: request.variable_name.clone(),
                                schedule: name.to_string(),
                            });
                            continue;
                        }
                    },
                    _ => None,
                };
                requests.push(ReportRequest {
                    key: request.key.trim().to_string(),
                    variable_name: request.variable_name.trim().to_string(),
                    frequency: self.apply_floor(request.frequency),
                    schedule,
                    consumed: false,
                });
            }
            debug!("Loaded {} output variable requests", requests.len());
            self.requests = Some(requests);
        }
        self.requests.get_or_insert_with(Vec::new)
    }

    /// Finds every request for this variable, marking them all consumed, and returns one match
    /// per distinct frequency and schedule.
    pub fn match_requests(
        &mut self,
        key: &str,
        variable_name: &str,
        schedules: &dyn ScheduleLookup,
        errors: &mut ErrorAccumulator,
    ) -> Vec<RequestMatch> {
        let mut matches = IndexSet::new();
        for request in self.loaded(schedules, errors).iter_mut() {
            if request.variable_name.eq_ignore_ascii_case(variable_name.trim())
                && (is_wildcard_key(&request.key) || request.key.eq_ignore_ascii_case(key.trim()))
            {
                request.consumed = true;
                matches.insert(RequestMatch {
                    frequency: request.frequency,
                    schedule: request.schedule,
                });
            }
        }
        matches.into_iter().collect()
    }

    pub fn ensure_loaded(&mut self, schedules: &dyn ScheduleLookup, errors: &mut ErrorAccumulator) {
        self.loaded(schedules, errors);
    }

    pub fn requests(&self) -> &[ReportRequest] {
        self.requests.as_deref().unwrap_or_default()
    }

    /// Warns once for every request that never matched a registered variable.
    pub fn audit_unconsumed(&self, warnings: &mut Warnings) -> usize {
        let unconsumed: Vec<&ReportRequest> =
            self.requests().iter().filter(|r| !r.consumed).collect();
        for request in &unconsumed {
            warnings.push(format!(
                "Output:Variable={},{},{} was requested but never matched a registered variable",
                display_key(&request.key),
                request.variable_name,
                request.frequency
            ));
        }
        unconsumed.len()
    }
}
