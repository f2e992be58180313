use crate::core::frequency::{StoreType, TimeStepDomain};
use crate::core::meters::MeterStore;
use crate::core::requests::is_wildcard_key;
use crate::core::schedule::ScheduleLookup;
use crate::core::variables::{VariableKind, VariableStore};
use crate::errors::OutputProcessorError;
use indexmap::IndexSet;
use serde::Serialize;

/// Opaque reference to something whose value other subsystems can read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Handle {
    Real(usize),
    Integer(usize),
    Meter(usize),
    Schedule(usize),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum HandleKind {
    Real,
    Integer,
    Meter,
    Schedule,
}

impl From<VariableKind> for HandleKind {
    fn from(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Real => Self::Real,
            VariableKind::Integer => Self::Integer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyCountAndType {
    /// number of distinct keys the name is registered under
    pub count: usize,
    pub kind: HandleKind,
    pub store_type: StoreType,
    pub domain: TimeStepDomain,
    pub units: String,
}

const METER_KEY: &str = "Meter";
const SCHEDULE_KEY: &str = "Environment";

/// Read-only lookups over the registries.
#[derive(Clone, Copy, Debug)]
pub struct Query<'a> {
    pub variables: &'a VariableStore,
    pub meters: &'a MeterStore,
    pub schedules: &'a dyn ScheduleLookup,
}

impl<'a> Query<'a> {
    /// Looks a name up among known output variables, then meters, then schedules, returning
    /// the first category that has it.
    pub fn find_variable_key_count_and_type(&self, name: &str) -> Option<KeyCountAndType> {
        if let Some(entry) = self.variables.catalog_entry(name) {
            return Some(KeyCountAndType {
                count: self.distinct_keys(name, entry.kind).len(),
                kind: entry.kind.into(),
                store_type: entry.store_type,
                domain: entry.domain,
                units: entry.units.clone(),
            });
        }
        if let Some(index) = self.meters.find(name) {
            let units = self
                .meters
                .meters()
                .get(index)
                .map(|meter| meter.units.clone())
                .unwrap_or_default();
            return Some(KeyCountAndType {
                count: 1,
                kind: HandleKind::Meter,
                store_type: StoreType::Summed,
                domain: TimeStepDomain::Zone,
                units,
            });
        }
        self.schedules
            .schedule_index(name)
            .map(|_| KeyCountAndType {
                count: 1,
                kind: HandleKind::Schedule,
                store_type: StoreType::Averaged,
                domain: TimeStepDomain::Zone,
                units: String::new(),
            })
    }

    /// Every key a name can be read under, each with a handle to its first descriptor.
    pub fn variable_keys(&self, name: &str, kind: HandleKind) -> Vec<(String, Handle)> {
        match kind {
            HandleKind::Real => self.distinct_keys(name, VariableKind::Real),
            HandleKind::Integer => self.distinct_keys(name, VariableKind::Integer),
            HandleKind::Meter => self
                .meters
                .find(name)
                .map(|index| vec![(METER_KEY.to_string(), Handle::Meter(index))])
                .unwrap_or_default(),
            HandleKind::Schedule => self
                .schedules
                .schedule_index(name)
                .map(|index| vec![(SCHEDULE_KEY.to_string(), Handle::Schedule(index))])
                .unwrap_or_default(),
        }
    }

    fn distinct_keys(&self, name: &str, kind: VariableKind) -> Vec<(String, Handle)> {
        let name = name.trim();
        let mut seen = IndexSet::new();
        self.variables
            .summaries()
            .filter(|(id, summary)| id.kind == kind && summary.name.eq_ignore_ascii_case(name))
            .filter(|(_, summary)| seen.insert(summary.key.to_uppercase()))
            .map(|(id, summary)| {
                let handle = match id.kind {
                    VariableKind::Real => Handle::Real(id.index),
                    VariableKind::Integer => Handle::Integer(id.index),
                };
                (summary.key.to_string(), handle)
            })
            .collect()
    }

    /// The value as of now: the provider's current reading, a meter's total over the last
    /// closed timestep, or a schedule's current value.
    pub fn current_value(&self, handle: Handle) -> Result<f64, OutputProcessorError> {
        Ok(match handle {
            Handle::Real(index) => self.variables.real(index)?.read(),
            Handle::Integer(index) => self.variables.integer(index)?.read(),
            Handle::Meter(index) => self.meters.meter(index)?.last_timestep_value(),
            Handle::Schedule(index) => {
                self.check_schedule(index)?;
                self.schedules.current_value(index)
            }
        })
    }

    /// The value most recently written out for a variable. Meters and schedules have no
    /// separate reported value, so give their current one.
    pub fn accumulated_last_value(&self, handle: Handle) -> Result<f64, OutputProcessorError> {
        match handle {
            Handle::Real(index) => Ok(self.variables.real(index)?.last_reported()),
            Handle::Integer(index) => Ok(self.variables.integer(index)?.last_reported()),
            Handle::Meter(_) | Handle::Schedule(_) => self.current_value(handle),
        }
    }

    fn check_schedule(&self, index: usize) -> Result<(), OutputProcessorError> {
        let len = self.schedules.schedule_count();
        if index < len {
            Ok(())
        } else {
            Err(OutputProcessorError::HandleOutOfRange {
                registry: "schedule",
                index,
                len,
            })
        }
    }

    /// Whether any descriptor of this name is written out, under the given key or any key if
    /// the key is blank or `*`.
    pub fn is_reported(&self, name: &str, key: &str) -> bool {
        let any_key = is_wildcard_key(key);
        self.variables.summaries().any(|(_, summary)| {
            summary.setup.report
                && summary.name.eq_ignore_ascii_case(name.trim())
                && (any_key || summary.key.eq_ignore_ascii_case(key.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frequency::ReportingFrequency;
    use crate::core::meters::taxonomy::MeterTags;
    use crate::core::schedule::DaySchedules;
    use crate::core::variables::{Constant, ReportingSetup, VariableDescriptor};
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::sync::Arc;

    struct Registries {
        variables: VariableStore,
        meters: MeterStore,
        schedules: DaySchedules,
    }

    impl Registries {
        fn query(&self) -> Query<'_> {
            Query {
                variables: &self.variables,
                meters: &self.meters,
                schedules: &self.schedules,
            }
        }
    }

    fn setup(report: bool, frequency: ReportingFrequency) -> ReportingSetup {
        ReportingSetup {
            report,
            frequency,
            schedule: None,
            feeds_meters: true,
        }
    }

    #[fixture]
    fn registries() -> Registries {
        let mut variables = VariableStore::new();
        for (key, value, report, frequency) in [
            ("ZONE1", 21., true, ReportingFrequency::Hourly),
            ("ZONE1", 21., true, ReportingFrequency::Monthly),
            ("ZONE2", 19., false, ReportingFrequency::Hourly),
        ] {
            variables.catalog_variable(
                "Zone Mean Air Temperature",
                VariableKind::Real,
                TimeStepDomain::Zone,
                StoreType::Averaged,
                "C",
            );
            variables.push_real(VariableDescriptor::new(
                7,
                "Zone Mean Air Temperature",
                key,
                "C",
                TimeStepDomain::Zone,
                StoreType::Averaged,
                Arc::new(Constant(value)),
                setup(report, frequency),
            ));
        }
        variables.catalog_variable(
            "Heat Pump Cycles",
            VariableKind::Integer,
            TimeStepDomain::System,
            StoreType::Summed,
            "count",
        );
        variables.push_integer(VariableDescriptor::new(
            10,
            "Heat Pump Cycles",
            "HP1",
            "count",
            TimeStepDomain::System,
            StoreType::Summed,
            Arc::new(Constant(4)),
            setup(true, ReportingFrequency::Daily),
        ));

        let mut meters = MeterStore::new();
        let tags = MeterTags::parse("Electricity", None, None, None, None).unwrap();
        for path in tags.meter_paths() {
            meters.get_or_create_meter(&path, "J");
        }

        let mut schedules = DaySchedules::new();
        schedules.add("Always On", &[1.; 24]).unwrap();

        Registries {
            variables,
            meters,
            schedules,
        }
    }

    #[rstest]
    fn should_count_distinct_keys_once(registries: Registries) {
        let found = registries
            .query()
            .find_variable_key_count_and_type("zone mean air temperature")
            .unwrap();
        assert_eq!(
            found,
            KeyCountAndType {
                count: 2,
                kind: HandleKind::Real,
                store_type: StoreType::Averaged,
                domain: TimeStepDomain::Zone,
                units: "C".into(),
            }
        );
        assert_eq!(
            registries
                .query()
                .variable_keys("Zone Mean Air Temperature", HandleKind::Real),
            vec![
                ("ZONE1".to_string(), Handle::Real(0)),
                ("ZONE2".to_string(), Handle::Real(2))
            ]
        );
    }

    #[rstest]
    fn should_fall_back_to_meters_then_schedules(registries: Registries) {
        let query = registries.query();
        let meter = query
            .find_variable_key_count_and_type("Electricity:Facility")
            .unwrap();
        assert_eq!((meter.count, meter.kind), (1, HandleKind::Meter));
        assert_eq!(
            query.variable_keys("Electricity:Facility", HandleKind::Meter),
            vec![("Meter".to_string(), Handle::Meter(0))]
        );

        let schedule = query.find_variable_key_count_and_type("ALWAYS ON").unwrap();
        assert_eq!(schedule.kind, HandleKind::Schedule);
        assert_eq!(
            query.variable_keys("Always On", HandleKind::Schedule),
            vec![("Environment".to_string(), Handle::Schedule(0))]
        );

        assert_eq!(query.find_variable_key_count_and_type("Nothing"), None);
    }

    #[rstest]
    fn should_read_current_values(registries: Registries) {
        let query = registries.query();
        assert_eq!(query.current_value(Handle::Real(2)), Ok(19.));
        assert_eq!(query.current_value(Handle::Integer(0)), Ok(4.));
        assert_eq!(query.current_value(Handle::Meter(0)), Ok(0.));
        registries.schedules.set_hour(3);
        assert_eq!(query.current_value(Handle::Schedule(0)), Ok(1.));
        assert_eq!(query.accumulated_last_value(Handle::Real(0)), Ok(0.));
    }

    #[rstest]
    fn should_reject_handles_out_of_range(registries: Registries) {
        let query = registries.query();
        assert_eq!(
            query.current_value(Handle::Real(3)),
            Err(OutputProcessorError::HandleOutOfRange {
                registry: "real variable",
                index: 3,
                len: 3
            })
        );
        assert_eq!(
            query.current_value(Handle::Schedule(1)),
            Err(OutputProcessorError::HandleOutOfRange {
                registry: "schedule",
                index: 1,
                len: 1
            })
        );
    }

    #[rstest]
    fn should_tell_whether_a_variable_is_reported(registries: Registries) {
        let query = registries.query();
        assert!(query.is_reported("Zone Mean Air Temperature", "zone1"));
        assert!(!query.is_reported("Zone Mean Air Temperature", "ZONE2"));
        assert!(query.is_reported("Zone Mean Air Temperature", ""));
        assert!(!query.is_reported("Site Outdoor Air Drybulb Temperature", "*"));
    }
}
