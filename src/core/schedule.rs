use anyhow::bail;
use indexmap::IndexMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};

/// The view of the schedule engine needed to gate reporting of output variables.
pub trait ScheduleLookup: Debug {
    /// Finds a schedule by name, ignoring case.
    fn schedule_index(&self, name: &str) -> Option<usize>;
    fn schedule_name(&self, index: usize) -> Option<&str>;
    fn schedule_count(&self) -> usize;
    /// The schedule's value at the current point in the simulation. Zero means "off".
    fn current_value(&self, index: usize) -> f64;
}

/// Schedules that repeat the same 24 hourly values every day.
#[derive(Debug, Default)]
pub struct DaySchedules {
    schedules: IndexMap<String, (String, [f64; 24])>,
    current_hour: AtomicU32,
}

impl DaySchedules {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&mut self, name: &str, hourly_values: &[f64]) -> anyhow::Result<usize> {
        let profile: [f64; 24] = match hourly_values.try_into() {
            Ok(profile) => profile,
            Err(_) => bail!(
                "Schedule '{name}' must have 24 hourly values, got {}",
                hourly_values.len()
            ),
        };
        let (index, _) = self
            .schedules
            .insert_full(name.to_uppercase(), (name.to_string(), profile));
        Ok(index)
    }

    /// Sets the hour (1-24) that current values are read for.
    pub fn set_hour(&self, hour: u32) {
        self.current_hour.store(hour.clamp(1, 24), Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }
}

impl ScheduleLookup for DaySchedules {
    fn schedule_index(&self, name: &str) -> Option<usize> {
        self.schedules.get_index_of(&name.trim().to_uppercase())
    }

    fn schedule_name(&self, index: usize) -> Option<&str> {
        self.schedules
            .get_index(index)
            .map(|(_, (name, _))| name.as_str())
    }

    fn schedule_count(&self) -> usize {
        self.schedules.len()
    }

    fn current_value(&self, index: usize) -> f64 {
        let hour = self.current_hour.load(Ordering::Relaxed).max(1) as usize;
        self.schedules
            .get_index(index)
            .map_or(0., |(_, (_, profile))| profile[hour - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn schedules() -> DaySchedules {
        let mut schedules = DaySchedules::new();
        let mut occupancy = [0.; 24];
        occupancy[8..18].fill(1.);
        schedules.add("Office Occupancy", &occupancy).unwrap();
        schedules.add("Always On", &[1.; 24]).unwrap();
        schedules
    }

    #[rstest]
    fn should_find_schedules_ignoring_case(schedules: DaySchedules) {
        assert_eq!(schedules.schedule_index("office occupancy"), Some(0));
        assert_eq!(schedules.schedule_index("ALWAYS ON"), Some(1));
        assert_eq!(schedules.schedule_index("Never"), None);
        assert_eq!(schedules.schedule_name(0), Some("Office Occupancy"));
    }

    #[rstest]
    fn should_read_value_for_current_hour(schedules: DaySchedules) {
        schedules.set_hour(1);
        assert_eq!(schedules.current_value(0), 0.);
        schedules.set_hour(9);
        assert_eq!(schedules.current_value(0), 1.);
        schedules.set_hour(19);
        assert_eq!(schedules.current_value(0), 0.);
        assert_eq!(schedules.current_value(1), 1.);
    }

    #[rstest]
    fn should_reject_profiles_of_wrong_length() {
        let mut schedules = DaySchedules::new();
        assert!(schedules.add("Short", &[1.; 12]).is_err());
        assert!(schedules.is_empty());
    }
}
