use crate::core::units::{
    month_and_day_from_day_of_year, DAYS_PER_YEAR, HOURS_PER_DAY, MINUTES_PER_HOUR,
};
use anyhow::bail;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A date and time packed into a single integer as `MMDDHHmm`, used to stamp minima and maxima.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct DateStamp(i32);

impl DateStamp {
    pub fn encode(month: u32, day: u32, hour: u32, minute: u32) -> Self {
        Self((month * 1_000_000 + day * 10_000 + hour * 100 + minute) as i32)
    }

    /// Returns (month, day, hour, minute).
    pub fn decode(&self) -> (u32, u32, u32, u32) {
        let packed = self.0 as u32;
        (
            packed / 1_000_000,
            (packed / 10_000) % 100,
            (packed / 100) % 100,
            packed % 100,
        )
    }

    pub fn raw(&self) -> i32 {
        self.0
    }
}

impl Display for DateStamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (month, day, hour, minute) = self.decode();
        write!(f, "{month:02}/{day:02} {hour:02}:{minute:02}")
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimulationTime {
    /// 1-based day of year the run period starts on
    start_day: u32,
    /// number of days in the run period
    days: u32,
    timesteps_per_hour: u32,
    #[serde(default = "default_year")]
    year: i32,
    /// inclusive 1-based day-of-year range during which daylight saving time is in effect
    #[serde(default)]
    daylight_saving: Option<[u32; 2]>,
}

fn default_year() -> i32 {
    2025
}

impl SimulationTime {
    pub fn new(start_day: u32, days: u32, timesteps_per_hour: u32) -> anyhow::Result<Self> {
        let simulation_time = Self {
            start_day,
            days,
            timesteps_per_hour,
            year: default_year(),
            daylight_saving: None,
        };
        simulation_time.validate()?;
        Ok(simulation_time)
    }

    pub fn with_daylight_saving(mut self, first_day: u32, last_day: u32) -> Self {
        self.daylight_saving = Some([first_day, last_day]);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timesteps_per_hour == 0 || MINUTES_PER_HOUR % self.timesteps_per_hour != 0 {
            bail!(
                "Timesteps per hour must divide evenly into an hour, got {}",
                self.timesteps_per_hour
            );
        }
        if self.start_day == 0
            || self.start_day > DAYS_PER_YEAR
            || self.days == 0
            || self.days > DAYS_PER_YEAR + 1 - self.start_day
        {
            bail!(
                "Run period of {} days starting on day {} does not fit in a single year",
                self.days,
                self.start_day
            );
        }
        Ok(())
    }

    /// Length of a zone timestep, in hours.
    pub fn step(&self) -> f64 {
        1. / self.timesteps_per_hour as f64
    }

    pub fn timesteps_per_hour(&self) -> u32 {
        self.timesteps_per_hour
    }

    pub fn total_steps(&self) -> usize {
        (self.days * HOURS_PER_DAY * self.timesteps_per_hour) as usize
    }

    pub fn iter(&self) -> SimulationTimeIterator {
        SimulationTimeIterator::from(self.clone())
    }
}

#[derive(Clone, Debug)]
pub struct SimulationTimeIterator {
    current_index: usize,
    simulation_time: SimulationTime,
}

impl SimulationTimeIterator {
    fn from(simulation_time: SimulationTime) -> Self {
        SimulationTimeIterator {
            current_index: 0,
            simulation_time,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn total_steps(&self) -> usize {
        self.simulation_time.total_steps()
    }
}

/// One zone timestep of the run period, carrying everything needed to stamp and report it.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationTimeIteration {
    pub index: usize,
    /// length of the timestep, in hours
    pub timestep: f64,
    /// 1-based day of the run period
    pub day_of_simulation: u32,
    pub month: u32,
    pub day_of_month: u32,
    /// hour being simulated, 1-24
    pub hour: u32,
    pub start_minute: f64,
    pub end_minute: f64,
    pub day_type: String,
    pub daylight_saving: bool,
    pub end_of_hour: bool,
    pub end_of_day: bool,
    pub end_of_month: bool,
    pub end_of_environment: bool,
}

impl SimulationTimeIteration {
    pub fn date_stamp(&self) -> DateStamp {
        DateStamp::encode(
            self.month,
            self.day_of_month,
            self.hour,
            self.end_minute.round() as u32,
        )
    }

    /// Stamp for a sub-step ending `elapsed_hours` into this timestep.
    pub fn sub_step_stamp(&self, elapsed_hours: f64) -> DateStamp {
        DateStamp::encode(
            self.month,
            self.day_of_month,
            self.hour,
            self.sub_step_end_minute(elapsed_hours).round() as u32,
        )
    }

    pub fn sub_step_end_minute(&self, elapsed_hours: f64) -> f64 {
        (self.start_minute + elapsed_hours * MINUTES_PER_HOUR as f64).min(self.end_minute)
    }
}

impl Iterator for SimulationTimeIterator {
    type Item = SimulationTimeIteration;

    fn next(&mut self) -> Option<Self::Item> {
        let simulation_time = &self.simulation_time;
        if self.current_index >= simulation_time.total_steps() {
            return None;
        }
        let steps_per_hour = simulation_time.timesteps_per_hour as usize;
        let steps_per_day = steps_per_hour * HOURS_PER_DAY as usize;
        let index = self.current_index;

        let day_offset = (index / steps_per_day) as u32;
        let day_of_year = simulation_time.start_day + day_offset;
        let (month, day_of_month) = month_and_day_from_day_of_year(day_of_year);
        let (next_month, _) = month_and_day_from_day_of_year(day_of_year + 1);
        let step_in_hour = index % steps_per_hour;
        let minutes_per_step = MINUTES_PER_HOUR as f64 / steps_per_hour as f64;

        let end_of_hour = step_in_hour + 1 == steps_per_hour;
        let end_of_day = (index + 1) % steps_per_day == 0;
        let end_of_environment = index + 1 == simulation_time.total_steps();

        self.current_index += 1;

        Some(SimulationTimeIteration {
            index,
            timestep: simulation_time.step(),
            day_of_simulation: day_offset + 1,
            month,
            day_of_month,
            hour: ((index % steps_per_day) / steps_per_hour) as u32 + 1,
            start_minute: step_in_hour as f64 * minutes_per_step,
            end_minute: (step_in_hour + 1) as f64 * minutes_per_step,
            day_type: day_type_name(simulation_time.year, month, day_of_month),
            daylight_saving: simulation_time
                .daylight_saving
                .is_some_and(|[first, last]| (first..=last).contains(&day_of_year)),
            end_of_hour,
            end_of_day,
            end_of_month: end_of_day && (next_month != month || day_of_year == DAYS_PER_YEAR),
            end_of_environment,
        })
    }
}

fn day_type_name(year: i32, month: u32, day_of_month: u32) -> String {
    let weekday = NaiveDate::from_ymd_opt(year, month, day_of_month)
        .map(|date| date.weekday())
        .unwrap_or(Weekday::Sun);
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
    .to_string()
}
