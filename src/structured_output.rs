use crate::core::accumulator::Extremes;
use crate::core::frequency::{ReportingFrequency, StoreType};
use crate::simulation_time::SimulationTimeIteration;
use serde::Serialize;
use std::fmt::Debug;
use std::io::Write;

/// A dictionary record as mirrored to a structured store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructuredDictionaryRecord<'a> {
    pub report_id: u32,
    pub is_meter: bool,
    pub cumulative: bool,
    pub store_type: StoreType,
    pub frequency: ReportingFrequency,
    pub key: &'a str,
    pub name: &'a str,
    pub units: &'a str,
    pub schedule: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructuredDataRecord {
    pub report_id: u32,
    pub time_index: u64,
    pub value: f64,
    #[serde(flatten)]
    pub extremes: Option<StructuredExtremes>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StructuredExtremes {
    pub min: f64,
    pub min_stamp: i32,
    pub max: f64,
    pub max_stamp: i32,
}

impl From<Extremes> for StructuredExtremes {
    fn from(extremes: Extremes) -> Self {
        Self {
            min: extremes.min,
            min_stamp: extremes.min_stamp.raw(),
            max: extremes.max,
            max_stamp: extremes.max_stamp.raw(),
        }
    }
}

/// A relational or other structured mirror of the text streams.
pub trait StructuredSink: Debug {
    fn write_dictionary(&mut self, record: &StructuredDictionaryRecord) -> anyhow::Result<()>;
    /// Returns the index under which data at this instant is stored, creating it if needed.
    fn time_index(
        &mut self,
        frequency: ReportingFrequency,
        time: &SimulationTimeIteration,
        end_minute: f64,
    ) -> anyhow::Result<u64>;
    fn write_data(&mut self, record: &StructuredDataRecord) -> anyhow::Result<()>;
    fn flush(&mut self) -> anyhow::Result<()>;
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JsonLine<'a> {
    Dictionary(&'a StructuredDictionaryRecord<'a>),
    Time {
        time_index: u64,
        frequency: ReportingFrequency,
        month: u32,
        day: u32,
        hour: u32,
        end_minute: f64,
        day_type: &'a str,
        daylight_saving: bool,
    },
    Data(&'a StructuredDataRecord),
}

/// Writes every structured record as one line of JSON.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    last_time: Option<(ReportingFrequency, usize, u64)>,
    next_time_index: u64,
}

impl<W: Write> Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("next_time_index", &self.next_time_index)
            .finish()
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            last_time: None,
            next_time_index: 1,
        }
    }

    fn write_line(&mut self, line: &JsonLine) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> StructuredSink for JsonLinesSink<W> {
    fn write_dictionary(&mut self, record: &StructuredDictionaryRecord) -> anyhow::Result<()> {
        self.write_line(&JsonLine::Dictionary(record))
    }

    fn time_index(
        &mut self,
        frequency: ReportingFrequency,
        time: &SimulationTimeIteration,
        end_minute: f64,
    ) -> anyhow::Result<u64> {
        let key = (frequency, time.index, end_minute.to_bits());
        if self.last_time == Some(key) {
            return Ok(self.next_time_index - 1);
        }
        let time_index = self.next_time_index;
        self.next_time_index += 1;
        self.last_time = Some(key);
        self.write_line(&JsonLine::Time {
            time_index,
            frequency,
            month: time.month,
            day: time.day_of_month,
            hour: time.hour,
            end_minute,
            day_type: &time.day_type,
            daylight_saving: time.daylight_saving,
        })?;
        Ok(time_index)
    }

    fn write_data(&mut self, record: &StructuredDataRecord) -> anyhow::Result<()> {
        self.write_line(&JsonLine::Data(record))
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(self.writer.flush()?)
    }
}
