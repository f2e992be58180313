use crate::core::accumulator::Extremes;
use crate::core::frequency::{ReportingFrequency, StoreType};
use crate::core::meters::StreamSelection;
use crate::input::EnvironmentInput;
use crate::output::Output;
use crate::simulation_time::SimulationTimeIteration;
use crate::structured_output::{
    JsonLinesSink, StructuredDataRecord, StructuredDictionaryRecord, StructuredSink,
};
use csv::{QuoteStyle, Writer, WriterBuilder};
use serde::Serialize;
use std::io::Write;

pub const STANDARD_LOCATION_KEY: &str = "eso";
pub const METER_LOCATION_KEY: &str = "mtr";
pub const STRUCTURED_LOCATION_KEY: &str = "sql";

const ENVIRONMENT_REPORT_ID: u32 = 1;

/// Renders a reported number. Zero is always written as `0.0`; anything else uses the shortest
/// representation that reads back to the same value.
pub fn format_number(value: f64) -> String {
    if value == 0. {
        "0.0".to_string()
    } else {
        value.to_string()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stream {
    Standard,
    Meter,
}

/// The point in simulated time a batch of data records belongs to.
#[derive(Clone, Copy, Debug)]
pub struct ReportInstant<'t> {
    pub time: &'t SimulationTimeIteration,
    pub frequency: ReportingFrequency,
    pub start_minute: f64,
    pub end_minute: f64,
}

impl<'t> ReportInstant<'t> {
    /// The instant at which a resolution closing on this timestep is reported.
    pub fn closing(frequency: ReportingFrequency, time: &'t SimulationTimeIteration) -> Self {
        let (start_minute, end_minute) = match frequency {
            ReportingFrequency::EachCall | ReportingFrequency::TimeStep => {
                (time.start_minute, time.end_minute)
            }
            _ => (0., 60.),
        };
        Self {
            time,
            frequency,
            start_minute,
            end_minute,
        }
    }

    pub fn sub_step(time: &'t SimulationTimeIteration, start_minute: f64, end_minute: f64) -> Self {
        Self {
            time,
            frequency: ReportingFrequency::EachCall,
            start_minute,
            end_minute,
        }
    }

    fn stamp_key(&self) -> (ReportingFrequency, usize, u64) {
        (self.frequency, self.time.index, self.end_minute.to_bits())
    }

    fn timestamp_fields(&self) -> Vec<String> {
        let time = self.time;
        let id = self.frequency.timestamp_report_id().to_string();
        let day = time.day_of_simulation.to_string();
        let dst = u8::from(time.daylight_saving).to_string();
        match self.frequency {
            ReportingFrequency::EachCall
            | ReportingFrequency::TimeStep
            | ReportingFrequency::Hourly => vec![
                id,
                day,
                time.month.to_string(),
                time.day_of_month.to_string(),
                dst,
                time.hour.to_string(),
                format!("{:.2}", self.start_minute),
                format!("{:.2}", self.end_minute),
                time.day_type.clone(),
            ],
            ReportingFrequency::Daily => vec![
                id,
                day,
                time.month.to_string(),
                time.day_of_month.to_string(),
                dst,
                time.day_type.clone(),
            ],
            ReportingFrequency::Monthly => vec![id, day, time.month.to_string()],
            ReportingFrequency::RunPeriod => vec![id, day],
        }
    }
}

/// One data line. Extremes are only written at frequencies that carry them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataRecord {
    pub report_id: u32,
    pub value: f64,
    pub extremes: Option<Extremes>,
}

impl DataRecord {
    fn fields(&self, frequency: ReportingFrequency) -> Vec<String> {
        let mut fields = vec![self.report_id.to_string(), format_number(self.value)];
        let carries_extremes = frequency
            .resolution()
            .is_some_and(|resolution| resolution.reports_extremes());
        if let (true, Some(extremes)) = (carries_extremes, self.extremes) {
            fields.push(format_number(extremes.min));
            fields.extend(stamp_suffix(frequency, extremes.min_stamp.decode()));
            fields.push(format_number(extremes.max));
            fields.extend(stamp_suffix(frequency, extremes.max_stamp.decode()));
        }
        fields
    }
}

fn stamp_suffix(
    frequency: ReportingFrequency,
    (month, day, hour, minute): (u32, u32, u32, u32),
) -> Vec<String> {
    let parts = match frequency {
        ReportingFrequency::Daily => vec![hour, minute],
        ReportingFrequency::Monthly => vec![day, hour, minute],
        ReportingFrequency::RunPeriod => vec![month, day, hour, minute],
        _ => vec![],
    };
    parts.into_iter().map(|part| part.to_string()).collect()
}

#[derive(Clone, Copy, Debug)]
pub struct VariableDictionaryEntry<'a> {
    pub report_id: u32,
    pub frequency: ReportingFrequency,
    pub store_type: StoreType,
    pub key: &'a str,
    pub name: &'a str,
    pub units: &'a str,
    pub schedule: Option<&'a str>,
}

#[derive(Clone, Copy, Debug)]
pub struct MeterDictionaryEntry<'a> {
    pub report_id: u32,
    pub frequency: ReportingFrequency,
    pub name: &'a str,
    pub units: &'a str,
    pub cumulative: bool,
}

/// Running totals of lines written to the standard and meter streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RecordCounts {
    pub standard: usize,
    pub meter: usize,
}

/// The standard and meter text streams, plus the optional structured mirror.
pub struct ReportStreams<'a> {
    standard: Writer<Box<dyn Write + 'a>>,
    meter: Writer<Box<dyn Write + 'a>>,
    structured: Option<Box<dyn StructuredSink + 'a>>,
    counts: RecordCounts,
    last_stamp: [Option<(ReportingFrequency, usize, u64)>; 2],
}

impl std::fmt::Debug for ReportStreams<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportStreams")
            .field("counts", &self.counts)
            .field("structured", &self.structured)
            .finish()
    }
}

fn csv_writer<'a>(writer: impl Write + 'a) -> Writer<Box<dyn Write + 'a>> {
    WriterBuilder::new()
        .flexible(true)
        .quote_style(QuoteStyle::Never)
        .from_writer(Box::new(writer))
}

impl<'a> ReportStreams<'a> {
    pub fn new<O: Output>(output: &'a O, structured: bool) -> anyhow::Result<Self> {
        let structured: Option<Box<dyn StructuredSink + 'a>> = if structured {
            Some(Box::new(JsonLinesSink::new(
                output.writer_for_location_key(STRUCTURED_LOCATION_KEY)?,
            )))
        } else {
            None
        };
        Ok(Self {
            standard: csv_writer(output.writer_for_location_key(STANDARD_LOCATION_KEY)?),
            meter: csv_writer(output.writer_for_location_key(METER_LOCATION_KEY)?),
            structured,
            counts: Default::default(),
            last_stamp: [None, None],
        })
    }

    fn writer(&mut self, stream: Stream) -> &mut Writer<Box<dyn Write + 'a>> {
        match stream {
            Stream::Standard => &mut self.standard,
            Stream::Meter => &mut self.meter,
        }
    }

    fn write_counted(&mut self, stream: Stream, fields: &[String]) -> anyhow::Result<()> {
        self.writer(stream).write_record(fields)?;
        match stream {
            Stream::Standard => self.counts.standard += 1,
            Stream::Meter => self.counts.meter += 1,
        }
        Ok(())
    }

    fn write_both(&mut self, fields: &[&str]) -> anyhow::Result<()> {
        self.standard.write_record(fields)?;
        self.meter.write_record(fields)?;
        Ok(())
    }

    /// Program version and the layout of the reserved environment and timestamp records.
    pub fn write_headers(&mut self) -> anyhow::Result<()> {
        let version = format!("Program Version,eso-meters {}", env!("CARGO_PKG_VERSION"));
        self.write_both(&[version.as_str()])?;
        self.write_both(&[
            "1",
            "5",
            "Environment Title[]",
            "Latitude[deg]",
            "Longitude[deg]",
            "Time Zone[]",
            "Elevation[m]",
        ])?;
        self.write_both(&[
            "2",
            "8",
            "Day of Simulation[]",
            "Month[]",
            "Day of Month[]",
            "DST Indicator[1=yes 0=no]",
            "Hour[]",
            "StartMinute[]",
            "EndMinute[]",
            "DayType",
        ])?;
        self.write_both(&[
            "3",
            "5",
            "Cumulative Day of Simulation[]",
            "Month[]",
            "Day of Month[]",
            "DST Indicator[1=yes 0=no]",
            "DayType  ! When Daily Report Variables Requested",
        ])?;
        self.write_both(&[
            "4",
            "2",
            "Cumulative Days of Simulation[]",
            "Month[]  ! When Monthly Report Variables Requested",
        ])?;
        self.write_both(&[
            "5",
            "1",
            "Cumulative Days of Simulation[] ! When Run Period Report Variables Requested",
        ])
    }

    pub fn write_variable_dictionary(
        &mut self,
        entry: &VariableDictionaryEntry,
    ) -> anyhow::Result<()> {
        let mut fields = vec![
            entry.report_id.to_string(),
            entry.frequency.field_count().to_string(),
            entry.key.to_string(),
            format!(
                "{} [{}]{}",
                entry.name,
                entry.units,
                entry.frequency.annotation()
            ),
        ];
        if let Some(schedule) = entry.schedule {
            fields.push(schedule.to_string());
        }
        self.write_counted(Stream::Standard, &fields)?;

        if let Some(sink) = self.structured.as_mut() {
            sink.write_dictionary(&StructuredDictionaryRecord {
                report_id: entry.report_id,
                is_meter: false,
                cumulative: false,
                store_type: entry.store_type,
                frequency: entry.frequency,
                key: entry.key,
                name: entry.name,
                units: entry.units,
                schedule: entry.schedule,
            })?;
        }
        Ok(())
    }

    pub fn write_meter_dictionary(
        &mut self,
        entry: &MeterDictionaryEntry,
        streams: StreamSelection,
    ) -> anyhow::Result<()> {
        let fields = if entry.cumulative {
            vec![
                entry.report_id.to_string(),
                "1".to_string(),
                format!(
                    "Cumulative {} [{}]{}",
                    entry.name,
                    entry.units,
                    entry.frequency.cumulative_annotation()
                ),
            ]
        } else {
            vec![
                entry.report_id.to_string(),
                entry.frequency.field_count().to_string(),
                format!(
                    "{} [{}]{}",
                    entry.name,
                    entry.units,
                    entry.frequency.annotation()
                ),
            ]
        };
        self.write_counted(Stream::Meter, &fields)?;
        if streams.includes_standard() {
            self.write_counted(Stream::Standard, &fields)?;
        }

        if let Some(sink) = self.structured.as_mut() {
            sink.write_dictionary(&StructuredDictionaryRecord {
                report_id: entry.report_id,
                is_meter: true,
                cumulative: entry.cumulative,
                store_type: StoreType::Summed,
                frequency: entry.frequency,
                key: "",
                name: entry.name,
                units: entry.units,
                schedule: None,
            })?;
        }
        Ok(())
    }

    pub fn end_dictionary(&mut self) -> anyhow::Result<()> {
        self.write_both(&["End of Data Dictionary"])
    }

    pub fn write_environment(&mut self, environment: &EnvironmentInput) -> anyhow::Result<()> {
        let fields = [
            ENVIRONMENT_REPORT_ID.to_string(),
            environment.title.clone(),
            format!("{:.2}", environment.latitude),
            format!("{:.2}", environment.longitude),
            format!("{:.2}", environment.time_zone),
            format!("{:.2}", environment.elevation),
        ];
        self.standard.write_record(&fields)?;
        self.meter.write_record(&fields)?;
        self.last_stamp = [None, None];
        Ok(())
    }

    /// Writes the timestamp line for `instant` unless this stream's previous line already had it.
    fn stamp(&mut self, stream: Stream, instant: &ReportInstant) -> anyhow::Result<()> {
        let slot = match stream {
            Stream::Standard => 0,
            Stream::Meter => 1,
        };
        let key = instant.stamp_key();
        if self.last_stamp[slot] != Some(key) {
            self.writer(stream)
                .write_record(&instant.timestamp_fields())?;
            self.last_stamp[slot] = Some(key);
        }
        Ok(())
    }

    fn mirror_data(&mut self, instant: &ReportInstant, record: &DataRecord) -> anyhow::Result<()> {
        if let Some(sink) = self.structured.as_mut() {
            let time_index = sink.time_index(instant.frequency, instant.time, instant.end_minute)?;
            sink.write_data(&StructuredDataRecord {
                report_id: record.report_id,
                time_index,
                value: record.value,
                extremes: record.extremes.map(Into::into),
            })?;
        }
        Ok(())
    }

    pub fn write_variable_data(
        &mut self,
        instant: &ReportInstant,
        record: &DataRecord,
    ) -> anyhow::Result<()> {
        self.stamp(Stream::Standard, instant)?;
        self.write_counted(Stream::Standard, &record.fields(instant.frequency))?;
        self.mirror_data(instant, record)
    }

    pub fn write_meter_data(
        &mut self,
        instant: &ReportInstant,
        record: &DataRecord,
        streams: StreamSelection,
    ) -> anyhow::Result<()> {
        let fields = record.fields(instant.frequency);
        self.stamp(Stream::Meter, instant)?;
        self.write_counted(Stream::Meter, &fields)?;
        if streams.includes_standard() {
            self.stamp(Stream::Standard, instant)?;
            self.write_counted(Stream::Standard, &fields)?;
        }
        self.mirror_data(instant, record)
    }

    pub fn counts(&self) -> RecordCounts {
        self.counts
    }

    /// Closes both streams with their trailers and flushes everything.
    pub fn finish(&mut self) -> anyhow::Result<RecordCounts> {
        let counts = self.counts;
        for (stream, written) in [
            (Stream::Standard, counts.standard),
            (Stream::Meter, counts.meter),
        ] {
            let writer = self.writer(stream);
            writer.write_record(["End of Data"])?;
            writer.write_record([format!(" Number of Records Written={written}")])?;
            writer.flush()?;
        }
        if let Some(sink) = self.structured.as_mut() {
            sink.flush()?;
        }
        Ok(counts)
    }
}
