use crate::core::frequency::{ReportingFrequency, Resolution, StoreType, TimeStepDomain};
use crate::core::meters::MeterStore;
use crate::core::schedule::ScheduleLookup;
use crate::core::units::MINUTES_PER_HOUR;
use crate::core::variables::{OutputValue, VariableDescriptor, VariableStore};
use crate::output_writer::{DataRecord, ReportInstant, ReportStreams};
use crate::simulation_time::{DateStamp, SimulationTimeIteration};

/// One call of the update entry point: a slice of the current zone timestep belonging to one
/// domain.
#[derive(Clone, Copy, Debug)]
pub struct SubStep<'t> {
    pub time: &'t SimulationTimeIteration,
    pub domain: TimeStepDomain,
    /// hours of the zone timestep already covered by earlier sub-steps of this domain
    pub offset_hours: f64,
    pub elapsed_hours: f64,
}

impl SubStep<'_> {
    /// Fraction of the zone timestep this sub-step covers.
    pub fn weight(&self) -> f64 {
        if self.time.timestep > 0. {
            self.elapsed_hours / self.time.timestep
        } else {
            0.
        }
    }

    pub fn start_minute(&self) -> f64 {
        (self.time.start_minute + self.offset_hours * MINUTES_PER_HOUR as f64)
            .min(self.time.end_minute)
    }

    pub fn end_minute(&self) -> f64 {
        self.time
            .sub_step_end_minute(self.offset_hours + self.elapsed_hours)
    }

    pub fn stamp(&self) -> DateStamp {
        self.time
            .sub_step_stamp(self.offset_hours + self.elapsed_hours)
    }
}

/// Reads every variable of the sub-step's domain, writing EachCall records as it goes.
pub fn sample_variables(
    variables: &mut VariableStore,
    sub_step: &SubStep,
    schedules: &dyn ScheduleLookup,
    streams: &mut ReportStreams,
) -> anyhow::Result<()> {
    sample_descriptors(variables.reals_mut(), sub_step, schedules, streams)?;
    sample_descriptors(variables.integers_mut(), sub_step, schedules, streams)
}

fn sample_descriptors<T: OutputValue>(
    descriptors: &mut [VariableDescriptor<T>],
    sub_step: &SubStep,
    schedules: &dyn ScheduleLookup,
    streams: &mut ReportStreams,
) -> anyhow::Result<()> {
    let weight = sub_step.weight();
    let stamp = sub_step.stamp();
    let instant =
        ReportInstant::sub_step(sub_step.time, sub_step.start_minute(), sub_step.end_minute());

    for descriptor in descriptors
        .iter_mut()
        .filter(|descriptor| descriptor.domain == sub_step.domain)
    {
        let reporting_on = descriptor
            .setup
            .schedule
            .map_or(true, |schedule| schedules.current_value(schedule) != 0.);
        let value = descriptor.sample(weight, reporting_on, stamp);

        if reporting_on
            && descriptor.setup.report
            && descriptor.setup.frequency == ReportingFrequency::EachCall
        {
            streams.write_variable_data(
                &instant,
                &DataRecord {
                    report_id: descriptor.report_id,
                    value,
                    extremes: None,
                },
            )?;
            descriptor.record_reported(value);
        }
    }
    Ok(())
}

/// The resolutions that close at the end of this zone timestep, finest first.
pub fn closing_resolutions(time: &SimulationTimeIteration) -> Vec<Resolution> {
    Resolution::ALL
        .into_iter()
        .take_while(|resolution| match resolution {
            Resolution::TimeStep => true,
            Resolution::Hourly => time.end_of_hour || time.end_of_environment,
            Resolution::Daily => time.end_of_day || time.end_of_environment,
            Resolution::Monthly => time.end_of_month || time.end_of_environment,
            Resolution::RunPeriod => time.end_of_environment,
        })
        .collect()
}

/// Closes the zone timestep: settles meters, then closes each resolution that ends here,
/// writing its records before folding it into the next.
pub fn close_timestep(
    variables: &mut VariableStore,
    meters: &mut MeterStore,
    time: &SimulationTimeIteration,
    streams: &mut ReportStreams,
) -> anyhow::Result<()> {
    let stamp = time.date_stamp();

    meters.close_timestep(|id| variables.take_meter_timestep_total(id), stamp);
    // totals of variables not on any meter are not needed past the timestep
    for descriptor in variables.reals_mut() {
        descriptor.take_meter_timestep_total();
    }
    for descriptor in variables.integers_mut() {
        descriptor.take_meter_timestep_total();
    }

    for resolution in closing_resolutions(time) {
        let instant = ReportInstant::closing(resolution.frequency(), time);
        write_variable_records(variables.reals_mut(), resolution, &instant, streams)?;
        write_variable_records(variables.integers_mut(), resolution, &instant, streams)?;
        write_meter_records(meters, resolution, &instant, streams)?;

        for descriptor in variables.reals_mut() {
            descriptor.roll_up(resolution, stamp);
        }
        for descriptor in variables.integers_mut() {
            descriptor.roll_up(resolution, stamp);
        }
        for meter in meters.meters_mut() {
            meter.roll_up(resolution, stamp);
        }
    }
    Ok(())
}

fn write_variable_records<T: OutputValue>(
    descriptors: &mut [VariableDescriptor<T>],
    resolution: Resolution,
    instant: &ReportInstant,
    streams: &mut ReportStreams,
) -> anyhow::Result<()> {
    for descriptor in descriptors
        .iter_mut()
        .filter(|descriptor| descriptor.reports_at(resolution))
    {
        let layer = descriptor.layer(resolution);
        let value = layer.result(descriptor.store_type);
        streams.write_variable_data(
            instant,
            &DataRecord {
                report_id: descriptor.report_id,
                value,
                extremes: layer.extremes(),
            },
        )?;
        descriptor.record_reported(value);
    }
    Ok(())
}

fn write_meter_records(
    meters: &MeterStore,
    resolution: Resolution,
    instant: &ReportInstant,
    streams: &mut ReportStreams,
) -> anyhow::Result<()> {
    for meter in meters.meters() {
        let flags = meter.flags(resolution);
        let layer = meter.layer(resolution);

        if let (Some(streams_to), Some(report_id)) = (flags.plain(), meter.report_id(resolution)) {
            if !layer.is_empty() {
                streams.write_meter_data(
                    instant,
                    &DataRecord {
                        report_id,
                        value: layer.result(StoreType::Summed),
                        extremes: layer.extremes(),
                    },
                    streams_to,
                )?;
            }
        }
        if let (Some(streams_to), Some(report_id)) = (
            flags.cumulative(),
            meter.cumulative_report_id(resolution),
        ) {
            streams.write_meter_data(
                instant,
                &DataRecord {
                    report_id,
                    value: meter.cumulative(),
                    extremes: None,
                },
                streams_to,
            )?;
        }
    }
    Ok(())
}
