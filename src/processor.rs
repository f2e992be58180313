use crate::core::aggregation::{close_timestep, sample_variables, SubStep};
use crate::core::frequency::{ReportingFrequency, Resolution, StoreType, TimeStepDomain};
use crate::core::meters::custom::{define_custom_meter, CustomMeterDefinition};
use crate::core::meters::taxonomy::MeterTags;
use crate::core::meters::{MeterReportFlags, MeterStore};
use crate::core::query::Query;
use crate::core::requests::{RequestMatch, RequestResolver};
use crate::core::schedule::ScheduleLookup;
use crate::core::units::resolve_name_and_units;
use crate::core::variables::{
    OutputValue, ReportingSetup, ValueProvider, VariableDescriptor, VariableId, VariableKind,
    VariableStore,
};
use crate::errors::{ErrorAccumulator, OutputProcessorError, Warnings};
use crate::input::{EnvironmentInput, OutputMeterRequest, ReportingInput};
use crate::output::Output;
use crate::output_writer::{
    MeterDictionaryEntry, RecordCounts, ReportStreams, VariableDictionaryEntry,
};
use crate::setup_reports::SetupReports;
use crate::simulation_time::SimulationTimeIteration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Report ids 1 to 6 are reserved for the environment and timestamp records.
const FIRST_REPORT_ID: u32 = 7;

/// The taxonomy tags and multipliers of a metered quantity, as supplied by the registering
/// module.
#[derive(Clone, Copy, Debug)]
pub struct MeterRegistration<'r> {
    pub resource_type: &'r str,
    pub end_use: Option<&'r str>,
    pub end_use_subcategory: Option<&'r str>,
    pub group: Option<&'r str>,
    pub zone: Option<&'r str>,
    pub zone_multiplier: f64,
    pub zone_list_multiplier: f64,
}

impl<'r> MeterRegistration<'r> {
    pub fn new(resource_type: &'r str) -> Self {
        Self {
            resource_type,
            end_use: None,
            end_use_subcategory: None,
            group: None,
            zone: None,
            zone_multiplier: 1.,
            zone_list_multiplier: 1.,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct VariableRegistration<'r> {
    /// May carry its units inline as `Name [Units]`
    pub name: &'r str,
    pub units: &'r str,
    pub key: &'r str,
    pub domain: TimeStepDomain,
    pub store_type: StoreType,
    /// Forces a single reported descriptor at this frequency, whatever was requested
    pub frequency_override: Option<ReportingFrequency>,
    pub meter: Option<MeterRegistration<'r>>,
}

impl<'r> VariableRegistration<'r> {
    pub fn new(
        name: &'r str,
        units: &'r str,
        key: &'r str,
        domain: TimeStepDomain,
        store_type: StoreType,
    ) -> Self {
        Self {
            name,
            units,
            key,
            domain,
            store_type,
            frequency_override: None,
            meter: None,
        }
    }

    pub fn with_frequency_override(mut self, frequency: ReportingFrequency) -> Self {
        self.frequency_override = Some(frequency);
        self
    }

    pub fn on_meter(mut self, meter: MeterRegistration<'r>) -> Self {
        self.meter = Some(meter);
        self
    }
}

/// The outcome of registering a quantity.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    /// whether any descriptor is written out
    pub reportable: bool,
    pub variables: Vec<VariableId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub records: RecordCounts,
    pub variable_count: usize,
    pub meter_count: usize,
    pub unmatched_requests: usize,
    pub warnings: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Setup,
    Running,
    Updating,
}

/// Owns the variable and meter registries for one run and drives reporting from them.
///
/// Quantities are registered during setup. `finalize_setup` then builds custom meters, writes
/// the dictionaries and switches to running, after which `update` is called every sub-step.
pub struct OutputProcessor<'a> {
    variables: VariableStore,
    meters: MeterStore,
    requests: RequestResolver,
    reporting: ReportingInput,
    environment: EnvironmentInput,
    schedules: Arc<dyn ScheduleLookup>,
    streams: ReportStreams<'a>,
    setup_reports: Option<SetupReports<'a>>,
    errors: ErrorAccumulator,
    warnings: Warnings,
    phase: Phase,
    next_report_id: u32,
    environment_open: bool,
    /// hours of the current zone timestep already covered by system sub-steps
    system_offset_hours: f64,
}

impl std::fmt::Debug for OutputProcessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputProcessor")
            .field("phase", &self.phase)
            .field("variables", &self.variables.len())
            .field("meters", &self.meters.len())
            .finish()
    }
}

impl<'a> OutputProcessor<'a> {
    pub fn new<O: Output>(
        output: &'a O,
        reporting: ReportingInput,
        environment: EnvironmentInput,
        schedules: Arc<dyn ScheduleLookup>,
    ) -> anyhow::Result<Self> {
        if output.is_noop() {
            debug!("Output is a no-op, reports will be discarded");
        }
        let requests = RequestResolver::new(
            reporting.output_variables.clone(),
            reporting.minimum_reporting_frequency,
        );
        Ok(Self {
            variables: VariableStore::new(),
            meters: MeterStore::new(),
            requests,
            streams: ReportStreams::new(output, reporting.structured_output)?,
            setup_reports: Some(SetupReports::new(output)?),
            reporting,
            environment,
            schedules,
            errors: ErrorAccumulator::new(),
            warnings: Warnings::default(),
            phase: Phase::Setup,
            next_report_id: FIRST_REPORT_ID,
            environment_open: false,
            system_offset_hours: 0.,
        })
    }

    pub fn register_real_variable(
        &mut self,
        registration: VariableRegistration,
        provider: Arc<dyn ValueProvider<f64>>,
    ) -> Result<Registration, OutputProcessorError> {
        let descriptors = self.describe::<f64>(&registration, provider)?;
        let ids = descriptors
            .into_iter()
            .map(|descriptor| self.variables.push_real(descriptor))
            .collect();
        self.finish_registration(&registration, VariableKind::Real, ids)
    }

    pub fn register_integer_variable(
        &mut self,
        registration: VariableRegistration,
        provider: Arc<dyn ValueProvider<i32>>,
    ) -> Result<Registration, OutputProcessorError> {
        let descriptors = self.describe::<i32>(&registration, provider)?;
        let ids = descriptors
            .into_iter()
            .map(|descriptor| self.variables.push_integer(descriptor))
            .collect();
        self.finish_registration(&registration, VariableKind::Integer, ids)
    }

    fn check_setup(&self) -> Result<(), OutputProcessorError> {
        match self.phase {
            Phase::Setup => Ok(()),
            Phase::Running => Err(OutputProcessorError::RegistrationClosed),
            Phase::Updating => Err(OutputProcessorError::UpdateInProgress),
        }
    }

    /// Builds the descriptors a new registration needs. Returns none if the same quantity has
    /// already been registered.
    fn describe<T: OutputValue>(
        &mut self,
        registration: &VariableRegistration,
        provider: Arc<dyn ValueProvider<T>>,
    ) -> Result<Vec<VariableDescriptor<T>>, OutputProcessorError> {
        self.check_setup()?;
        let (name, units) = resolve_name_and_units(registration.name, registration.units)?;
        let key = registration.key.trim();
        if registration.meter.is_some() && registration.store_type == StoreType::Averaged {
            return Err(OutputProcessorError::AveragedVariableOnMeter(name));
        }

        self.variables.catalog_variable(
            &name,
            T::KIND,
            registration.domain,
            registration.store_type,
            &units,
        );
        if self
            .variables
            .existing_registration(T::KIND, &name, key, &units)
            .is_some()
        {
            return Ok(vec![]);
        }

        let matches = self.requests.match_requests(
            key,
            &name,
            self.schedules.as_ref(),
            &mut self.errors,
        );
        let setups = reporting_setups(&matches, registration.frequency_override);

        Ok(setups
            .into_iter()
            .map(|setup| {
                let report_id = self.next_report_id;
                self.next_report_id += 1;
                VariableDescriptor::new(
                    report_id,
                    &name,
                    key,
                    &units,
                    registration.domain,
                    registration.store_type,
                    provider.clone(),
                    setup,
                )
            })
            .collect())
    }

    fn finish_registration(
        &mut self,
        registration: &VariableRegistration,
        kind: VariableKind,
        ids: Vec<VariableId>,
    ) -> Result<Registration, OutputProcessorError> {
        let ids = if ids.is_empty() {
            // already registered, so hand back what was created the first time
            let (name, units) = resolve_name_and_units(registration.name, registration.units)?;
            self.variables
                .existing_registration(kind, &name, registration.key.trim(), &units)
                .map(<[VariableId]>::to_vec)
                .unwrap_or_default()
        } else {
            if let Some(meter) = &registration.meter {
                self.attach_to_meters(ids[0], meter)?;
            }
            ids
        };

        let mut reportable = false;
        for id in &ids {
            reportable |= self.variables.summary(*id)?.setup.report;
        }
        Ok(Registration {
            reportable,
            variables: ids,
        })
    }

    fn attach_to_meters(
        &mut self,
        variable: VariableId,
        meter: &MeterRegistration,
    ) -> Result<(), OutputProcessorError> {
        let tags = match MeterTags::parse(
            meter.resource_type,
            meter.end_use,
            meter.end_use_subcategory,
            meter.group,
            meter.zone,
        ) {
            Ok(tags) => tags,
            Err(err) => {
                self.errors.push(err);
                return Ok(());
            }
        };
        let units = self.variables.summary(variable)?.units.to_string();
        self.meters.attach_variable(
            variable,
            &tags,
            &units,
            meter.zone_multiplier,
            meter.zone_list_multiplier,
        );
        Ok(())
    }

    /// Defines a custom or custom-decrement meter from code rather than from configuration.
    pub fn define_custom_meter(
        &mut self,
        definition: CustomMeterDefinition,
    ) -> Result<Option<usize>, OutputProcessorError> {
        self.check_setup()?;
        define_custom_meter(
            definition,
            &self.variables,
            &mut self.meters,
            &mut self.errors,
            &mut self.warnings,
        )
    }

    /// Ends setup: builds the configured custom meters, applies meter requests, fails if any
    /// severe input error was found, then writes the dictionaries and setup reports.
    pub fn finalize_setup(&mut self) -> anyhow::Result<()> {
        self.check_setup()?;
        self.requests
            .ensure_loaded(self.schedules.as_ref(), &mut self.errors);

        let custom_meters = std::mem::take(&mut self.reporting.custom_meters);
        for input in &custom_meters {
            self.define_custom_meter(input.into())?;
        }
        let decrement_meters = std::mem::take(&mut self.reporting.custom_decrement_meters);
        for input in &decrement_meters {
            self.define_custom_meter(input.into())?;
        }

        let meter_requests = std::mem::take(&mut self.reporting.output_meters);
        for request in &meter_requests {
            self.apply_meter_request(request)?;
        }
        let next_report_id = &mut self.next_report_id;
        for meter in self.meters.meters_mut() {
            meter.assign_report_ids(|| {
                let id = *next_report_id;
                *next_report_id += 1;
                id
            });
        }

        self.errors.check()?;

        self.streams.write_headers()?;
        self.write_dictionaries()?;
        self.streams.end_dictionary()?;
        if let Some(setup_reports) = self.setup_reports.take() {
            setup_reports.write_all(
                &self.variables,
                &self.meters,
                self.reporting.sort_dictionaries,
            )?;
        }

        info!(
            "Output setup finalised with {} variables and {} meters",
            self.variables.len(),
            self.meters.len()
        );
        self.phase = Phase::Running;
        Ok(())
    }

    fn apply_meter_request(
        &mut self,
        request: &OutputMeterRequest,
    ) -> Result<(), OutputProcessorError> {
        let Some(index) = self.meters.find(&request.name) else {
            self.warnings.push(format!(
                "Output:Meter={},{} was requested but no meter of that name exists",
                request.name, request.frequency
            ));
            return Ok(());
        };
        let frequency = self.requests.apply_floor(request.frequency);
        let resolution = frequency.resolution().unwrap_or(Resolution::TimeStep);
        let flags = match (request.cumulative, request.meter_file_only) {
            (false, false) => MeterReportFlags::REPORT,
            (false, true) => MeterReportFlags::METER_FILE_ONLY,
            (true, false) => MeterReportFlags::CUMULATIVE,
            (true, true) => MeterReportFlags::CUMULATIVE_METER_FILE_ONLY,
        };
        self.meters.meter_mut(index)?.request(resolution, flags);
        debug!("Meter '{}' reported {resolution} ({flags:?})", request.name);
        Ok(())
    }

    fn write_dictionaries(&mut self) -> anyhow::Result<()> {
        for (_, summary) in self.variables.summaries() {
            if !summary.setup.report {
                continue;
            }
            let schedule = summary
                .setup
                .schedule
                .and_then(|index| self.schedules.schedule_name(index));
            self.streams
                .write_variable_dictionary(&VariableDictionaryEntry {
                    report_id: summary.report_id,
                    frequency: summary.setup.frequency,
                    store_type: summary.store_type,
                    key: summary.key,
                    name: summary.name,
                    units: summary.units,
                    schedule,
                })?;
        }

        for meter in self.meters.meters() {
            for resolution in Resolution::ALL {
                let flags = meter.flags(resolution);
                let entries = [
                    (flags.plain(), meter.report_id(resolution), false),
                    (flags.cumulative(), meter.cumulative_report_id(resolution), true),
                ];
                for (selection, report_id, cumulative) in entries {
                    if let (Some(selection), Some(report_id)) = (selection, report_id) {
                        self.streams.write_meter_dictionary(
                            &MeterDictionaryEntry {
                                report_id,
                                frequency: resolution.frequency(),
                                name: &meter.name,
                                units: &meter.units,
                                cumulative,
                            },
                            selection,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Starts a new environment: clears every accumulator and writes the environment record.
    pub fn begin_environment(&mut self) -> anyhow::Result<()> {
        match self.phase {
            Phase::Running => {}
            Phase::Setup => return Err(OutputProcessorError::SetupNotFinalised.into()),
            Phase::Updating => return Err(OutputProcessorError::UpdateInProgress.into()),
        }
        for descriptor in self.variables.reals_mut() {
            descriptor.reset_layers();
        }
        for descriptor in self.variables.integers_mut() {
            descriptor.reset_layers();
        }
        self.meters.reset_environment();
        self.streams.write_environment(&self.environment)?;
        self.environment_open = true;
        self.system_offset_hours = 0.;
        debug!("Began environment '{}'", self.environment.title);
        Ok(())
    }

    /// Folds in one sub-step of `domain` lasting `elapsed_hours`.
    ///
    /// System sub-steps may be called any number of times within a zone timestep. The zone
    /// update comes last and closes the timestep, along with any hour, day, month or
    /// environment that ends with it. An environment is begun automatically if none is open.
    pub fn update(
        &mut self,
        domain: TimeStepDomain,
        elapsed_hours: f64,
        time: &SimulationTimeIteration,
    ) -> anyhow::Result<()> {
        match self.phase {
            Phase::Running => {}
            Phase::Setup => return Err(OutputProcessorError::SetupNotFinalised.into()),
            Phase::Updating => return Err(OutputProcessorError::UpdateInProgress.into()),
        }
        if !self.environment_open {
            self.begin_environment()?;
        }
        self.phase = Phase::Updating;
        let result = self.fold_sub_step(domain, elapsed_hours, time);
        self.phase = Phase::Running;
        result
    }

    fn fold_sub_step(
        &mut self,
        domain: TimeStepDomain,
        elapsed_hours: f64,
        time: &SimulationTimeIteration,
    ) -> anyhow::Result<()> {
        let offset_hours = match domain {
            TimeStepDomain::Zone => 0.,
            TimeStepDomain::System => self.system_offset_hours,
        };
        let sub_step = SubStep {
            time,
            domain,
            offset_hours,
            elapsed_hours,
        };
        sample_variables(
            &mut self.variables,
            &sub_step,
            self.schedules.as_ref(),
            &mut self.streams,
        )?;

        match domain {
            TimeStepDomain::System => self.system_offset_hours += elapsed_hours,
            TimeStepDomain::Zone => {
                close_timestep(&mut self.variables, &mut self.meters, time, &mut self.streams)?;
                self.system_offset_hours = 0.;
                if time.end_of_environment {
                    self.environment_open = false;
                }
            }
        }
        Ok(())
    }

    pub fn query(&self) -> Query<'_> {
        Query {
            variables: &self.variables,
            meters: &self.meters,
            schedules: self.schedules.as_ref(),
        }
    }

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn meters(&self) -> &MeterStore {
        &self.meters
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    /// Audits unmatched requests, closes the streams and reports what was written.
    pub fn end_run(mut self) -> anyhow::Result<RunSummary> {
        if self.phase != Phase::Running {
            return Err(OutputProcessorError::SetupNotFinalised.into());
        }
        let unmatched_requests = self.requests.audit_unconsumed(&mut self.warnings);
        let records = self.streams.finish()?;
        info!(
            "Wrote {} standard and {} meter records",
            records.standard, records.meter
        );
        Ok(RunSummary {
            records,
            variable_count: self.variables.len(),
            meter_count: self.meters.len(),
            unmatched_requests,
            warnings: self.warnings.messages().to_vec(),
        })
    }
}

/// One descriptor per requested frequency and schedule, or a single passive one if nothing was
/// requested. Only the first feeds meters.
fn reporting_setups(
    matches: &[RequestMatch],
    frequency_override: Option<ReportingFrequency>,
) -> Vec<ReportingSetup> {
    let mut setups: Vec<ReportingSetup> = match frequency_override {
        Some(frequency) => vec![ReportingSetup {
            report: true,
            frequency,
            schedule: matches.first().and_then(|m| m.schedule),
            feeds_meters: false,
        }],
        None if matches.is_empty() => vec![ReportingSetup {
            report: false,
            frequency: ReportingFrequency::Hourly,
            schedule: None,
            feeds_meters: false,
        }],
        None => matches
            .iter()
            .map(|m| ReportingSetup {
                report: true,
                frequency: m.frequency,
                schedule: m.schedule,
                feeds_meters: false,
            })
            .collect(),
    };
    if let Some(first) = setups.first_mut() {
        first.feeds_meters = true;
    }
    setups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::meters::MeterKind;
    use crate::core::query::Handle;
    use crate::core::schedule::DaySchedules;
    use crate::errors::{DeferredFatalError, SevereInputError};
    use crate::input::{
        CustomDecrementMeterInput, CustomMeterEntry, OutputVariableRequest,
    };
    use crate::output::MemoryOutput;
    use crate::simulation_time::SimulationTime;
    use approx::assert_relative_eq;
    use atomic_float::AtomicF64;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn variable_request(
        key: &str,
        name: &str,
        frequency: ReportingFrequency,
    ) -> OutputVariableRequest {
        OutputVariableRequest {
            key: key.into(),
            variable_name: name.into(),
            frequency,
            schedule: None,
        }
    }

    fn meter_request(name: &str, frequency: ReportingFrequency) -> OutputMeterRequest {
        OutputMeterRequest {
            name: name.into(),
            frequency,
            meter_file_only: false,
            cumulative: false,
        }
    }

    fn energy(key: &str) -> VariableRegistration<'_> {
        VariableRegistration::new(
            "Zone Lights Electricity Energy",
            "J",
            key,
            TimeStepDomain::Zone,
            StoreType::Summed,
        )
    }

    fn processor<'a>(output: &'a MemoryOutput, reporting: ReportingInput) -> OutputProcessor<'a> {
        OutputProcessor::new(
            output,
            reporting,
            EnvironmentInput::default(),
            Arc::new(DaySchedules::new()),
        )
        .unwrap()
    }

    #[rstest]
    fn should_collapse_duplicate_requests_into_one_descriptor() {
        let output = MemoryOutput::new();
        let mut processor = processor(
            &output,
            ReportingInput {
                output_variables: vec![
                    variable_request("ZONE1", "Zone Lights Electricity Energy", ReportingFrequency::Hourly),
                    variable_request("zone1", "zone lights electricity energy", ReportingFrequency::Hourly),
                ],
                ..Default::default()
            },
        );

        let registration = processor
            .register_real_variable(energy("ZONE1"), Arc::new(AtomicF64::new(0.)))
            .unwrap();

        assert!(registration.reportable);
        assert_eq!(registration.variables.len(), 1);
        processor.finalize_setup().unwrap();
        let summary = processor.end_run().unwrap();
        assert_eq!(summary.unmatched_requests, 0);
    }

    #[rstest]
    fn should_create_one_descriptor_per_requested_frequency() {
        let output = MemoryOutput::new();
        let mut processor = processor(
            &output,
            ReportingInput {
                output_variables: vec![
                    variable_request("", "Zone Lights Electricity Energy", ReportingFrequency::Hourly),
                    variable_request("", "Zone Lights Electricity Energy", ReportingFrequency::Monthly),
                ],
                ..Default::default()
            },
        );

        let registration = processor
            .register_real_variable(energy("ZONE1"), Arc::new(AtomicF64::new(0.)))
            .unwrap();
        let setups: Vec<_> = registration
            .variables
            .iter()
            .map(|id| processor.variables().summary(*id).unwrap().setup)
            .collect();

        assert_eq!(
            setups.iter().map(|s| s.frequency).collect::<Vec<_>>(),
            vec![ReportingFrequency::Hourly, ReportingFrequency::Monthly]
        );
        assert_eq!(
            setups.iter().map(|s| s.feeds_meters).collect::<Vec<_>>(),
            vec![true, false]
        );
        assert_eq!(
            registration
                .variables
                .iter()
                .map(|id| processor.variables().summary(*id).unwrap().report_id)
                .collect::<Vec<_>>(),
            vec![7, 8]
        );
    }

    #[rstest]
    fn should_register_unrequested_variables_passively() {
        let output = MemoryOutput::new();
        let mut processor = processor(&output, Default::default());

        let registration = processor
            .register_real_variable(energy("ZONE1"), Arc::new(AtomicF64::new(0.)))
            .unwrap();
        let again = processor
            .register_real_variable(energy("Zone1"), Arc::new(AtomicF64::new(0.)))
            .unwrap();

        assert!(!registration.reportable);
        assert_eq!(registration, again);
        assert_eq!(processor.variables().len(), 1);
        assert_eq!(processor.variables().catalog().count(), 1);
    }

    #[rstest]
    fn should_force_a_single_descriptor_for_a_frequency_override() {
        let output = MemoryOutput::new();
        let mut processor = processor(
            &output,
            ReportingInput {
                output_variables: vec![variable_request(
                    "",
                    "Zone Lights Electricity Energy",
                    ReportingFrequency::Hourly,
                )],
                ..Default::default()
            },
        );

        let registration = processor
            .register_real_variable(
                energy("ZONE1").with_frequency_override(ReportingFrequency::Daily),
                Arc::new(AtomicF64::new(0.)),
            )
            .unwrap();

        assert_eq!(registration.variables.len(), 1);
        let setup = processor
            .variables()
            .summary(registration.variables[0])
            .unwrap()
            .setup;
        assert_eq!(setup.frequency, ReportingFrequency::Daily);
        assert!(setup.report);
    }

    #[rstest]
    #[case("Zone Lights Electricity Energy", "")]
    #[case("Zone Lights Electricity Energy", "Dimensionless")]
    #[case("Zone Lights Electricity Energy [dimensionless]", "J")]
    fn should_reject_bad_units(#[case] name: &str, #[case] units: &str) {
        let output = MemoryOutput::new();
        let mut processor = processor(&output, Default::default());

        let result = processor.register_real_variable(
            VariableRegistration::new(name, units, "ZONE1", TimeStepDomain::Zone, StoreType::Summed),
            Arc::new(AtomicF64::new(0.)),
        );

        assert!(matches!(
            result,
            Err(OutputProcessorError::InvalidUnits { .. })
        ));
    }

    #[rstest]
    fn should_refuse_averaged_variables_on_meters() {
        let output = MemoryOutput::new();
        let mut processor = processor(&output, Default::default());
        let result = processor.register_real_variable(
            VariableRegistration::new(
                "Zone Mean Air Temperature",
                "C",
                "ZONE1",
                TimeStepDomain::Zone,
                StoreType::Averaged,
            )
            .on_meter(MeterRegistration::new("Electricity")),
            Arc::new(AtomicF64::new(0.)),
        );
        assert_eq!(
            result,
            Err(OutputProcessorError::AveragedVariableOnMeter(
                "Zone Mean Air Temperature".into()
            ))
        );
    }

    #[rstest]
    fn should_enforce_phases() {
        let output = MemoryOutput::new();
        let mut processor = processor(&output, Default::default());
        let time = SimulationTime::new(1, 1, 1).unwrap().iter().next().unwrap();

        let early = processor.update(TimeStepDomain::Zone, 1., &time).unwrap_err();
        assert_eq!(
            early.downcast_ref::<OutputProcessorError>(),
            Some(&OutputProcessorError::SetupNotFinalised)
        );

        processor.finalize_setup().unwrap();
        assert_eq!(
            processor.register_real_variable(energy("ZONE1"), Arc::new(AtomicF64::new(0.))),
            Err(OutputProcessorError::RegistrationClosed)
        );
        processor.update(TimeStepDomain::Zone, 1., &time).unwrap();
    }

    #[rstest]
    fn should_defer_severe_input_errors_to_finalise() {
        let output = MemoryOutput::new();
        let mut processor = processor(&output, Default::default());
        processor
            .register_real_variable(
                energy("ZONE1").on_meter(MeterRegistration::new("Moonbeams")),
                Arc::new(AtomicF64::new(0.)),
            )
            .unwrap();
        processor
            .define_custom_meter(CustomMeterDefinition {
                name: "Leftovers",
                resource_type: "Electricity",
                source_meter: Some("Electricity:Nowhere"),
                entries: &[],
            })
            .unwrap();

        let err = processor.finalize_setup().unwrap_err();
        let deferred = err.downcast_ref::<DeferredFatalError>().unwrap();
        assert_eq!(
            deferred.errors,
            vec![
                SevereInputError::UnknownResourceType("Moonbeams".into()),
                SevereInputError::UnknownSourceMeter {
                    meter: "Leftovers".into(),
                    source_meter: "Electricity:Nowhere".into()
                }
            ]
        );
    }

    #[rstest]
    fn should_add_meter_values_and_decrement_from_source() {
        let output = MemoryOutput::new();
        let reporting = ReportingInput {
            output_meters: vec![
                meter_request("Electricity:Facility", ReportingFrequency::TimeStep),
                meter_request("Facility Less Fans", ReportingFrequency::TimeStep),
            ],
            custom_decrement_meters: vec![CustomDecrementMeterInput {
                name: "Facility Less Fans".into(),
                resource_type: "Electricity".into(),
                source_meter: "Electricity:Facility".into(),
                entries: vec![CustomMeterEntry {
                    key: "FAN1".into(),
                    name: "Fan Electricity Energy".into(),
                }],
            }],
            ..Default::default()
        };
        let mut processor = processor(&output, reporting);
        let on_facility = MeterRegistration::new("Electricity");
        for (key, value) in [("A", 10.), ("B", 5.)] {
            processor
                .register_real_variable(
                    energy(key).on_meter(on_facility),
                    Arc::new(AtomicF64::new(value)),
                )
                .unwrap();
        }
        processor
            .register_real_variable(
                VariableRegistration::new(
                    "Fan Electricity Energy",
                    "J",
                    "FAN1",
                    TimeStepDomain::System,
                    StoreType::Summed,
                )
                .on_meter(on_facility),
                Arc::new(AtomicF64::new(3.)),
            )
            .unwrap();
        processor.finalize_setup().unwrap();

        let time = SimulationTime::new(1, 1, 1).unwrap().iter().next().unwrap();
        processor.update(TimeStepDomain::System, 1., &time).unwrap();
        processor.update(TimeStepDomain::Zone, 1., &time).unwrap();

        let query = processor.query();
        let facility = processor.meters().find("Electricity:Facility").unwrap();
        let decrement = processor.meters().find("Facility Less Fans").unwrap();
        assert_eq!(query.current_value(Handle::Meter(facility)), Ok(18.));
        assert_eq!(query.current_value(Handle::Meter(decrement)), Ok(15.));
        assert_eq!(
            processor.meters().meter(decrement).unwrap().kind,
            MeterKind::CustomDecrement { source: facility }
        );

        let summary = processor.end_run().unwrap();
        assert!(summary.warnings.is_empty());
        let mtr = output.contents("mtr").unwrap();
        assert!(mtr.contains("\n2,1,1,1,0,1,0.00,60.00,Wednesday\n10,18\n11,15\n"));
    }

    #[rstest]
    fn should_weight_averaged_system_sub_steps() {
        let output = MemoryOutput::new();
        let mut processor = processor(
            &output,
            ReportingInput {
                output_variables: vec![variable_request(
                    "",
                    "System Node Temperature",
                    ReportingFrequency::TimeStep,
                )],
                ..Default::default()
            },
        );
        let cell = Arc::new(AtomicF64::new(0.));
        let registration = processor
            .register_real_variable(
                VariableRegistration::new(
                    "System Node Temperature",
                    "C",
                    "NODE1",
                    TimeStepDomain::System,
                    StoreType::Averaged,
                ),
                cell.clone(),
            )
            .unwrap();
        processor.finalize_setup().unwrap();

        let time = SimulationTime::new(1, 1, 1).unwrap().iter().next().unwrap();
        for (value, elapsed) in [(10., 0.25), (20., 0.75)] {
            cell.store(value, Ordering::SeqCst);
            processor
                .update(TimeStepDomain::System, elapsed, &time)
                .unwrap();
        }
        processor.update(TimeStepDomain::Zone, 1., &time).unwrap();

        let handle = Handle::Real(registration.variables[0].index);
        assert_relative_eq!(
            processor.query().accumulated_last_value(handle).unwrap(),
            17.5
        );
    }

    #[rstest]
    fn should_gate_reporting_by_schedule_but_keep_metering() {
        let output = MemoryOutput::new();
        let mut office_hours = [1.; 24];
        office_hours[0] = 0.;
        let mut schedules = DaySchedules::new();
        schedules.add("Office Hours", &office_hours).unwrap();
        let schedules = Arc::new(schedules);

        let mut processor = OutputProcessor::new(
            &output,
            ReportingInput {
                output_variables: vec![OutputVariableRequest {
                    schedule: Some("Office Hours".into()),
                    ..variable_request(
                        "ZONE1",
                        "Zone Lights Electricity Energy",
                        ReportingFrequency::Hourly,
                    )
                }],
                output_meters: vec![OutputMeterRequest {
                    meter_file_only: true,
                    ..meter_request("Electricity:Facility", ReportingFrequency::Hourly)
                }],
                ..Default::default()
            },
            EnvironmentInput::default(),
            schedules.clone(),
        )
        .unwrap();
        processor
            .register_real_variable(
                energy("ZONE1").on_meter(MeterRegistration::new("Electricity")),
                Arc::new(AtomicF64::new(10.)),
            )
            .unwrap();
        processor.finalize_setup().unwrap();

        for time in SimulationTime::new(1, 1, 1).unwrap().iter().take(2) {
            schedules.set_hour(time.hour);
            processor.update(TimeStepDomain::Zone, 1., &time).unwrap();
        }
        processor.end_run().unwrap();

        let eso = output.contents("eso").unwrap();
        assert!(!eso.contains("2,1,1,1,0,1,0.00,60.00,Wednesday"));
        assert!(eso.contains("\n2,1,1,1,0,2,0.00,60.00,Wednesday\n7,10\n"));
        assert_eq!(eso.matches("\n7,10\n").count(), 1);

        let mtr = output.contents("mtr").unwrap();
        assert!(mtr.contains("\n2,1,1,1,0,1,0.00,60.00,Wednesday\n8,10\n"));
        assert!(mtr.contains("\n2,1,1,1,0,2,0.00,60.00,Wednesday\n8,10\n"));
    }

    /// Keeps the report streams in memory, but fails every structured write while `broken` is set.
    #[derive(Debug, Default)]
    struct FlakyStructuredOutput {
        memory: MemoryOutput,
        broken: AtomicBool,
    }

    struct FlakyWriter<'a, W: Write> {
        inner: W,
        broken: &'a AtomicBool,
    }

    impl<W: Write> Write for FlakyWriter<'_, W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Output for FlakyStructuredOutput {
        fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<impl Write> {
            Ok(FlakyWriter {
                inner: self.memory.writer_for_location_key(location_key)?,
                broken: if location_key == "sql" {
                    &self.broken
                } else {
                    &NEVER_BROKEN
                },
            })
        }
    }

    static NEVER_BROKEN: AtomicBool = AtomicBool::new(false);

    #[rstest]
    fn should_accept_updates_again_after_a_failed_write() {
        let output = FlakyStructuredOutput::default();
        let mut processor = OutputProcessor::new(
            &output,
            ReportingInput {
                output_variables: vec![variable_request(
                    "ZONE1",
                    "Zone Lights Electricity Energy",
                    ReportingFrequency::Hourly,
                )],
                structured_output: true,
                ..Default::default()
            },
            EnvironmentInput::default(),
            Arc::new(DaySchedules::new()),
        )
        .unwrap();
        processor
            .register_real_variable(energy("ZONE1"), Arc::new(AtomicF64::new(4.)))
            .unwrap();
        processor.finalize_setup().unwrap();
        let mut steps = SimulationTime::new(1, 1, 1).unwrap().iter();

        output.broken.store(true, Ordering::SeqCst);
        let first = steps.next().unwrap();
        assert!(processor.update(TimeStepDomain::Zone, 1., &first).is_err());

        output.broken.store(false, Ordering::SeqCst);
        let second = steps.next().unwrap();
        processor.update(TimeStepDomain::Zone, 1., &second).unwrap();
        let summary = processor.end_run().unwrap();
        assert_eq!(summary.variable_count, 1);
    }

    #[rstest]
    fn should_warn_about_unmatched_requests_once() {
        let output = MemoryOutput::new();
        let mut processor = processor(
            &output,
            ReportingInput {
                output_variables: vec![variable_request(
                    "",
                    "Zone Lights Electricity Enrgy",
                    ReportingFrequency::Hourly,
                )],
                output_meters: vec![meter_request("Gas:Facility", ReportingFrequency::Hourly)],
                ..Default::default()
            },
        );
        processor
            .register_real_variable(energy("ZONE1"), Arc::new(AtomicF64::new(1.)))
            .unwrap();
        processor.finalize_setup().unwrap();

        let summary = processor.end_run().unwrap();

        assert_eq!(summary.unmatched_requests, 1);
        assert_eq!(
            summary.warnings,
            vec![
                "Output:Meter=Gas:Facility,Hourly was requested but no meter of that name exists"
                    .to_string(),
                "Output:Variable=*,Zone Lights Electricity Enrgy,Hourly was requested but never matched a registered variable"
                    .to_string(),
            ]
        );
    }
}
