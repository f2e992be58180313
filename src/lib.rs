#![allow(clippy::too_many_arguments)]

pub mod core;
pub mod errors;
pub mod input;
pub mod output;
pub mod output_writer;
pub mod processor;
pub mod setup_reports;
pub mod simulation_time;
pub mod structured_output;

pub use crate::processor::{
    MeterRegistration, OutputProcessor, Registration, RunSummary, VariableRegistration,
};

use crate::core::frequency::TimeStepDomain;
use crate::core::schedule::DaySchedules;
use crate::core::variables::VariableKind;
use crate::input::{ingest, MeterTagsInput, VariableInput};
use crate::output::Output;
use atomic_float::AtomicF64;
use std::io::Read;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::info;

/// Runs a simulation period from a JSON project, playing each configured variable's values back
/// through the output processor and writing every report to `output`.
pub fn run_project(input: impl Read, output: impl Output) -> anyhow::Result<RunSummary> {
    let input = ingest(input)?;

    let mut schedules = DaySchedules::new();
    for (name, values) in &input.schedules {
        schedules.add(name, values)?;
    }
    let schedules = Arc::new(schedules);

    let mut processor = OutputProcessor::new(
        &output,
        input.reporting.clone(),
        input.environment.clone(),
        schedules.clone(),
    )?;

    let mut played = Vec::with_capacity(input.variables.len());
    for variable in &input.variables {
        played.push(PlayedVariable::register(&mut processor, variable)?);
    }
    processor.finalize_setup()?;
    processor.begin_environment()?;

    let has_system_variables = played
        .iter()
        .any(|variable| variable.domain == TimeStepDomain::System);
    let simulation_time = &input.simulation_time;
    info!(
        "Running {} timesteps for {} variables",
        simulation_time.total_steps(),
        played.len()
    );

    for time in simulation_time.iter() {
        schedules.set_hour(time.hour);
        for variable in &played {
            variable.advance(time.index);
        }
        if has_system_variables {
            processor.update(TimeStepDomain::System, time.timestep, &time)?;
        }
        processor.update(TimeStepDomain::Zone, time.timestep, &time)?;
    }

    processor.end_run()
}

#[derive(Debug)]
enum Cell {
    Real(Arc<AtomicF64>),
    Integer(Arc<AtomicI32>),
}

/// A configured quantity whose values are replayed one per zone timestep, cycling when they run
/// out.
#[derive(Debug)]
struct PlayedVariable {
    domain: TimeStepDomain,
    values: Vec<f64>,
    cell: Cell,
}

impl PlayedVariable {
    fn register(processor: &mut OutputProcessor, input: &VariableInput) -> anyhow::Result<Self> {
        let mut registration = VariableRegistration::new(
            &input.name,
            &input.units,
            &input.key,
            input.domain,
            input.store_type,
        );
        if let Some(frequency) = input.frequency_override {
            registration = registration.with_frequency_override(frequency);
        }
        if let Some(tags) = &input.meter {
            registration = registration.on_meter(meter_registration(tags));
        }

        let first = input.values.first().copied().unwrap_or_default();
        let cell = match input.kind {
            VariableKind::Real => {
                let cell = Arc::new(AtomicF64::new(first));
                processor.register_real_variable(registration, cell.clone())?;
                Cell::Real(cell)
            }
            VariableKind::Integer => {
                let cell = Arc::new(AtomicI32::new(first.round() as i32));
                processor.register_integer_variable(registration, cell.clone())?;
                Cell::Integer(cell)
            }
        };

        Ok(Self {
            domain: input.domain,
            values: input.values.clone(),
            cell,
        })
    }

    fn advance(&self, index: usize) {
        if self.values.is_empty() {
            return;
        }
        let value = self.values[index % self.values.len()];
        match &self.cell {
            Cell::Real(cell) => cell.store(value, Ordering::SeqCst),
            Cell::Integer(cell) => cell.store(value.round() as i32, Ordering::SeqCst),
        }
    }
}

fn meter_registration(tags: &MeterTagsInput) -> MeterRegistration<'_> {
    MeterRegistration {
        resource_type: &tags.resource_type,
        end_use: tags.end_use.as_deref(),
        end_use_subcategory: tags.end_use_subcategory.as_deref(),
        group: tags.group.as_deref(),
        zone: tags.zone.as_deref(),
        zone_multiplier: tags.zone_multiplier,
        zone_list_multiplier: tags.zone_list_multiplier,
    }
}
