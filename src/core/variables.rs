use crate::core::accumulator::{Accumulator, Sentinels, INTEGER_SENTINELS, REAL_SENTINELS};
use crate::core::frequency::{
    ReportingFrequency, Resolution, StoreType, TimeStepDomain, RESOLUTION_COUNT,
};
use crate::errors::OutputProcessorError;
use crate::simulation_time::DateStamp;
use atomic_float::AtomicF64;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Something that can report the current value of a simulated quantity on demand.
///
/// Physics modules keep ownership of their state and hand the registry a shared provider instead.
pub trait ValueProvider<T>: Debug + Send + Sync {
    fn read(&self) -> T;
}

impl ValueProvider<f64> for AtomicF64 {
    fn read(&self) -> f64 {
        self.load(Ordering::SeqCst)
    }
}

impl ValueProvider<i32> for AtomicI32 {
    fn read(&self) -> i32 {
        self.load(Ordering::SeqCst)
    }
}

/// A fixed value, for quantities that never change once set up.
#[derive(Debug)]
pub struct Constant<T>(pub T);

impl<T: Copy + Debug + Send + Sync> ValueProvider<T> for Constant<T> {
    fn read(&self) -> T {
        self.0
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum VariableKind {
    Real,
    Integer,
}

/// Scalar types that can be registered as output variables.
pub trait OutputValue: Copy + Debug + Into<f64> + Send + Sync + 'static {
    const KIND: VariableKind;
    const SENTINELS: Sentinels;
}

impl OutputValue for f64 {
    const KIND: VariableKind = VariableKind::Real;
    const SENTINELS: Sentinels = REAL_SENTINELS;
}

impl OutputValue for i32 {
    const KIND: VariableKind = VariableKind::Integer;
    const SENTINELS: Sentinels = INTEGER_SENTINELS;
}

/// Identifies one descriptor in one of the two variable registries.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct VariableId {
    pub kind: VariableKind,
    pub index: usize,
}

impl VariableId {
    pub fn real(index: usize) -> Self {
        Self {
            kind: VariableKind::Real,
            index,
        }
    }

    pub fn integer(index: usize) -> Self {
        Self {
            kind: VariableKind::Integer,
            index,
        }
    }
}

/// How a descriptor is reported, decided when it is created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReportingSetup {
    pub report: bool,
    pub frequency: ReportingFrequency,
    pub schedule: Option<usize>,
    /// Only the first descriptor of a registration feeds meters, so that a quantity requested at
    /// several frequencies is not counted more than once.
    pub feeds_meters: bool,
}

#[derive(Debug)]
pub struct VariableDescriptor<T: OutputValue> {
    pub report_id: u32,
    pub name: String,
    pub key: String,
    pub units: String,
    pub domain: TimeStepDomain,
    pub store_type: StoreType,
    provider: Arc<dyn ValueProvider<T>>,
    pub setup: ReportingSetup,
    /// Sum of raw values seen during the zone timestep in progress, drained when meters are
    /// updated.
    meter_timestep_total: f64,
    last_value: f64,
    last_reported: f64,
    layers: [Accumulator; RESOLUTION_COUNT],
}

impl<T: OutputValue> VariableDescriptor<T> {
    pub fn new(
        report_id: u32,
        name: &str,
        key: &str,
        units: &str,
        domain: TimeStepDomain,
        store_type: StoreType,
        provider: Arc<dyn ValueProvider<T>>,
        setup: ReportingSetup,
    ) -> Self {
        Self {
            report_id,
            name: name.to_string(),
            key: key.to_string(),
            units: units.to_string(),
            domain,
            store_type,
            provider,
            setup,
            meter_timestep_total: 0.,
            last_value: 0.,
            last_reported: 0.,
            layers: std::array::from_fn(|_| Accumulator::new(T::SENTINELS)),
        }
    }

    pub fn id(&self, index: usize) -> VariableId {
        VariableId {
            kind: T::KIND,
            index,
        }
    }

    pub fn read(&self) -> f64 {
        self.provider.read().into()
    }

    /// Reads the provider for one sub-step covering `weight` of a zone timestep.
    ///
    /// The value is always counted towards meters; it is folded into the reporting layers only
    /// when `reporting_on` is set. Returns the value read.
    pub fn sample(
        &mut self,
        weight: f64,
        reporting_on: bool,
        stamp: DateStamp,
    ) -> f64 {
        let value = self.read();
        self.last_value = value;
        if self.setup.feeds_meters {
            self.meter_timestep_total += value;
        }
        if self.setup.report && reporting_on {
            let contribution = match self.store_type {
                StoreType::Averaged => value * weight,
                StoreType::Summed => value,
            };
            self.layers[Resolution::TimeStep.index()].fold(value, contribution, weight, stamp);
        }
        value
    }

    pub fn take_meter_timestep_total(&mut self) -> f64 {
        std::mem::take(&mut self.meter_timestep_total)
    }

    pub fn layer(&self, resolution: Resolution) -> &Accumulator {
        &self.layers[resolution.index()]
    }

    /// Folds a closed layer into the next coarser one and resets it.
    pub fn roll_up(&mut self, resolution: Resolution, stamp: DateStamp) {
        if let Some(next) = resolution.next() {
            let (lower, upper) = self.layers.split_at_mut(next.index());
            upper[0].absorb(&lower[resolution.index()], self.store_type, stamp);
        }
        self.layers[resolution.index()].reset();
    }

    /// Whether this descriptor has a record to write when `resolution` closes.
    pub fn reports_at(&self, resolution: Resolution) -> bool {
        self.setup.report
            && self.setup.frequency == resolution.frequency()
            && !self.layers[resolution.index()].is_empty()
    }

    pub fn record_reported(&mut self, value: f64) {
        self.last_reported = value;
    }

    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    pub fn last_reported(&self) -> f64 {
        self.last_reported
    }

    pub fn reset_layers(&mut self) {
        self.meter_timestep_total = 0.;
        self.layers.iter_mut().for_each(Accumulator::reset);
    }
}

/// Entry in the catalog of every output variable a module has offered, reported or not.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: VariableKind,
    pub domain: TimeStepDomain,
    pub store_type: StoreType,
    pub units: String,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Identity {
    kind: VariableKind,
    name: String,
    key: String,
    units: String,
}

impl Identity {
    fn new(kind: VariableKind, name: &str, key: &str, units: &str) -> Self {
        Self {
            kind,
            name: name.to_uppercase(),
            key: key.to_uppercase(),
            units: units.to_string(),
        }
    }
}

/// The real and integer variable registries. Descriptors are only ever appended, so an index
/// handed out stays valid for the rest of the run.
#[derive(Debug, Default)]
pub struct VariableStore {
    reals: Vec<VariableDescriptor<f64>>,
    integers: Vec<VariableDescriptor<i32>>,
    catalog: IndexMap<String, CatalogEntry>,
    registrations: IndexMap<Identity, Vec<VariableId>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a variable in the catalog. The first registration of a name decides its entry.
    pub fn catalog_variable(
        &mut self,
        name: &str,
        kind: VariableKind,
        domain: TimeStepDomain,
        store_type: StoreType,
        units: &str,
    ) {
        self.catalog
            .entry(name.to_uppercase())
            .or_insert_with(|| CatalogEntry {
                name: name.to_string(),
                kind,
                domain,
                store_type,
                units: units.to_string(),
            });
    }

    pub fn catalog(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.catalog.values()
    }

    pub fn catalog_entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.catalog.get(&name.trim().to_uppercase())
    }

    /// Descriptors already created for this (name, key, units), if any.
    pub fn existing_registration(
        &self,
        kind: VariableKind,
        name: &str,
        key: &str,
        units: &str,
    ) -> Option<&[VariableId]> {
        self.registrations
            .get(&Identity::new(kind, name, key, units))
            .map(Vec::as_slice)
    }

    pub fn push_real(&mut self, descriptor: VariableDescriptor<f64>) -> VariableId {
        let id = VariableId::real(self.reals.len());
        self.remember(id, &descriptor.name, &descriptor.key, &descriptor.units);
        self.reals.push(descriptor);
        id
    }

    pub fn push_integer(&mut self, descriptor: VariableDescriptor<i32>) -> VariableId {
        let id = VariableId::integer(self.integers.len());
        self.remember(id, &descriptor.name, &descriptor.key, &descriptor.units);
        self.integers.push(descriptor);
        id
    }

    fn remember(&mut self, id: VariableId, name: &str, key: &str, units: &str) {
        self.registrations
            .entry(Identity::new(id.kind, name, key, units))
            .or_default()
            .push(id);
    }

    pub fn reals(&self) -> &[VariableDescriptor<f64>] {
        &self.reals
    }

    pub fn integers(&self) -> &[VariableDescriptor<i32>] {
        &self.integers
    }

    pub fn reals_mut(&mut self) -> &mut [VariableDescriptor<f64>] {
        &mut self.reals
    }

    pub fn integers_mut(&mut self) -> &mut [VariableDescriptor<i32>] {
        &mut self.integers
    }

    pub fn real(&self, index: usize) -> Result<&VariableDescriptor<f64>, OutputProcessorError> {
        self.reals
            .get(index)
            .ok_or(OutputProcessorError::HandleOutOfRange {
                registry: "real variable",
                index,
                len: self.reals.len(),
            })
    }

    pub fn integer(&self, index: usize) -> Result<&VariableDescriptor<i32>, OutputProcessorError> {
        self.integers
            .get(index)
            .ok_or(OutputProcessorError::HandleOutOfRange {
                registry: "integer variable",
                index,
                len: self.integers.len(),
            })
    }

    /// Common view of a descriptor of either kind.
    pub fn summary(&self, id: VariableId) -> Result<VariableSummary<'_>, OutputProcessorError> {
        Ok(match id.kind {
            VariableKind::Real => VariableSummary::from(self.real(id.index)?),
            VariableKind::Integer => VariableSummary::from(self.integer(id.index)?),
        })
    }

    pub fn summaries(&self) -> impl Iterator<Item = (VariableId, VariableSummary<'_>)> {
        let reals = self
            .reals
            .iter()
            .enumerate()
            .map(|(index, descriptor)| (VariableId::real(index), VariableSummary::from(descriptor)));
        let integers = self.integers.iter().enumerate().map(|(index, descriptor)| {
            (VariableId::integer(index), VariableSummary::from(descriptor))
        });
        reals.chain(integers)
    }

    pub fn take_meter_timestep_total(&mut self, id: VariableId) -> f64 {
        match id.kind {
            VariableKind::Real => self
                .reals
                .get_mut(id.index)
                .map_or(0., VariableDescriptor::take_meter_timestep_total),
            VariableKind::Integer => self
                .integers
                .get_mut(id.index)
                .map_or(0., VariableDescriptor::take_meter_timestep_total),
        }
    }

    pub fn len(&self) -> usize {
        self.reals.len() + self.integers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Borrowed identity and configuration of a descriptor, independent of its value type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VariableSummary<'a> {
    pub report_id: u32,
    pub name: &'a str,
    pub key: &'a str,
    pub units: &'a str,
    pub domain: TimeStepDomain,
    pub store_type: StoreType,
    pub setup: ReportingSetup,
}

impl<'a, T: OutputValue> From<&'a VariableDescriptor<T>> for VariableSummary<'a> {
    fn from(descriptor: &'a VariableDescriptor<T>) -> Self {
        Self {
            report_id: descriptor.report_id,
            name: &descriptor.name,
            key: &descriptor.key,
            units: &descriptor.units,
            domain: descriptor.domain,
            store_type: descriptor.store_type,
            setup: descriptor.setup,
        }
    }
}
