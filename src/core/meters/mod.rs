pub mod custom;
pub mod taxonomy;

use crate::core::accumulator::{Accumulator, REAL_SENTINELS};
use crate::core::frequency::{Resolution, StoreType, RESOLUTION_COUNT};
use crate::core::meters::taxonomy::{MeterPath, MeterTags};
use crate::core::variables::VariableId;
use crate::errors::OutputProcessorError;
use crate::simulation_time::DateStamp;
use bitflags::bitflags;
use indexmap::IndexMap;
use serde::Serialize;

bitflags! {
    /// Which records a meter writes when a resolution closes.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MeterReportFlags: u8 {
        /// Written to both the standard and meter streams.
        const REPORT = 1;
        const METER_FILE_ONLY = 1 << 1;
        const CUMULATIVE = 1 << 2;
        const CUMULATIVE_METER_FILE_ONLY = 1 << 3;
    }
}

impl MeterReportFlags {
    pub fn plain(&self) -> Option<StreamSelection> {
        StreamSelection::from_flags(
            self.contains(Self::REPORT),
            self.contains(Self::METER_FILE_ONLY),
        )
    }

    pub fn cumulative(&self) -> Option<StreamSelection> {
        StreamSelection::from_flags(
            self.contains(Self::CUMULATIVE),
            self.contains(Self::CUMULATIVE_METER_FILE_ONLY),
        )
    }
}

/// Where a meter record goes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamSelection {
    StandardAndMeter,
    MeterOnly,
}

impl StreamSelection {
    fn from_flags(report: bool, meter_file_only: bool) -> Option<Self> {
        match (report, meter_file_only) {
            (true, _) => Some(Self::StandardAndMeter),
            (false, true) => Some(Self::MeterOnly),
            (false, false) => None,
        }
    }

    pub fn includes_standard(&self) -> bool {
        matches!(self, Self::StandardAndMeter)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum MeterKind {
    Normal,
    Custom,
    CustomDecrement { source: usize },
}

#[derive(Debug)]
pub struct Meter {
    pub name: String,
    pub units: String,
    pub tags: MeterTags,
    pub kind: MeterKind,
    layers: [Accumulator; RESOLUTION_COUNT],
    timestep_value: f64,
    last_timestep_value: f64,
    /// Running total since the start of the environment.
    cumulative: f64,
    flags: [MeterReportFlags; RESOLUTION_COUNT],
    report_ids: [Option<u32>; RESOLUTION_COUNT],
    cumulative_report_ids: [Option<u32>; RESOLUTION_COUNT],
}

impl Meter {
    fn new(name: &str, units: &str, tags: MeterTags, kind: MeterKind) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            tags,
            kind,
            layers: std::array::from_fn(|_| Accumulator::new(REAL_SENTINELS)),
            timestep_value: 0.,
            last_timestep_value: 0.,
            cumulative: 0.,
            flags: Default::default(),
            report_ids: Default::default(),
            cumulative_report_ids: Default::default(),
        }
    }

    pub fn layer(&self, resolution: Resolution) -> &Accumulator {
        &self.layers[resolution.index()]
    }

    pub fn last_timestep_value(&self) -> f64 {
        self.last_timestep_value
    }

    pub fn cumulative(&self) -> f64 {
        self.cumulative
    }

    pub fn flags(&self, resolution: Resolution) -> MeterReportFlags {
        self.flags[resolution.index()]
    }

    pub fn request(&mut self, resolution: Resolution, flags: MeterReportFlags) {
        self.flags[resolution.index()] |= flags;
    }

    pub fn report_id(&self, resolution: Resolution) -> Option<u32> {
        self.report_ids[resolution.index()]
    }

    pub fn cumulative_report_id(&self, resolution: Resolution) -> Option<u32> {
        self.cumulative_report_ids[resolution.index()]
    }

    /// Hands out report ids for every requested record that does not have one yet.
    pub fn assign_report_ids(&mut self, mut next_id: impl FnMut() -> u32) {
        for resolution in Resolution::ALL {
            let flags = self.flags(resolution);
            let idx = resolution.index();
            if flags.plain().is_some() && self.report_ids[idx].is_none() {
                self.report_ids[idx] = Some(next_id());
            }
            if flags.cumulative().is_some() && self.cumulative_report_ids[idx].is_none() {
                self.cumulative_report_ids[idx] = Some(next_id());
            }
        }
    }

    /// Closes the timestep at `value`, the meter's total for the timestep just ended.
    fn close_timestep(&mut self, value: f64, stamp: DateStamp) {
        self.layers[Resolution::TimeStep.index()].fold(value, value, 1., stamp);
        self.last_timestep_value = value;
        self.cumulative += value;
        self.timestep_value = 0.;
    }

    pub fn roll_up(&mut self, resolution: Resolution, stamp: DateStamp) {
        if let Some(next) = resolution.next() {
            let (lower, upper) = self.layers.split_at_mut(next.index());
            upper[0].absorb(&lower[resolution.index()], StoreType::Summed, stamp);
        }
        self.layers[resolution.index()].reset();
    }

    pub fn reset_environment(&mut self) {
        self.layers.iter_mut().for_each(Accumulator::reset);
        self.timestep_value = 0.;
        self.cumulative = 0.;
    }
}

/// The meters a single variable feeds, with the multipliers applied to its contribution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeterAttachment {
    pub variable: VariableId,
    pub tags: Option<MeterTags>,
    pub zone_multiplier: f64,
    pub zone_list_multiplier: f64,
    /// Standard meters, in taxonomy order
    pub meters: Vec<usize>,
    /// Custom and custom-decrement meters, filled in once all standard meters exist
    pub custom_meters: Vec<usize>,
}

impl MeterAttachment {
    fn new(variable: VariableId) -> Self {
        Self {
            variable,
            tags: None,
            zone_multiplier: 1.,
            zone_list_multiplier: 1.,
            meters: vec![],
            custom_meters: vec![],
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.zone_multiplier * self.zone_list_multiplier
    }

    pub fn feeds(&self, meter: usize) -> bool {
        self.meters.contains(&meter) || self.custom_meters.contains(&meter)
    }
}

#[derive(Debug, Default)]
pub struct MeterStore {
    meters: Vec<Meter>,
    by_name: IndexMap<String, usize>,
    attachments: IndexMap<VariableId, MeterAttachment>,
}

impl MeterStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a meter, failing if one with the same name (ignoring case) already exists.
    pub fn add_meter(
        &mut self,
        name: &str,
        units: &str,
        tags: MeterTags,
        kind: MeterKind,
    ) -> Result<usize, OutputProcessorError> {
        let lookup = name.to_uppercase();
        if self.by_name.contains_key(&lookup) {
            return Err(OutputProcessorError::DuplicateMeter(name.to_string()));
        }
        let index = self.meters.len();
        self.meters.push(Meter::new(name, units, tags, kind));
        self.by_name.insert(lookup, index);
        Ok(index)
    }

    pub fn get_or_create_meter(&mut self, path: &MeterPath, units: &str) -> usize {
        match self.find(&path.name) {
            Some(index) => index,
            None => {
                let index = self.meters.len();
                self.meters
                    .push(Meter::new(&path.name, units, path.tags.clone(), MeterKind::Normal));
                self.by_name.insert(path.name.to_uppercase(), index);
                index
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name.trim().to_uppercase()).copied()
    }

    /// Wires a variable onto every standard meter its tags imply, creating meters as needed.
    ///
    /// A variable already attached keeps its existing record.
    pub fn attach_variable(
        &mut self,
        variable: VariableId,
        tags: &MeterTags,
        units: &str,
        zone_multiplier: f64,
        zone_list_multiplier: f64,
    ) -> &MeterAttachment {
        let meters: Vec<usize> = tags
            .meter_paths()
            .iter()
            .map(|path| self.get_or_create_meter(path, units))
            .collect();

        let attachment = self
            .attachments
            .entry(variable)
            .or_insert_with(|| MeterAttachment::new(variable));
        if attachment.tags.is_none() {
            attachment.tags = Some(tags.clone());
            attachment.zone_multiplier = zone_multiplier;
            attachment.zone_list_multiplier = zone_list_multiplier;
            for meter in meters {
                if !attachment.meters.contains(&meter) {
                    attachment.meters.push(meter);
                }
            }
        }
        attachment
    }

    /// Adds a custom meter to a variable's record. Returns false if it was already there.
    pub fn tag_custom(&mut self, variable: VariableId, meter: usize) -> bool {
        let attachment = self
            .attachments
            .entry(variable)
            .or_insert_with(|| MeterAttachment::new(variable));
        if attachment.custom_meters.contains(&meter) {
            return false;
        }
        attachment.custom_meters.push(meter);
        true
    }

    pub fn attachment(&self, variable: VariableId) -> Option<&MeterAttachment> {
        self.attachments.get(&variable)
    }

    pub fn attachments(&self) -> impl Iterator<Item = &MeterAttachment> {
        self.attachments.values()
    }

    /// Variables feeding a meter directly, in attachment order.
    pub fn contributors(&self, meter: usize) -> Vec<VariableId> {
        self.attachments
            .values()
            .filter(|attachment| attachment.feeds(meter))
            .map(|attachment| attachment.variable)
            .collect()
    }

    pub fn meter(&self, index: usize) -> Result<&Meter, OutputProcessorError> {
        self.meters
            .get(index)
            .ok_or(OutputProcessorError::HandleOutOfRange {
                registry: "meter",
                index,
                len: self.meters.len(),
            })
    }

    pub fn meter_mut(&mut self, index: usize) -> Result<&mut Meter, OutputProcessorError> {
        let len = self.meters.len();
        self.meters
            .get_mut(index)
            .ok_or(OutputProcessorError::HandleOutOfRange {
                registry: "meter",
                index,
                len,
            })
    }

    pub fn meters(&self) -> &[Meter] {
        &self.meters
    }

    pub fn meters_mut(&mut self) -> &mut [Meter] {
        &mut self.meters
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    /// Closes the timestep for every meter given each attached variable's total over it.
    ///
    /// Decrement meters are resolved in index order against their source, which is always
    /// defined before them.
    pub fn close_timestep(
        &mut self,
        mut variable_total: impl FnMut(VariableId) -> f64,
        stamp: DateStamp,
    ) {
        for attachment in self.attachments.values() {
            let contribution = variable_total(attachment.variable) * attachment.multiplier();
            for &meter in attachment.meters.iter().chain(&attachment.custom_meters) {
                self.meters[meter].timestep_value += contribution;
            }
        }

        for index in 0..self.meters.len() {
            let value = match self.meters[index].kind {
                MeterKind::CustomDecrement { source } => {
                    self.meters[source].last_timestep_value - self.meters[index].timestep_value
                }
                MeterKind::Normal | MeterKind::Custom => self.meters[index].timestep_value,
            };
            self.meters[index].close_timestep(value, stamp);
        }
    }

    pub fn reset_environment(&mut self) {
        self.meters.iter_mut().for_each(Meter::reset_environment);
    }
}
