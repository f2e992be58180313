use crate::core::meters::taxonomy::MeterTags;
use crate::core::meters::{MeterAttachment, MeterKind, MeterStore};
use crate::core::variables::VariableStore;
use crate::output::Output;
use crate::output_writer::format_number;
use csv::{QuoteStyle, Writer, WriterBuilder};
use itertools::Itertools;
use std::io::Write;

pub const METER_DETAILS_LOCATION_KEY: &str = "mtd";
pub const VARIABLE_DICTIONARY_LOCATION_KEY: &str = "rdd";
pub const METER_DICTIONARY_LOCATION_KEY: &str = "mdd";

const DICTIONARY_COLUMNS: &str =
    "Var Type (reported time step),Var Report Type,Variable Name [Units]";

/// Reports written once, when setup is finalised: how meters are composed, and the listings of
/// every known variable and meter.
pub struct SetupReports<'a> {
    meter_details: Box<dyn Write + 'a>,
    variable_dictionary: Writer<Box<dyn Write + 'a>>,
    meter_dictionary: Writer<Box<dyn Write + 'a>>,
}

fn listing_writer<'a>(writer: impl Write + 'a) -> Writer<Box<dyn Write + 'a>> {
    WriterBuilder::new()
        .flexible(true)
        .quote_style(QuoteStyle::Never)
        .from_writer(Box::new(writer))
}

impl<'a> SetupReports<'a> {
    pub fn new<O: Output>(output: &'a O) -> anyhow::Result<Self> {
        Ok(Self {
            meter_details: Box::new(output.writer_for_location_key(METER_DETAILS_LOCATION_KEY)?),
            variable_dictionary: listing_writer(
                output.writer_for_location_key(VARIABLE_DICTIONARY_LOCATION_KEY)?,
            ),
            meter_dictionary: listing_writer(
                output.writer_for_location_key(METER_DICTIONARY_LOCATION_KEY)?,
            ),
        })
    }

    pub fn write_all(
        mut self,
        variables: &VariableStore,
        meters: &MeterStore,
        sorted: bool,
    ) -> anyhow::Result<()> {
        self.write_meter_details(variables, meters)?;
        self.write_dictionaries(variables, meters, sorted)?;
        self.meter_details.flush()?;
        self.variable_dictionary.flush()?;
        self.meter_dictionary.flush()?;
        Ok(())
    }

    fn write_meter_details(
        &mut self,
        variables: &VariableStore,
        meters: &MeterStore,
    ) -> anyhow::Result<()> {
        let out = &mut self.meter_details;

        for attachment in meters.attachments() {
            let variable = variables.summary(attachment.variable)?;
            writeln!(
                out,
                " Meters for {},{}:{} [{}]",
                variable.report_id, variable.key, variable.name, variable.units
            )?;
            if attachment.zone_multiplier != 1. {
                writeln!(
                    out,
                    "  Zone Multiplier = {}",
                    format_number(attachment.zone_multiplier)
                )?;
            }
            if attachment.zone_list_multiplier != 1. {
                writeln!(
                    out,
                    "  Zone List Multiplier = {}",
                    format_number(attachment.zone_list_multiplier)
                )?;
            }
            for &index in attachment.meters.iter().chain(&attachment.custom_meters) {
                let meter = meters.meter(index)?;
                let label = match meter.kind {
                    MeterKind::Normal => "OnMeter",
                    MeterKind::Custom => "OnCustomMeter",
                    MeterKind::CustomDecrement { .. } => "OnCustomDecrementMeter",
                };
                writeln!(out, "  {label}={} [{}]", meter.name, meter.units)?;
            }
        }

        for (index, meter) in meters.meters().iter().enumerate() {
            writeln!(
                out,
                " For Meter={} [{}]{}, contents are:",
                meter.name,
                meter.units,
                tag_list(&meter.tags)
            )?;
            if let MeterKind::CustomDecrement { source } = meter.kind {
                writeln!(
                    out,
                    "  Values for this meter will be Source Meter={}; but will be decremented by:",
                    meters.meter(source)?.name
                )?;
            }
            for id in meters.contributors(index) {
                let variable = variables.summary(id)?;
                let suffix = meters
                    .attachment(id)
                    .map(multiplier_suffix)
                    .unwrap_or_default();
                writeln!(out, "  {}:{}{suffix}", variable.key, variable.name)?;
            }
        }
        Ok(())
    }

    fn write_dictionaries(
        &mut self,
        variables: &VariableStore,
        meters: &MeterStore,
        sorted: bool,
    ) -> anyhow::Result<()> {
        let version = format!("Program Version,eso-meters {}", env!("CARGO_PKG_VERSION"));

        self.variable_dictionary.write_record([version.as_str()])?;
        self.variable_dictionary.write_record([DICTIONARY_COLUMNS])?;
        let mut catalog = variables.catalog().collect_vec();
        if sorted {
            catalog.sort_by_key(|entry| entry.name.to_uppercase());
        }
        for entry in catalog {
            self.variable_dictionary.write_record([
                entry.domain.to_string(),
                entry.store_type.to_string(),
                format!("{} [{}]", entry.name, entry.units),
            ])?;
        }

        self.meter_dictionary.write_record([version.as_str()])?;
        self.meter_dictionary.write_record([DICTIONARY_COLUMNS])?;
        let mut listed = meters.meters().iter().collect_vec();
        if sorted {
            listed.sort_by_key(|meter| meter.name.to_uppercase());
        }
        for meter in listed {
            self.meter_dictionary.write_record([
                "Zone".to_string(),
                "Meter".to_string(),
                format!("{} [{}]", meter.name, meter.units),
            ])?;
        }
        Ok(())
    }
}

fn tag_list(tags: &MeterTags) -> String {
    let mut list = format!(", ResourceType={}", tags.resource);
    if let Some(end_use) = tags.end_use {
        list.push_str(&format!(", EndUse={end_use}"));
    }
    if let Some(subcategory) = &tags.end_use_subcategory {
        list.push_str(&format!(", EndUseSubcategory={subcategory}"));
    }
    if let Some(group) = tags.group {
        list.push_str(&format!(", Group={group}"));
    }
    if let Some(zone) = &tags.zone {
        list.push_str(&format!(", Zone={zone}"));
    }
    list
}

fn multiplier_suffix(attachment: &MeterAttachment) -> String {
    if attachment.multiplier() == 1. {
        String::new()
    } else {
        format!(
            " (Zone Multiplier = {}, Zone List Multiplier = {})",
            format_number(attachment.zone_multiplier),
            format_number(attachment.zone_list_multiplier)
        )
    }
}
