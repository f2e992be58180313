use crate::core::frequency::StoreType;
use crate::core::meters::taxonomy::{MeterTags, ResourceType};
use crate::core::meters::{MeterKind, MeterStore};
use crate::core::requests::{display_key, is_wildcard_key};
use crate::core::variables::{VariableId, VariableStore};
use crate::errors::{ErrorAccumulator, OutputProcessorError, SevereInputError, Warnings};
use crate::input::{CustomDecrementMeterInput, CustomMeterEntry, CustomMeterInput};
use indexmap::IndexSet;
use tracing::debug;

/// A user-defined meter, optionally decremented from a source meter.
#[derive(Clone, Copy, Debug)]
pub struct CustomMeterDefinition<'a> {
    pub name: &'a str,
    pub resource_type: &'a str,
    pub source_meter: Option<&'a str>,
    pub entries: &'a [CustomMeterEntry],
}

impl<'a> From<&'a CustomMeterInput> for CustomMeterDefinition<'a> {
    fn from(input: &'a CustomMeterInput) -> Self {
        Self {
            name: &input.name,
            resource_type: &input.resource_type,
            source_meter: None,
            entries: &input.entries,
        }
    }
}

impl<'a> From<&'a CustomDecrementMeterInput> for CustomMeterDefinition<'a> {
    fn from(input: &'a CustomDecrementMeterInput) -> Self {
        Self {
            name: &input.name,
            resource_type: &input.resource_type,
            source_meter: Some(&input.source_meter),
            entries: &input.entries,
        }
    }
}

/// Builds a custom meter from its definition.
///
/// Bad input is recorded in `errors` and the definition is skipped; the caller checks the
/// accumulator once every definition has been processed. Returns the new meter's index, or
/// `None` if no meter was created.
pub fn define_custom_meter(
    definition: CustomMeterDefinition,
    variables: &VariableStore,
    meters: &mut MeterStore,
    errors: &mut ErrorAccumulator,
    warnings: &mut Warnings,
) -> Result<Option<usize>, OutputProcessorError> {
    let meter_name = definition.name.trim();
    if meter_name.is_empty() {
        errors.push(SevereInputError::MalformedCustomEntry {
            meter: definition.name.to_string(),
            position: 0,
        });
        return Ok(None);
    }
    if meters.find(meter_name).is_some() {
        errors.push(SevereInputError::DuplicateCustomMeter(meter_name.to_string()));
        return Ok(None);
    }
    let resource = match ResourceType::parse(definition.resource_type) {
        Ok(resource) => resource,
        Err(err) => {
            errors.push(err);
            return Ok(None);
        }
    };
    let source = match definition.source_meter {
        Some(source_name) => match meters.find(source_name) {
            Some(source) => Some((source, source_name.trim())),
            None => {
                errors.push(SevereInputError::UnknownSourceMeter {
                    meter: meter_name.to_string(),
                    source_meter: source_name.to_string(),
                });
                return Ok(None);
            }
        },
        None => None,
    };
    let source_contributors: IndexSet<VariableId> = source
        .map(|(source, _)| meters.contributors(source).into_iter().collect())
        .unwrap_or_default();

    let mut tagged: IndexSet<VariableId> = IndexSet::new();
    let mut units: Option<String> = None;

    for (position, entry) in definition.entries.iter().enumerate() {
        if entry.name.trim().is_empty() {
            errors.push(SevereInputError::MalformedCustomEntry {
                meter: meter_name.to_string(),
                position: position + 1,
            });
            continue;
        }

        let mut candidates = matching_variables(variables, entry);
        if candidates.is_empty() {
            match meters.find(&entry.name) {
                // takes the meter's variables as they stand now
                Some(meter) => candidates = meters.contributors(meter),
                None => {
                    warnings.push(format!(
                        "Meter:Custom '{meter_name}': entry '{}:{}' did not match any output variable or meter and was skipped",
                        display_key(&entry.key),
                        entry.name
                    ));
                    continue;
                }
            }
        }

        for candidate in candidates {
            let summary = variables.summary(candidate)?;
            if let Some((_, source_name)) = source {
                if !source_contributors.contains(&candidate) {
                    errors.push(SevereInputError::DecrementEntryNotOnSource {
                        meter: meter_name.to_string(),
                        key: summary.key.to_string(),
                        variable: summary.name.to_string(),
                        source_meter: source_name.to_string(),
                    });
                    continue;
                }
            }
            if tagged.contains(&candidate) {
                warnings.push(format!(
                    "Meter:Custom '{meter_name}': duplicate entry '{}:{}' ignored",
                    summary.key, summary.name
                ));
                continue;
            }
            match &units {
                None => units = Some(summary.units.to_string()),
                Some(established) if established != summary.units => {
                    warnings.push(format!(
                        "Meter:Custom '{meter_name}': entry '{}:{}' has units [{}] which differ from the meter's [{established}]; entry dropped",
                        summary.key, summary.name, summary.units
                    ));
                    continue;
                }
                Some(_) => {}
            }
            tagged.insert(candidate);
        }
    }

    let Some(units) = units.filter(|_| !tagged.is_empty()) else {
        warnings.push(format!(
            "Meter:Custom '{meter_name}' has no valid entries and will not be created"
        ));
        return Ok(None);
    };

    let kind = match source {
        Some((source, _)) => MeterKind::CustomDecrement { source },
        None => MeterKind::Custom,
    };
    let tags = MeterTags {
        resource,
        end_use: None,
        end_use_subcategory: None,
        group: None,
        zone: None,
    };
    let index = meters.add_meter(meter_name, &units, tags, kind)?;
    for variable in &tagged {
        meters.tag_custom(*variable, index);
    }
    debug!(
        "Defined custom meter '{meter_name}' [{units}] with {} variables",
        tagged.len()
    );

    Ok(Some(index))
}

/// Summed variables feeding meters whose name matches the entry and whose key is accepted.
fn matching_variables(variables: &VariableStore, entry: &CustomMeterEntry) -> Vec<VariableId> {
    let name = entry.name.trim();
    let key = entry.key.trim();
    variables
        .summaries()
        .filter(|(_, summary)| {
            summary.setup.feeds_meters
                && summary.store_type == StoreType::Summed
                && summary.name.eq_ignore_ascii_case(name)
                && (is_wildcard_key(key) || summary.key.eq_ignore_ascii_case(key))
        })
        .map(|(id, _)| id)
        .collect()
}
