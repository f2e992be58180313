use crate::core::frequency::{ReportingFrequency, StoreType, TimeStepDomain};
use crate::core::variables::VariableKind;
use crate::simulation_time::SimulationTime;
use indexmap::IndexMap;
use serde::Deserialize;
use std::io::{BufReader, Read};

pub fn ingest(json: impl Read) -> Result<Input, anyhow::Error> {
    let input: Input = serde_json::from_reader(BufReader::new(json))?;
    input.simulation_time.validate()?;
    Ok(input)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Input {
    pub simulation_time: SimulationTime,
    #[serde(default)]
    pub environment: EnvironmentInput,
    #[serde(default)]
    pub reporting: ReportingInput,
    /// Named 24-hour schedule profiles, repeated every day
    #[serde(default)]
    pub schedules: IndexMap<String, Vec<f64>>,
    /// Quantities played back through the registry, one value per zone timestep (cycled)
    #[serde(default)]
    pub variables: Vec<VariableInput>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentInput {
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
    pub time_zone: f64,
    pub elevation: f64,
}

impl Default for EnvironmentInput {
    fn default() -> Self {
        Self {
            title: "RUN PERIOD 1".to_string(),
            latitude: 0.,
            longitude: 0.,
            time_zone: 0.,
            elevation: 0.,
        }
    }
}

/// What the user asked to have reported.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReportingInput {
    /// Requests are raised to at least this frequency
    #[serde(default)]
    pub minimum_reporting_frequency: Option<ReportingFrequency>,
    #[serde(default)]
    pub output_variables: Vec<OutputVariableRequest>,
    #[serde(default)]
    pub output_meters: Vec<OutputMeterRequest>,
    #[serde(default)]
    pub custom_meters: Vec<CustomMeterInput>,
    #[serde(default)]
    pub custom_decrement_meters: Vec<CustomDecrementMeterInput>,
    /// Mirror every record to the structured (JSON lines) sink
    #[serde(default)]
    pub structured_output: bool,
    /// List the variable and meter dictionaries sorted by name
    #[serde(default)]
    pub sort_dictionaries: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputVariableRequest {
    /// Blank or `*` matches every key
    #[serde(default)]
    pub key: String,
    pub variable_name: String,
    #[serde(default = "default_frequency")]
    pub frequency: ReportingFrequency,
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputMeterRequest {
    pub name: String,
    #[serde(default = "default_frequency")]
    pub frequency: ReportingFrequency,
    #[serde(default)]
    pub meter_file_only: bool,
    #[serde(default)]
    pub cumulative: bool,
}

fn default_frequency() -> ReportingFrequency {
    ReportingFrequency::Hourly
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CustomMeterEntry {
    /// Blank or `*` matches every key; ignored when the entry names a meter
    #[serde(default)]
    pub key: String,
    /// An output variable name, or the name of a meter whose variables are all taken
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CustomMeterInput {
    pub name: String,
    pub resource_type: String,
    pub entries: Vec<CustomMeterEntry>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CustomDecrementMeterInput {
    pub name: String,
    pub resource_type: String,
    pub source_meter: String,
    pub entries: Vec<CustomMeterEntry>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VariableInput {
    /// May carry its units inline as `Name [Units]`
    pub name: String,
    #[serde(default)]
    pub units: String,
    pub key: String,
    #[serde(default = "default_domain")]
    pub domain: TimeStepDomain,
    pub store_type: StoreType,
    #[serde(default = "default_kind")]
    pub kind: VariableKind,
    pub values: Vec<f64>,
    #[serde(default)]
    pub frequency_override: Option<ReportingFrequency>,
    #[serde(default)]
    pub meter: Option<MeterTagsInput>,
}

fn default_domain() -> TimeStepDomain {
    TimeStepDomain::Zone
}

fn default_kind() -> VariableKind {
    VariableKind::Real
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MeterTagsInput {
    pub resource_type: String,
    #[serde(default)]
    pub end_use: Option<String>,
    #[serde(default)]
    pub end_use_subcategory: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default = "default_multiplier")]
    pub zone_multiplier: f64,
    #[serde(default = "default_multiplier")]
    pub zone_list_multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::json;

    #[rstest]
    fn should_ingest_minimal_input() {
        let input = ingest(
            json!({
                "SimulationTime": {"start_day": 1, "days": 1, "timesteps_per_hour": 4}
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        assert_eq!(input.environment, EnvironmentInput::default());
        assert_eq!(input.reporting, ReportingInput::default());
        assert!(input.variables.is_empty());
    }

    #[rstest]
    fn should_apply_request_defaults() {
        let reporting: ReportingInput = serde_json::from_value(json!({
            "minimum_reporting_frequency": "daily",
            "output_variables": [{"variable_name": "Zone Mean Air Temperature"}],
            "output_meters": [{"name": "Electricity:Facility", "frequency": "Monthly", "cumulative": true}]
        }))
        .unwrap();

        assert_eq!(
            reporting.minimum_reporting_frequency,
            Some(ReportingFrequency::Daily)
        );
        assert_eq!(
            reporting.output_variables[0],
            OutputVariableRequest {
                key: "".into(),
                variable_name: "Zone Mean Air Temperature".into(),
                frequency: ReportingFrequency::Hourly,
                schedule: None,
            }
        );
        assert!(reporting.output_meters[0].cumulative);
        assert!(!reporting.output_meters[0].meter_file_only);
    }

    #[rstest]
    fn should_parse_variable_tokens() {
        let variable: VariableInput = serde_json::from_value(json!({
            "name": "Fan Electricity Energy [J]",
            "key": "AHU1",
            "domain": "HVAC",
            "store_type": "Sum",
            "values": [100.0],
            "meter": {"resource_type": "Electricity", "end_use": "Fans", "group": "HVAC"}
        }))
        .unwrap();

        assert_eq!(variable.domain, TimeStepDomain::System);
        assert_eq!(variable.store_type, StoreType::Summed);
        assert_eq!(variable.kind, VariableKind::Real);
        assert_eq!(variable.meter.unwrap().zone_multiplier, 1.);
    }

    #[rstest]
    fn should_reject_unknown_fields() {
        let result = ingest(
            json!({
                "SimulationTime": {"start_day": 1, "days": 1, "timesteps_per_hour": 1},
                "Weather": {}
            })
            .to_string()
            .as_bytes(),
        );
        assert!(result.is_err());
    }

    #[rstest]
    fn should_reject_invalid_simulation_time() {
        let result = ingest(
            json!({"SimulationTime": {"start_day": 1, "days": 1, "timesteps_per_hour": 7}})
                .to_string()
                .as_bytes(),
        );
        assert!(result.is_err());
    }
}
