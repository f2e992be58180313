use crate::errors::OutputProcessorError;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// How often a variable or meter is written out.
///
/// Ordered from finest to coarsest, so a minimum reporting frequency can be applied with `max`.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[strum(ascii_case_insensitive)]
pub enum ReportingFrequency {
    #[strum(to_string = "EachCall", serialize = "Detailed", serialize = "Each Call")]
    EachCall,
    #[strum(to_string = "TimeStep", serialize = "Zone Timestep")]
    TimeStep,
    Hourly,
    Daily,
    Monthly,
    #[strum(to_string = "RunPeriod", serialize = "Environment", serialize = "Annual")]
    RunPeriod,
}

impl<'de> Deserialize<'de> for ReportingFrequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::from_str(token.trim()).map_err(|_| {
            serde::de::Error::custom(format!("unrecognised reporting frequency '{token}'"))
        })
    }
}

impl ReportingFrequency {
    /// Number of comma-separated fields carried by each data record at this frequency.
    pub fn field_count(&self) -> u8 {
        match self {
            Self::EachCall | Self::TimeStep | Self::Hourly => 1,
            Self::Daily => 7,
            Self::Monthly => 9,
            Self::RunPeriod => 11,
        }
    }

    /// Suffix written after `name [units]` on dictionary lines.
    pub fn annotation(&self) -> &'static str {
        match self {
            Self::EachCall => " !Each Call",
            Self::TimeStep => " !TimeStep",
            Self::Hourly => " !Hourly",
            Self::Daily => " !Daily [Value,Min,Hour,Minute,Max,Hour,Minute]",
            Self::Monthly => " !Monthly [Value,Min,Day,Hour,Minute,Max,Day,Hour,Minute]",
            Self::RunPeriod => {
                " !RunPeriod [Value,Min,Month,Day,Hour,Minute,Max,Month,Day,Hour,Minute]"
            }
        }
    }

    /// Suffix for cumulative meters, which only ever carry a single value.
    pub fn cumulative_annotation(&self) -> &'static str {
        match self {
            Self::EachCall => " !Each Call",
            Self::TimeStep => " !TimeStep",
            Self::Hourly => " !Hourly",
            Self::Daily => " !Daily",
            Self::Monthly => " !Monthly",
            Self::RunPeriod => " !RunPeriod",
        }
    }

    /// Reserved report id of the timestamp record written before data at this frequency.
    pub fn timestamp_report_id(&self) -> u32 {
        match self {
            Self::EachCall | Self::TimeStep | Self::Hourly => 2,
            Self::Daily => 3,
            Self::Monthly => 4,
            Self::RunPeriod => 5,
        }
    }

    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::EachCall => None,
            Self::TimeStep => Some(Resolution::TimeStep),
            Self::Hourly => Some(Resolution::Hourly),
            Self::Daily => Some(Resolution::Daily),
            Self::Monthly => Some(Resolution::Monthly),
            Self::RunPeriod => Some(Resolution::RunPeriod),
        }
    }
}

/// A temporal aggregation layer. Each layer closes into the next coarser one.
#[derive(Clone, Copy, Debug, Display, EnumIter, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Resolution {
    TimeStep,
    Hourly,
    Daily,
    Monthly,
    RunPeriod,
}

pub const RESOLUTION_COUNT: usize = 5;

impl Resolution {
    pub const ALL: [Resolution; RESOLUTION_COUNT] = [
        Self::TimeStep,
        Self::Hourly,
        Self::Daily,
        Self::Monthly,
        Self::RunPeriod,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<Resolution> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn frequency(&self) -> ReportingFrequency {
        match self {
            Self::TimeStep => ReportingFrequency::TimeStep,
            Self::Hourly => ReportingFrequency::Hourly,
            Self::Daily => ReportingFrequency::Daily,
            Self::Monthly => ReportingFrequency::Monthly,
            Self::RunPeriod => ReportingFrequency::RunPeriod,
        }
    }

    /// Whether data records at this resolution carry minimum and maximum values.
    pub fn reports_extremes(&self) -> bool {
        matches!(self, Self::Daily | Self::Monthly | Self::RunPeriod)
    }
}

/// Which of the two independently clocked sub-steps updates a variable.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum TimeStepDomain {
    #[strum(to_string = "Zone", serialize = "ZoneDomain")]
    Zone,
    #[strum(to_string = "HVAC", serialize = "System", serialize = "SystemDomain", serialize = "Plant")]
    System,
}

impl TimeStepDomain {
    pub fn parse(token: &str) -> Result<Self, OutputProcessorError> {
        Self::from_str(token.trim()).map_err(|_| OutputProcessorError::UnknownToken {
            kind: "time step domain",
            token: token.to_string(),
        })
    }
}

/// Whether a variable's values are time-averaged or summed over a reporting window.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum StoreType {
    #[strum(to_string = "Average", serialize = "Averaged", serialize = "State")]
    Averaged,
    #[strum(to_string = "Sum", serialize = "Summed", serialize = "NonState")]
    Summed,
}

impl StoreType {
    pub fn parse(token: &str) -> Result<Self, OutputProcessorError> {
        Self::from_str(token.trim()).map_err(|_| OutputProcessorError::UnknownToken {
            kind: "store type",
            token: token.to_string(),
        })
    }
}

macro_rules! deserialize_via_parse {
    ($ty:ty) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let token = String::deserialize(deserializer)?;
                <$ty>::parse(&token).map_err(serde::de::Error::custom)
            }
        }
    };
}

deserialize_via_parse!(TimeStepDomain);
deserialize_via_parse!(StoreType);
