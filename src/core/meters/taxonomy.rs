use crate::errors::SevereInputError;
use serde::Serialize;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// The kind of resource a meter totals. Parsing is case-insensitive and accepts the older names
/// still found in input files.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum ResourceType {
    #[strum(to_string = "Electricity", serialize = "Electric", serialize = "Elec")]
    Electricity,
    #[strum(to_string = "NaturalGas", serialize = "Gas", serialize = "Natural Gas")]
    NaturalGas,
    Gasoline,
    Diesel,
    Coal,
    #[strum(to_string = "FuelOilNo1", serialize = "FuelOil#1", serialize = "Fuel Oil No 1")]
    FuelOilNo1,
    #[strum(to_string = "FuelOilNo2", serialize = "FuelOil#2", serialize = "Fuel Oil No 2")]
    FuelOilNo2,
    #[strum(to_string = "Propane", serialize = "LPG")]
    Propane,
    OtherFuel1,
    OtherFuel2,
    #[strum(to_string = "Water", serialize = "H2O")]
    Water,
    OnSiteWater,
    MainsWater,
    RainWater,
    WellWater,
    Condensate,
    DistrictCooling,
    #[strum(to_string = "DistrictHeatingWater", serialize = "DistrictHeating")]
    DistrictHeatingWater,
    #[strum(to_string = "DistrictHeatingSteam", serialize = "Steam")]
    DistrictHeatingSteam,
    ElectricityProduced,
    ElectricityPurchased,
    ElectricitySurplusSold,
    ElectricityNet,
    SolarWater,
    SolarAir,
    #[strum(to_string = "EnergyTransfer", serialize = "EnergyXfer", serialize = "Xfer")]
    EnergyTransfer,
    Source,
    PlantLoopHeatingDemand,
    PlantLoopCoolingDemand,
    CO2,
    CO,
    CH4,
    NOx,
    N2O,
    SO2,
    PM,
    PM10,
    #[strum(to_string = "PM2.5", serialize = "PM25")]
    PM25,
    NH3,
    NMVOC,
    Hg,
    Pb,
    NuclearHigh,
    NuclearLow,
}

impl ResourceType {
    pub fn parse(token: &str) -> Result<Self, SevereInputError> {
        Self::from_str(token.trim())
            .map_err(|_| SevereInputError::UnknownResourceType(token.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum EndUse {
    #[strum(to_string = "InteriorLights", serialize = "Interior Lights", serialize = "InteriorLighting")]
    InteriorLights,
    #[strum(to_string = "ExteriorLights", serialize = "Exterior Lights", serialize = "ExteriorLighting")]
    ExteriorLights,
    #[strum(to_string = "InteriorEquipment", serialize = "Interior Equipment")]
    InteriorEquipment,
    #[strum(to_string = "ExteriorEquipment", serialize = "Exterior Equipment")]
    ExteriorEquipment,
    Fans,
    Pumps,
    Heating,
    Cooling,
    #[strum(to_string = "HeatRejection", serialize = "Heat Rejection")]
    HeatRejection,
    Humidifier,
    #[strum(to_string = "HeatRecovery", serialize = "Heat Recovery")]
    HeatRecovery,
    #[strum(to_string = "WaterSystems", serialize = "DHW", serialize = "Water Systems")]
    WaterSystems,
    Refrigeration,
    #[strum(to_string = "Cogeneration", serialize = "Cogen")]
    Cogeneration,
    Baseboard,
    HeatRecoveryForCooling,
    HeatRecoveryForHeating,
    HeatingCoils,
    CoolingCoils,
    Chillers,
    Boilers,
    Photovoltaic,
    WindTurbine,
    ElectricStorage,
    PowerConversion,
    HeatProduced,
    Miscellaneous,
}

impl EndUse {
    pub fn parse(token: &str) -> Result<Self, SevereInputError> {
        Self::from_str(token.trim()).map_err(|_| SevereInputError::UnknownEndUse(token.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
#[strum(ascii_case_insensitive)]
pub enum MeterGroup {
    Facility,
    Building,
    #[strum(to_string = "HVAC", serialize = "System")]
    HVAC,
    Plant,
}

impl MeterGroup {
    pub fn parse(token: &str) -> Result<Self, SevereInputError> {
        Self::from_str(token.trim()).map_err(|_| SevereInputError::UnknownGroup(token.to_string()))
    }
}

/// The normalised taxonomy tags of a metered quantity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeterTags {
    pub resource: ResourceType,
    pub end_use: Option<EndUse>,
    pub end_use_subcategory: Option<String>,
    pub group: Option<MeterGroup>,
    pub zone: Option<String>,
}

impl MeterTags {
    /// Normalises raw tag tokens. Blank optional tokens are treated as absent.
    pub fn parse(
        resource: &str,
        end_use: Option<&str>,
        end_use_subcategory: Option<&str>,
        group: Option<&str>,
        zone: Option<&str>,
    ) -> Result<Self, SevereInputError> {
        fn present(token: Option<&str>) -> Option<&str> {
            token.map(str::trim).filter(|t| !t.is_empty())
        }

        Ok(Self {
            resource: ResourceType::parse(resource)?,
            end_use: present(end_use).map(EndUse::parse).transpose()?,
            end_use_subcategory: present(end_use_subcategory).map(str::to_string),
            group: present(group).map(MeterGroup::parse).transpose()?,
            zone: present(zone).map(str::to_string),
        })
    }

    /// Every standard meter this quantity feeds, from the facility total down.
    pub fn meter_paths(&self) -> Vec<MeterPath> {
        let resource = self.resource;
        let mut paths = vec![MeterPath {
            name: format!("{resource}:Facility"),
            tags: self.ancestor(None, None, Some(MeterGroup::Facility), None),
        }];

        if let Some(group) = self.group.filter(|group| *group != MeterGroup::Facility) {
            paths.push(MeterPath {
                name: format!("{resource}:{group}"),
                tags: self.ancestor(None, None, Some(group), None),
            });
            if let (MeterGroup::Building, Some(zone)) = (group, &self.zone) {
                paths.push(MeterPath {
                    name: format!("{resource}:Zone:{zone}"),
                    tags: self.ancestor(None, None, Some(group), Some(zone)),
                });
            }
        }

        if let Some(end_use) = self.end_use {
            paths.push(MeterPath {
                name: format!("{end_use}:{resource}"),
                tags: self.ancestor(Some(end_use), None, None, None),
            });
            if let Some(zone) = &self.zone {
                paths.push(MeterPath {
                    name: format!("{end_use}:{resource}:Zone:{zone}"),
                    tags: self.ancestor(Some(end_use), None, None, Some(zone)),
                });
            }
            if let Some(subcategory) = &self.end_use_subcategory {
                paths.push(MeterPath {
                    name: format!("{subcategory}:{end_use}:{resource}"),
                    tags: self.ancestor(Some(end_use), Some(subcategory), None, None),
                });
            }
        }

        paths
    }

    fn ancestor(
        &self,
        end_use: Option<EndUse>,
        end_use_subcategory: Option<&String>,
        group: Option<MeterGroup>,
        zone: Option<&String>,
    ) -> MeterTags {
        MeterTags {
            resource: self.resource,
            end_use,
            end_use_subcategory: end_use_subcategory.cloned(),
            group,
            zone: zone.cloned(),
        }
    }
}

/// A standard meter name paired with the tags the meter itself carries.
#[derive(Clone, Debug, PartialEq)]
pub struct MeterPath {
    pub name: String,
    pub tags: MeterTags,
}
