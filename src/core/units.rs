use crate::errors::OutputProcessorError;

pub const MINUTES_PER_HOUR: u32 = 60;
pub const HOURS_PER_DAY: u32 = 24;
pub const DAYS_PER_YEAR: u32 = 365;
pub const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Widest `Name [Units]` string a variable may be displayed with.
pub const MAX_DISPLAY_WIDTH: usize = 120;

/// Splits the inline `Name [Units]` convention into its display name and units.
///
/// Returns `None` for the units if the name carries no bracketed suffix.
pub fn split_name_and_units(name: &str) -> (&str, Option<&str>) {
    let trimmed = name.trim();
    match (trimmed.rfind('['), trimmed.ends_with(']')) {
        (Some(open), true) => (
            trimmed[..open].trim_end(),
            Some(trimmed[open + 1..trimmed.len() - 1].trim()),
        ),
        _ => (trimmed, None),
    }
}

/// Resolves the display name and units of a variable being registered, preferring units given
/// inline in the name over the separately supplied ones.
pub fn resolve_name_and_units(
    name: &str,
    units: &str,
) -> Result<(String, String), OutputProcessorError> {
    let (display_name, inline_units) = split_name_and_units(name);
    let units = inline_units.unwrap_or(units.trim());

    if units.is_empty() || units.eq_ignore_ascii_case("dimensionless") {
        return Err(OutputProcessorError::InvalidUnits {
            name: display_name.to_string(),
            units: units.to_string(),
        });
    }
    // the displayed form is "name [units]"
    if display_name.len() + units.len() + 3 > MAX_DISPLAY_WIDTH {
        return Err(OutputProcessorError::NameTooLong {
            name: display_name.to_string(),
            units: units.to_string(),
            max: MAX_DISPLAY_WIDTH,
        });
    }

    Ok((display_name.to_string(), units.to_string()))
}

/// Days in the (non-leap) year before the first of the given 1-based month.
pub fn days_before_month(month: u32) -> u32 {
    DAYS_IN_MONTH[..(month.saturating_sub(1) as usize).min(12)]
        .iter()
        .sum()
}

/// Converts a 1-based day of year into a 1-based (month, day of month) pair.
pub fn month_and_day_from_day_of_year(day_of_year: u32) -> (u32, u32) {
    let mut remaining = day_of_year;
    for (idx, days) in DAYS_IN_MONTH.iter().enumerate() {
        if remaining <= *days {
            return (idx as u32 + 1, remaining);
        }
        remaining -= days;
    }
    (12, 31)
}
