//! Domain models shared by the source adapters.
//!
//! - [`State`] - Australian states and territories with their codes
//! - [`AgeGroup`] - Age bracket parsed from the many spellings used upstream
//! - [`normalize_sex`] - Suppressed sex labels cleared

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Country value attached to every Australian dataset.
pub const COUNTRY: &str = "Australia";

// =============================================================================
// States
// =============================================================================

/// Australian state or territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    NewSouthWales,
    Victoria,
    Queensland,
    Tasmania,
    WesternAustralia,
    SouthAustralia,
    NorthernTerritory,
    AustralianCapitalTerritory,
}

impl State {
    /// All states, in the order the datasets list them.
    pub const ALL: [State; 8] = [
        State::NewSouthWales,
        State::Victoria,
        State::Queensland,
        State::Tasmania,
        State::WesternAustralia,
        State::SouthAustralia,
        State::NorthernTerritory,
        State::AustralianCapitalTerritory,
    ];

    /// Abbreviation used as `state_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NewSouthWales => "NSW",
            Self::Victoria => "VIC",
            Self::Queensland => "QLD",
            Self::Tasmania => "TAS",
            Self::WesternAustralia => "WA",
            Self::SouthAustralia => "SA",
            Self::NorthernTerritory => "NT",
            Self::AustralianCapitalTerritory => "ACT",
        }
    }

    /// Full name used as `state_name`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewSouthWales => "New South Wales",
            Self::Victoria => "Victoria",
            Self::Queensland => "Queensland",
            Self::Tasmania => "Tasmania",
            Self::WesternAustralia => "Western Australia",
            Self::SouthAustralia => "South Australia",
            Self::NorthernTerritory => "Northern Territory",
            Self::AustralianCapitalTerritory => "Australian Capital Territory",
        }
    }

    /// Look up by abbreviation (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.code().eq_ignore_ascii_case(code))
    }

    /// Look up by full name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

// =============================================================================
// Age Group
// =============================================================================

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Age bracket, closed (`20-29`) or open-ended (`95+`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgeGroup {
    pub lower: u32,
    pub upper: Option<u32>,
}

impl AgeGroup {
    /// Parse any of `"20-29"`, `"AgeGroup_20-24"`, `"95+"`, `"90"`.
    ///
    /// The first number is the lower bound, a second number (if any) the
    /// upper bound. Returns `None` when the text holds no number.
    pub fn parse(text: &str) -> Option<Self> {
        let mut numbers = DIGITS
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<u32>().ok());
        let lower = numbers.next()?;
        let upper = numbers.next();
        Some(Self { lower, upper })
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upper {
            Some(upper) => write!(f, "{}-{}", self.lower, upper),
            None => write!(f, "{}+", self.lower),
        }
    }
}

// =============================================================================
// Sex
// =============================================================================

/// Normalize a sex label.
///
/// The `*` placeholder used for suppressed values becomes the empty string;
/// any other label is trimmed and kept as published.
pub fn normalize_sex(raw: &str) -> String {
    match raw.trim() {
        "*" => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_lookup() {
        assert_eq!(State::from_code("nsw"), Some(State::NewSouthWales));
        assert_eq!(State::from_name("Western Australia").map(|s| s.code()), Some("WA"));
        assert_eq!(State::from_code("XX"), None);
    }

    #[test]
    fn test_age_group_forms() {
        assert_eq!(AgeGroup::parse("20-29").unwrap().to_string(), "20-29");
        assert_eq!(AgeGroup::parse("AgeGroup_20-24").unwrap().to_string(), "20-24");
        assert_eq!(AgeGroup::parse("95+").unwrap().to_string(), "95+");
        assert_eq!(AgeGroup::parse("AgeGroup_70+").unwrap().to_string(), "70+");
        assert!(AgeGroup::parse("None").is_none());
    }

    #[test]
    fn test_sex_normalization() {
        assert_eq!(normalize_sex("*"), "");
        assert_eq!(normalize_sex("M"), "M");
        assert_eq!(normalize_sex(" Female "), "Female");
    }
}
