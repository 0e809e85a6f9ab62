//! Code Calculator — derives the five consultation codes from a birth date.
//!
//! Pure and deterministic: no I/O, no clock, no randomness. Malformed input is
//! reported as a [`CodeError`], never a panic.
//!
//! # Derivation
//! - personality: digit root of the day
//! - connector:   digit root of every digit in `DD.MM.YYYY`
//! - realization: digit sum of `year % 100`, where a zero sum counts as 9
//! - generator:   digit sum(day) × digit sum(month), reduced
//! - mission:     personality + connector, master numbers 11 and 22 kept as-is

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;
const MASTER_NUMBERS: [u32; 2] = [11, 22];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("birth date '{0}' is not in DD.MM.YYYY or YYYY-MM-DD form")]
    Unparsable(String),

    #[error("birth date '{input}' has {component} {value} outside {range}")]
    OutOfRange {
        input: String,
        component: &'static str,
        value: i64,
        range: &'static str,
    },

    #[error("birth date '{0}' is not a calendar date")]
    NotACalendarDate(String),
}

/// A validated calendar date in the supported year window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BirthDate {
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl BirthDate {
    /// Accepts `DD.MM.YYYY` or `YYYY-MM-DD` (one- or two-digit day and month).
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let trimmed = input.trim();
        let unparsable = || CodeError::Unparsable(input.to_string());

        let (day, month, year) = if trimmed.contains('.') {
            let parts = split_numeric(trimmed, '.', [2, 2, 4]).ok_or_else(unparsable)?;
            (parts[0], parts[1], parts[2])
        } else if trimmed.contains('-') {
            let parts = split_numeric(trimmed, '-', [4, 2, 2]).ok_or_else(unparsable)?;
            (parts[2], parts[1], parts[0])
        } else {
            return Err(unparsable());
        };

        check_range(input, "day", day, 1, 31, "1..=31")?;
        check_range(input, "month", month, 1, 12, "1..=12")?;
        check_range(
            input,
            "year",
            year,
            MIN_YEAR as i64,
            MAX_YEAR as i64,
            "1900..=2100",
        )?;

        let (day, month, year) = (day as u32, month as u32, year as i32);
        NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| CodeError::NotACalendarDate(input.to_string()))?;

        Ok(BirthDate { day, month, year })
    }

    /// The `DD.MM.YYYY` rendering used by the connector code.
    pub fn canonical(&self) -> String {
        format!("{:02}.{:02}.{:04}", self.day, self.month, self.year)
    }
}

/// Splits `text` on `sep` into exactly three all-digit parts no longer than `max_len`.
fn split_numeric(text: &str, sep: char, max_len: [usize; 3]) -> Option<[i64; 3]> {
    let parts: Vec<&str> = text.split(sep).collect();
    if parts.len() != 3 {
        return None;
    }
    let mut out = [0i64; 3];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || part.len() > max_len[i] || !part.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        out[i] = part.parse().ok()?;
    }
    // Year must be written in full.
    let year_index = if sep == '.' { 2 } else { 0 };
    if parts[year_index].len() != 4 {
        return None;
    }
    Some(out)
}

fn check_range(
    input: &str,
    component: &'static str,
    value: i64,
    min: i64,
    max: i64,
    range: &'static str,
) -> Result<(), CodeError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(CodeError::OutOfRange {
            input: input.to_string(),
            component,
            value,
            range,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Codes
// ────────────────────────────────────────────────────────────────────────────

/// Names of the five codes, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeName {
    Personality,
    Connector,
    Realization,
    Generator,
    Mission,
}

impl CodeName {
    pub const ALL: [CodeName; 5] = [
        CodeName::Personality,
        CodeName::Connector,
        CodeName::Realization,
        CodeName::Generator,
        CodeName::Mission,
    ];

    /// Human-readable name used inside prompts.
    pub fn title(&self) -> &'static str {
        match self {
            CodeName::Personality => "Личность",
            CodeName::Connector => "Коннектор",
            CodeName::Realization => "Реализация",
            CodeName::Generator => "Генератор",
            CodeName::Mission => "Миссия",
        }
    }
}

/// The five derived codes. Immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codes {
    pub personality: u8,
    pub connector: u8,
    pub realization: u8,
    pub generator: u8,
    pub mission: u8,
}

impl Codes {
    pub fn get(&self, name: CodeName) -> u8 {
        match name {
            CodeName::Personality => self.personality,
            CodeName::Connector => self.connector,
            CodeName::Realization => self.realization,
            CodeName::Generator => self.generator,
            CodeName::Mission => self.mission,
        }
    }

    /// `[personality, connector, realization, generator, mission]`
    pub fn as_array(&self) -> [u8; 5] {
        [
            self.personality,
            self.connector,
            self.realization,
            self.generator,
            self.mission,
        ]
    }

    pub fn iter(&self) -> impl Iterator<Item = (CodeName, u8)> + '_ {
        CodeName::ALL.into_iter().map(move |name| (name, self.get(name)))
    }
}

/// Parses `input` and derives its codes.
pub fn calculate(input: &str) -> Result<Codes, CodeError> {
    Ok(codes_for(&BirthDate::parse(input)?))
}

pub fn codes_for(date: &BirthDate) -> Codes {
    let day_sum = digit_sum(date.day);
    let month_sum = digit_sum(date.month);

    let personality = reduce(date.day);
    let connector = reduce(digit_sum_str(&date.canonical()));

    let realization = match digit_sum(date.year.rem_euclid(100) as u32) {
        0 => 9,
        sum => reduce(sum),
    };

    let generator = reduce(day_sum * month_sum);

    let raw_mission = u32::from(personality) + u32::from(connector);
    let mission = if MASTER_NUMBERS.contains(&raw_mission) {
        raw_mission as u8
    } else {
        reduce(raw_mission)
    };

    Codes {
        personality,
        connector,
        realization,
        generator,
        mission,
    }
}

fn digit_sum(mut n: u32) -> u32 {
    let mut sum = 0;
    while n > 0 {
        sum += n % 10;
        n /= 10;
    }
    sum
}

fn digit_sum_str(text: &str) -> u32 {
    text.chars().filter_map(|c| c.to_digit(10)).sum()
}

/// Repeated digit sum until the value is at most 9.
fn reduce(mut n: u32) -> u8 {
    while n > 9 {
        n = digit_sum(n);
    }
    n as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn expected_reference() -> Codes {
        Codes {
            personality: 6,
            connector: 8,
            realization: 9,
            generator: 6,
            mission: 5,
        }
    }

    #[test]
    fn test_iso_form_matches_reference() {
        assert_eq!(calculate("1990-01-15").unwrap(), expected_reference());
    }

    #[test]
    fn test_dotted_form_matches_reference() {
        assert_eq!(calculate("15.01.1990").unwrap(), expected_reference());
    }

    #[test]
    fn test_as_array_order() {
        assert_eq!(
            calculate("1990-01-15").unwrap().as_array(),
            [6, 8, 9, 6, 5]
        );
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        assert_eq!(calculate("  15.01.1990 ").unwrap(), expected_reference());
    }

    #[test]
    fn test_single_digit_day_and_month() {
        assert_eq!(calculate("5.3.1984"), calculate("05.03.1984"));
    }

    #[test]
    fn test_master_number_eleven_is_kept() {
        // personality 2, connector 0+2+0+1+1+9+9+5 = 27 -> 9
        let codes = calculate("02.01.1995").unwrap();
        assert_eq!(codes.personality, 2);
        assert_eq!(codes.connector, 9);
        assert_eq!(codes.mission, 11);
    }

    #[test]
    fn test_realization_zero_sum_becomes_nine() {
        let codes = calculate("2000-01-01").unwrap();
        assert_eq!(codes.realization, 9);
    }

    #[test]
    fn test_generator_is_product_of_digit_sums() {
        // day 29 -> 11, month 12 -> 3, 33 -> 6
        assert_eq!(calculate("29.12.1980").unwrap().generator, 6);
    }

    #[test]
    fn test_out_of_range_components_are_rejected() {
        for input in [
            "32.01.1990",
            "00.01.1990",
            "15.13.1990",
            "15.00.1990",
            "15.01.1899",
            "15.01.2101",
            "1990-13-01",
            "1990-01-32",
        ] {
            assert!(
                matches!(calculate(input), Err(CodeError::OutOfRange { .. })),
                "{input} should be out of range"
            );
        }
    }

    #[test]
    fn test_unparsable_inputs_are_rejected() {
        for input in [
            "",
            "   ",
            "yesterday",
            "15/01/1990",
            "15.01.90",
            "15.01",
            "1990-01",
            "15.01.1990.1",
            "1a.01.1990",
            "-1.01.1990",
            "١٥.٠١.١٩٩٠",
            "15.01.19900",
        ] {
            assert!(
                matches!(calculate(input), Err(CodeError::Unparsable(_))),
                "{input:?} should be unparsable"
            );
        }
    }

    #[test]
    fn test_impossible_calendar_date_is_rejected() {
        assert!(matches!(
            calculate("31.02.1990"),
            Err(CodeError::NotACalendarDate(_))
        ));
        assert!(calculate("29.02.2000").is_ok());
        assert!(calculate("29.02.1900").is_err());
    }

    #[test]
    fn test_codes_stay_in_range_for_every_supported_date() {
        let mut date = NaiveDate::from_ymd_opt(MIN_YEAR, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(MAX_YEAR, 12, 31).unwrap();
        while date <= end {
            let input = format!("{:02}.{:02}.{}", date.day(), date.month(), date.year());
            let codes = calculate(&input).unwrap();
            for (name, value) in codes.iter() {
                if name == CodeName::Mission {
                    assert!(
                        (1..=9).contains(&value) || value == 11 || value == 22,
                        "{input}: mission {value}"
                    );
                } else {
                    assert!((1..=9).contains(&value), "{input}: {name:?} {value}");
                }
            }
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_calculation_is_deterministic() {
        assert_eq!(calculate("07.11.1977"), calculate("1977-11-07"));
        assert_eq!(calculate("07.11.1977"), calculate("07.11.1977"));
    }
}
