//! Log levels and their display attributes.
//!
//! Every rank owns a numeric value and a contiguous inclusive band of the
//! numeric axis. The bands cover `[0, 110000]` without gaps:
//!
//! | Rank  | Value  | Band           |
//! |-------|--------|----------------|
//! | Trace | 10000  | 0 - 10000      |
//! | Debug | 30000  | 10001 - 30000  |
//! | Info  | 40000  | 30001 - 40000  |
//! | Warn  | 60000  | 40001 - 60000  |
//! | Error | 70000  | 60001 - 70000  |
//! | Fatal | 110000 | 70001 - 110000 |
//!
//! Lookups never fail. Anything that does not resolve lands on
//! [`LogLevel::None`], the invalid sentinel.
//!
//! Display colors live in a [`LevelTable`] that the host constructs and
//! passes around, so two hosts in one process can color levels differently.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Severity rank of a log message.
///
/// `None` is the invalid sentinel. It has no numeric value and takes no part
/// in the rank ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    #[default]
    None,
}

impl LogLevel {
    /// Valid ranks in ascending order.
    pub const RANKS: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    /// Position in [`Self::RANKS`], `None` for the sentinel.
    pub const fn rank(self) -> Option<usize> {
        match self {
            Self::Trace => Some(0),
            Self::Debug => Some(1),
            Self::Info => Some(2),
            Self::Warn => Some(3),
            Self::Error => Some(4),
            Self::Fatal => Some(5),
            Self::None => None,
        }
    }

    /// Canonical numeric value.
    pub const fn value(self) -> Option<u32> {
        match self {
            Self::Trace => Some(10_000),
            Self::Debug => Some(30_000),
            Self::Info => Some(40_000),
            Self::Warn => Some(60_000),
            Self::Error => Some(70_000),
            Self::Fatal => Some(110_000),
            Self::None => None,
        }
    }

    /// Inclusive numeric band `(min, max)`.
    pub const fn range(self) -> Option<(u32, u32)> {
        match self {
            Self::Trace => Some((0, 10_000)),
            Self::Debug => Some((10_001, 30_000)),
            Self::Info => Some((30_001, 40_000)),
            Self::Warn => Some((40_001, 60_000)),
            Self::Error => Some((60_001, 70_000)),
            Self::Fatal => Some((70_001, 110_000)),
            Self::None => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
            Self::None => "None",
        }
    }

    /// Case-insensitive name lookup.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        Self::RANKS
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(name))
            .unwrap_or(Self::None)
    }

    /// Finds the rank whose band contains `value`.
    pub fn from_value(value: u32) -> Self {
        Self::RANKS
            .into_iter()
            .find(|level| matches!(level.range(), Some((min, max)) if (min..=max).contains(&value)))
            .unwrap_or(Self::None)
    }

    /// Signed variant of [`Self::from_value`] for wire formats that carry
    /// arbitrary integers.
    pub fn from_i64(value: i64) -> Self {
        u32::try_from(value).map_or(Self::None, Self::from_value)
    }

    /// Positional lookup (0 = Trace .. 5 = Fatal).
    pub fn from_index(index: usize) -> Self {
        Self::RANKS.get(index).copied().unwrap_or(Self::None)
    }

    pub fn is_valid(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Color ───────────────────────────────────────────────────────────

/// RGB display color, written as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const GRAY: Color = Color::rgb(128, 128, 128);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 128, 0);
    pub const ORANGE: Color = Color::rgb(255, 165, 0);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const PURPLE: Color = Color::rgb(128, 0, 128);
    pub const INDIAN_RED: Color = Color::rgb(205, 92, 92);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || ConfigError::invalid("color", format!("'{s}' is not a #rrggbb color"));
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Color {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

// ─── LevelTable ──────────────────────────────────────────────────────

/// Display attributes of one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelInfo {
    pub level: LogLevel,
    pub name: &'static str,
    /// Zero for the invalid sentinel.
    pub value: u32,
    pub range_min: u32,
    pub range_max: u32,
    pub color: Color,
}

impl LevelInfo {
    fn new(level: LogLevel, color: Color) -> Self {
        let (range_min, range_max) = level.range().unwrap_or((0, 0));
        Self {
            level,
            name: level.name(),
            value: level.value().unwrap_or(0),
            range_min,
            range_max,
            color,
        }
    }
}

/// Per-level display attributes.
///
/// Built explicitly by the host and shared by reference. Only the colors
/// are mutable; values and bands are fixed by [`LogLevel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    ranks: [LevelInfo; 6],
    invalid: LevelInfo,
}

impl LevelTable {
    pub fn new() -> Self {
        Self {
            ranks: [
                LevelInfo::new(LogLevel::Trace, Color::GRAY),
                LevelInfo::new(LogLevel::Debug, Color::BLACK),
                LevelInfo::new(LogLevel::Info, Color::GREEN),
                LevelInfo::new(LogLevel::Warn, Color::ORANGE),
                LevelInfo::new(LogLevel::Error, Color::RED),
                LevelInfo::new(LogLevel::Fatal, Color::PURPLE),
            ],
            invalid: LevelInfo::new(LogLevel::None, Color::INDIAN_RED),
        }
    }

    pub fn get(&self, level: LogLevel) -> &LevelInfo {
        match level.rank() {
            Some(idx) => &self.ranks[idx],
            None => &self.invalid,
        }
    }

    pub fn by_name(&self, name: &str) -> &LevelInfo {
        self.get(LogLevel::from_name(name))
    }

    pub fn by_value(&self, value: u32) -> &LevelInfo {
        self.get(LogLevel::from_value(value))
    }

    /// Attributes of the invalid sentinel.
    pub fn invalid(&self) -> &LevelInfo {
        &self.invalid
    }

    pub fn set_color(&mut self, level: LogLevel, color: Color) {
        match level.rank() {
            Some(idx) => self.ranks[idx].color = color,
            None => self.invalid.color = color,
        }
    }

    /// Valid ranks in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &LevelInfo> {
        self.ranks.iter()
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bands_are_contiguous_and_cover_the_axis() {
        let mut expected_min = 0;
        for level in LogLevel::RANKS {
            let (min, max) = level.range().unwrap();
            assert_eq!(min, expected_min, "{level} band starts at {min}");
            assert!(max >= min);
            let value = level.value().unwrap();
            assert!((min..=max).contains(&value), "{level} value outside its band");
            expected_min = max + 1;
        }
        assert_eq!(expected_min, 110_001);
    }

    #[test]
    fn from_value_band_edges() {
        assert_eq!(LogLevel::from_value(0), LogLevel::Trace);
        assert_eq!(LogLevel::from_value(10_000), LogLevel::Trace);
        assert_eq!(LogLevel::from_value(10_001), LogLevel::Debug);
        assert_eq!(LogLevel::from_value(40_000), LogLevel::Info);
        assert_eq!(LogLevel::from_value(40_001), LogLevel::Warn);
        assert_eq!(LogLevel::from_value(70_001), LogLevel::Fatal);
        assert_eq!(LogLevel::from_value(110_000), LogLevel::Fatal);
        assert_eq!(LogLevel::from_value(110_001), LogLevel::None);
        assert_eq!(LogLevel::from_i64(-1), LogLevel::None);
    }

    #[test]
    fn from_name_ignores_case() {
        assert_eq!(LogLevel::from_name("warn"), LogLevel::Warn);
        assert_eq!(LogLevel::from_name("WARN"), LogLevel::Warn);
        assert_eq!(LogLevel::from_name(" Fatal "), LogLevel::Fatal);
        assert_eq!(LogLevel::from_name("warning"), LogLevel::None);
        assert_eq!(LogLevel::from_name(""), LogLevel::None);
        assert_eq!(LogLevel::from_name("none"), LogLevel::None);
    }

    #[test]
    fn from_index_positions() {
        assert_eq!(LogLevel::from_index(0), LogLevel::Trace);
        assert_eq!(LogLevel::from_index(5), LogLevel::Fatal);
        assert_eq!(LogLevel::from_index(6), LogLevel::None);
    }

    #[test]
    fn default_colors() {
        let table = LevelTable::new();
        assert_eq!(table.get(LogLevel::Trace).color, Color::GRAY);
        assert_eq!(table.get(LogLevel::Info).color, Color::GREEN);
        assert_eq!(table.get(LogLevel::Fatal).color, Color::PURPLE);
        assert_eq!(table.invalid().color, Color::INDIAN_RED);
        assert_eq!(table.by_name("error").value, 70_000);
        assert_eq!(table.by_value(35_000).level, LogLevel::Info);
    }

    #[test]
    fn set_color_only_touches_one_level() {
        let mut table = LevelTable::new();
        table.set_color(LogLevel::Warn, Color::rgb(1, 2, 3));
        assert_eq!(table.get(LogLevel::Warn).color, Color::rgb(1, 2, 3));
        assert_eq!(table.get(LogLevel::Error).color, Color::RED);
        assert_eq!(table, {
            let mut other = LevelTable::new();
            other.set_color(LogLevel::Warn, "#010203".parse().unwrap());
            other
        });
    }

    #[test]
    fn color_parse_and_display() {
        let c: Color = "#ffa500".parse().unwrap();
        assert_eq!(c, Color::ORANGE);
        assert_eq!(Color::INDIAN_RED.to_string(), "#cd5c5c");
        assert!("#fff".parse::<Color>().is_err());
        assert!("#gg0000".parse::<Color>().is_err());
    }

    proptest! {
        #[test]
        fn every_value_in_range_has_exactly_one_rank(value in 0u32..=110_000) {
            let hits = LogLevel::RANKS
                .iter()
                .filter(|l| {
                    let (min, max) = l.range().unwrap();
                    (min..=max).contains(&value)
                })
                .count();
            prop_assert_eq!(hits, 1);
            prop_assert!(LogLevel::from_value(value).is_valid());
        }

        #[test]
        fn values_above_range_are_invalid(value in 110_001u32..) {
            prop_assert_eq!(LogLevel::from_value(value), LogLevel::None);
        }

        #[test]
        fn name_lookup_survives_case_changes(idx in 0usize..6, upper in any::<bool>()) {
            let level = LogLevel::from_index(idx);
            let name = if upper { level.name().to_uppercase() } else { level.name().to_lowercase() };
            prop_assert_eq!(LogLevel::from_name(&name), level);
        }
    }
}
