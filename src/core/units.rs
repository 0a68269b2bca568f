//! Display units for the cumulative counter. Decimal (1000-based) scaling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the cumulative byte count is presented. Purely a presentation hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayUnit {
    #[default]
    Auto,
    Byte,
    Kilobyte,
    Megabyte,
    Gigabyte,
}

impl DisplayUnit {
    pub const ALL: [DisplayUnit; 5] = [
        DisplayUnit::Auto,
        DisplayUnit::Byte,
        DisplayUnit::Kilobyte,
        DisplayUnit::Megabyte,
        DisplayUnit::Gigabyte,
    ];

    /// Stable index used by the settings store.
    pub fn index(self) -> u32 {
        match self {
            DisplayUnit::Auto => 0,
            DisplayUnit::Byte => 1,
            DisplayUnit::Kilobyte => 2,
            DisplayUnit::Megabyte => 3,
            DisplayUnit::Gigabyte => 4,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayUnit::Auto => "Auto",
            DisplayUnit::Byte => "Byte",
            DisplayUnit::Kilobyte => "kByte",
            DisplayUnit::Megabyte => "MByte",
            DisplayUnit::Gigabyte => "GByte",
        }
    }
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DisplayUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|u| u.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown display unit: {s}"))
    }
}

/// Format a byte count in the given unit.
///
/// `Auto` picks the largest unit that keeps the integer part below 1000.
/// A fixed kilobyte unit prints as `KByte`, an automatic one as `kByte`.
pub fn format_bytes(bytes: u64, unit: DisplayUnit) -> String {
    let fixed_kilobyte = unit == DisplayUnit::Kilobyte;
    let unit = match unit {
        DisplayUnit::Auto if bytes < 1_000 => DisplayUnit::Byte,
        DisplayUnit::Auto if bytes < 1_000_000 => DisplayUnit::Kilobyte,
        DisplayUnit::Auto if bytes < 1_000_000_000 => DisplayUnit::Megabyte,
        DisplayUnit::Auto => DisplayUnit::Gigabyte,
        fixed => fixed,
    };

    match (unit, fixed_kilobyte) {
        (DisplayUnit::Kilobyte, true) => format!("{:.3} KByte", bytes as f64 / 1e3),
        (DisplayUnit::Kilobyte, false) => format!("{:.3} kByte", bytes as f64 / 1e3),
        (DisplayUnit::Megabyte, _) => format!("{:.3} MByte", bytes as f64 / 1e6),
        (DisplayUnit::Gigabyte, _) => format!("{:.3} GByte", bytes as f64 / 1e9),
        _ => format!("{bytes} Byte"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_picks_decimal_unit() {
        assert_eq!(format_bytes(0, DisplayUnit::Auto), "0 Byte");
        assert_eq!(format_bytes(999, DisplayUnit::Auto), "999 Byte");
        assert_eq!(format_bytes(1_000, DisplayUnit::Auto), "1.000 kByte");
        assert_eq!(format_bytes(1_536, DisplayUnit::Auto), "1.536 kByte");
        assert_eq!(format_bytes(2_500_000, DisplayUnit::Auto), "2.500 MByte");
        assert_eq!(
            format_bytes(1_800_000_000, DisplayUnit::Auto),
            "1.800 GByte"
        );
    }

    #[test]
    fn test_fixed_units_ignore_magnitude() {
        assert_eq!(format_bytes(1_234_567, DisplayUnit::Byte), "1234567 Byte");
        assert_eq!(format_bytes(12, DisplayUnit::Kilobyte), "0.012 KByte");
        assert_eq!(format_bytes(1_234_567, DisplayUnit::Megabyte), "1.235 MByte");
        assert_eq!(format_bytes(500_000_000, DisplayUnit::Gigabyte), "0.500 GByte");
    }

    #[test]
    fn test_kilobyte_suffix_depends_on_selection() {
        assert_eq!(format_bytes(4_096, DisplayUnit::Auto), "4.096 kByte");
        assert_eq!(format_bytes(4_096, DisplayUnit::Kilobyte), "4.096 KByte");
        // The menu label stays `kByte` in both cases.
        assert_eq!(DisplayUnit::Kilobyte.label(), "kByte");
    }

    #[test]
    fn test_index_roundtrip_and_out_of_range() {
        for unit in DisplayUnit::ALL {
            assert_eq!(DisplayUnit::from_index(unit.index()), Some(unit));
        }
        assert_eq!(DisplayUnit::from_index(5), None);
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!("kByte".parse::<DisplayUnit>(), Ok(DisplayUnit::Kilobyte));
        assert_eq!("gbyte".parse::<DisplayUnit>(), Ok(DisplayUnit::Gigabyte));
        assert_eq!("Auto".parse::<DisplayUnit>(), Ok(DisplayUnit::Auto));
        assert!("TiB".parse::<DisplayUnit>().is_err());
    }
}
