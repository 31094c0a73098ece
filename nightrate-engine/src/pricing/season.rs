//! Month-indexed seasonal multipliers
//!
//! Fixed lookup, never learned. Southern-hemisphere countries read the table
//! shifted by six months; property type scales the deviation from 1.0.

use crate::models::PropertyType;

/// Northern-hemisphere base table, January first
const NORTHERN_TABLE: [f64; 12] = [0.8, 0.8, 0.9, 1.0, 1.1, 1.3, 1.6, 1.6, 1.1, 0.9, 0.7, 1.0];

pub const SEASON_MIN: f64 = 0.6;
pub const SEASON_MAX: f64 = 1.8;

/// ISO codes and English names, matched case-insensitively
const SOUTHERN_COUNTRIES: &[&str] = &[
    "ar",
    "au",
    "br",
    "cl",
    "nz",
    "py",
    "uy",
    "za",
    "argentina",
    "australia",
    "brazil",
    "chile",
    "new zealand",
    "paraguay",
    "uruguay",
    "south africa",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

impl Hemisphere {
    pub fn for_country(country: &str) -> Self {
        let normalized = country.trim().to_lowercase();
        if SOUTHERN_COUNTRIES.contains(&normalized.as_str()) {
            Hemisphere::South
        } else {
            Hemisphere::North
        }
    }
}

/// Deviation amplification per property type
fn type_amplitude(property_type: PropertyType) -> f64 {
    match property_type {
        PropertyType::Villa | PropertyType::House => 1.25,
        PropertyType::Studio => 0.75,
        PropertyType::Apartment | PropertyType::Loft => 1.0,
    }
}

/// Seasonal multiplier for `month` (1-12), always within [0.6, 1.8]
pub fn season_multiplier(month: u32, country: &str, property_type: PropertyType) -> f64 {
    let month_index = (month.clamp(1, 12) - 1) as usize;
    let index = match Hemisphere::for_country(country) {
        Hemisphere::North => month_index,
        Hemisphere::South => (month_index + 6) % 12,
    };
    let base = NORTHERN_TABLE[index];
    let scaled = 1.0 + (base - 1.0) * type_amplitude(property_type);
    scaled.clamp(SEASON_MIN, SEASON_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_july_north_apartment() {
        assert_eq!(season_multiplier(7, "FR", PropertyType::Apartment), 1.6);
        assert_eq!(season_multiplier(4, "France", PropertyType::Loft), 1.0);
    }

    #[test]
    fn test_southern_shift() {
        // January in Australia reads the northern July entry
        assert_eq!(season_multiplier(1, "AU", PropertyType::Apartment), 1.6);
        assert_eq!(season_multiplier(1, " south africa ", PropertyType::Apartment), 1.6);
        assert_eq!(season_multiplier(7, "NZ", PropertyType::Apartment), 0.8);
    }

    #[test]
    fn test_type_scaling_and_clamp() {
        // 1 + 0.6 * 1.25 = 1.75
        assert!((season_multiplier(7, "FR", PropertyType::Villa) - 1.75).abs() < 1e-9);
        // 1 - 0.3 * 0.75 = 0.775
        assert!((season_multiplier(11, "FR", PropertyType::Studio) - 0.775).abs() < 1e-9);

        for month in 1..=12 {
            for ty in [
                PropertyType::Apartment,
                PropertyType::Villa,
                PropertyType::Studio,
                PropertyType::Loft,
                PropertyType::House,
            ] {
                let m = season_multiplier(month, "FR", ty);
                assert!((SEASON_MIN..=SEASON_MAX).contains(&m));
            }
        }
    }
}
