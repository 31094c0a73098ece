//! Property, pricing envelope and strategy profile

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::ValidationError;

/// Revenue strategy profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Strategy {
    Prudent,
    #[default]
    Balanced,
    Aggressive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Prudent => "Prudent",
            Strategy::Balanced => "Balanced",
            Strategy::Aggressive => "Aggressive",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prudent" => Ok(Strategy::Prudent),
            "balanced" => Ok(Strategy::Balanced),
            "aggressive" => Ok(Strategy::Aggressive),
            _ => Err(ValidationError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Closed set of property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Apartment,
    Villa,
    Studio,
    Loft,
    House,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::Villa => "villa",
            PropertyType::Studio => "studio",
            PropertyType::Loft => "loft",
            PropertyType::House => "house",
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apartment" => Ok(PropertyType::Apartment),
            "villa" => Ok(PropertyType::Villa),
            "studio" => Ok(PropertyType::Studio),
            "loft" => Ok(PropertyType::Loft),
            "house" => Ok(PropertyType::House),
            _ => Err(ValidationError::UnknownPropertyType(s.to_string())),
        }
    }
}

/// City/country pair used to key market features
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub country: String,
}

/// `(floor, base, ceiling)` with `floor < base < ceiling`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceEnvelope {
    pub floor: f64,
    pub base: f64,
    pub ceiling: f64,
}

impl PriceEnvelope {
    /// Envelope with the ceiling defaulting to `4·base`
    pub fn new(floor: f64, base: f64, ceiling: Option<f64>) -> Self {
        Self {
            floor,
            base,
            ceiling: ceiling.unwrap_or(base * 4.0),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let values = [self.floor, self.base, self.ceiling];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ValidationError::InvalidEnvelope(format!(
                "prices must be finite and non-negative (floor={}, base={}, ceiling={})",
                self.floor, self.base, self.ceiling
            )));
        }
        if !(self.floor < self.base && self.base < self.ceiling) {
            return Err(ValidationError::InvalidEnvelope(format!(
                "expected floor < base < ceiling, got {} / {} / {}",
                self.floor, self.base, self.ceiling
            )));
        }
        Ok(())
    }
}

/// Stay rules and weekday markup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StayRules {
    pub min_stay: u32,
    pub max_stay: Option<u32>,
    pub weekly_discount_pct: f64,
    pub monthly_discount_pct: f64,
    pub weekend_markup_pct: f64,
}

impl Default for StayRules {
    fn default() -> Self {
        Self {
            min_stay: 1,
            max_stay: None,
            weekly_discount_pct: 0.0,
            monthly_discount_pct: 0.0,
            weekend_markup_pct: 0.0,
        }
    }
}

impl StayRules {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_stay < 1 {
            return Err(ValidationError::InvalidRules("min_stay must be >= 1".to_string()));
        }
        if let Some(max) = self.max_stay {
            if max < self.min_stay {
                return Err(ValidationError::InvalidRules(format!(
                    "max_stay {} is below min_stay {}",
                    max, self.min_stay
                )));
            }
        }
        for (name, pct) in [
            ("weekly_discount_pct", self.weekly_discount_pct),
            ("monthly_discount_pct", self.monthly_discount_pct),
            ("weekend_markup_pct", self.weekend_markup_pct),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(ValidationError::InvalidRules(format!(
                    "{} must be within [0, 100], got {}",
                    name, pct
                )));
            }
        }
        Ok(())
    }
}

/// A rentable property with its pricing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub owner_id: String,
    pub team_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub location: Location,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub property_type: PropertyType,
    pub capacity: u32,
    pub surface_m2: Option<f64>,
    pub amenities: BTreeSet<String>,
    /// PMS key; rows without one are not handed to adapters
    pub external_id: Option<String>,
    pub strategy: Strategy,
    pub envelope: PriceEnvelope,
    pub rules: StayRules,
    pub auto_pricing_enabled: bool,
    pub auto_pricing_updated_at: Option<DateTime<Utc>>,
    /// IANA zone name; already defaulted from the owner profile on load
    pub timezone: String,
    /// Instant of the last successful pricing run
    pub last_pricing_update: Option<DateTime<Utc>>,
}

impl Property {
    /// Parsed timezone
    pub fn tz(&self) -> Result<Tz, ValidationError> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| ValidationError::InvalidTimezone(self.timezone.clone()))
    }

    /// Reject configurations the engine cannot price
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::InvalidCapacity(self.capacity));
        }
        self.envelope.validate()?;
        self.rules.validate()?;
        self.tz()?;
        Ok(())
    }

    /// Surface bucket used for group structural checks
    pub fn surface_bucket(&self) -> Option<SurfaceBucket> {
        self.surface_m2.map(SurfaceBucket::from_m2)
    }
}

/// Surface ranges in m²: `<30, 30–50, 50–80, 80–120, 120–200, ≥200`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceBucket {
    Under30,
    From30To50,
    From50To80,
    From80To120,
    From120To200,
    Over200,
}

impl SurfaceBucket {
    pub fn from_m2(m2: f64) -> Self {
        if m2 < 30.0 {
            SurfaceBucket::Under30
        } else if m2 < 50.0 {
            SurfaceBucket::From30To50
        } else if m2 < 80.0 {
            SurfaceBucket::From50To80
        } else if m2 < 120.0 {
            SurfaceBucket::From80To120
        } else if m2 < 200.0 {
            SurfaceBucket::From120To200
        } else {
            SurfaceBucket::Over200
        }
    }
}
