use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeterId(String);

impl MeterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MeterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a meter takes part in a billing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeterRole {
    /// Billed on its own consumption only (shop, main line).
    Independent,
    /// Shared pump whose cost is split across families by member count.
    WaterSource,
    /// Billed on its own consumption plus a share of the water source.
    FamilyMember,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub meter_id: MeterId,
    pub display_name: String,
    pub previous_reading: f64,
    pub current_reading: Option<f64>,
    pub role: MeterRole,
}

impl MeterReading {
    pub fn new(
        meter_id: impl Into<MeterId>,
        display_name: impl Into<String>,
        role: MeterRole,
        previous_reading: f64,
        current_reading: Option<f64>,
    ) -> Self {
        Self {
            meter_id: meter_id.into(),
            display_name: display_name.into(),
            previous_reading,
            current_reading,
            role,
        }
    }

    /// Consumption since the previous reading; `None` when not read this run.
    pub fn units(&self) -> Option<f64> {
        self.current_reading.map(|cur| cur - self.previous_reading)
    }

    pub fn is_read(&self) -> bool {
        self.current_reading.is_some()
    }

    /// The reading carried into the next run.
    pub fn advanced(&self) -> Self {
        Self {
            previous_reading: self.current_reading.unwrap_or(self.previous_reading),
            current_reading: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_moves_current_into_previous() {
        let r = MeterReading::new("shop", "Shop", MeterRole::Independent, 100.0, Some(150.0));
        let next = r.advanced();
        assert_eq!(next.previous_reading, 150.0);
        assert_eq!(next.current_reading, None);
    }

    #[test]
    fn advanced_keeps_previous_when_unread() {
        let r = MeterReading::new("family1", "Family 1", MeterRole::FamilyMember, 42.0, None);
        assert_eq!(r.advanced().previous_reading, 42.0);
        assert_eq!(r.units(), None);
    }

    #[test]
    fn role_serializes_kebab_case() {
        let json = serde_json::to_string(&MeterRole::WaterSource).unwrap();
        assert_eq!(json, "\"water-source\"");
    }
}
