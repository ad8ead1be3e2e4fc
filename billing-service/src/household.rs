//! Household layout: which meters exist, in which order, and how the shared
//! water cost is split between families.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::Path,
};

use billing_client::domain::{check_member_count, FamilyConfig, FamilyConfigError, MeterId, MeterReading, MeterRole, MAX_MEMBERS};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HouseholdError {
    #[error("duplicate meter id '{0}'")]
    DuplicateMeter(MeterId),
    #[error("more than one water source meter ('{0}' and '{1}')")]
    MultipleWaterSources(MeterId, MeterId),
    #[error("family meter '{0}' must have at least one member")]
    NoMembers(MeterId),
    #[error("family meter '{0}' has {1} members, more than the allowed maximum")]
    TooManyMembers(MeterId, u32),
    #[error("household has no meters")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSpec {
    pub id: MeterId,
    pub name: String,
    pub role: MeterRole,
    /// Family member count; ignored for non-family meters.
    #[serde(default)]
    pub members: Option<u32>,
    /// Extra tenant names that identify this meter in ledger rows.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl MeterSpec {
    pub fn new(id: &str, name: &str, role: MeterRole) -> Self {
        Self {
            id: MeterId::new(id),
            name: name.to_string(),
            role,
            members: None,
            aliases: Vec::new(),
        }
    }

    fn family(id: &str, name: &str, members: u32) -> Self {
        Self {
            members: Some(members),
            aliases: vec![name.to_string()],
            ..Self::new(id, name, MeterRole::FamilyMember)
        }
    }

    fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .filter(|l| !l.is_empty())
    }

    fn is_tenant(&self, tenant_name: &str) -> bool {
        self.labels().any(|l| l == tenant_name.trim())
    }

    fn appears_in(&self, tenant_name: &str) -> bool {
        self.labels().any(|l| tenant_name.contains(l))
    }
}

/// Ordered list of meters. The order is the enumeration order of every
/// billing run and of the records it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Household {
    meters: Vec<MeterSpec>,
}

impl Household {
    pub fn new(meters: Vec<MeterSpec>) -> Result<Self, HouseholdError> {
        if meters.is_empty() {
            return Err(HouseholdError::Empty);
        }
        let mut seen = HashSet::new();
        let mut water: Option<&MeterId> = None;
        for m in &meters {
            if !seen.insert(&m.id) {
                return Err(HouseholdError::DuplicateMeter(m.id.clone()));
            }
            match m.role {
                MeterRole::WaterSource => {
                    if let Some(first) = water {
                        return Err(HouseholdError::MultipleWaterSources(
                            first.clone(),
                            m.id.clone(),
                        ));
                    }
                    water = Some(&m.id);
                }
                MeterRole::FamilyMember => {
                    match check_member_count(&m.id, m.members.unwrap_or(0)) {
                        Ok(()) => {}
                        Err(FamilyConfigError::NoMembers(id)) => return Err(HouseholdError::NoMembers(id)),
                        Err(FamilyConfigError::TooManyMembers(id, n)) => {
                            return Err(HouseholdError::TooManyMembers(id, n))
                        }
                    }
                }
                MeterRole::Independent => {}
            }
        }
        Ok(Self { meters })
    }

    /// Shop, four families (4/4/2/1 members), main line and water pump.
    pub fn default_layout() -> Self {
        Self {
            meters: vec![
                MeterSpec::new("shop", "Shop", MeterRole::Independent),
                MeterSpec::family("family1", "Family 1", 4),
                MeterSpec::family("family2", "Family 2", 4),
                MeterSpec::family("family3", "Family 3", 2),
                MeterSpec::family("family4", "Family 4", 1),
                MeterSpec::new("main_meter", "Main Meter", MeterRole::Independent),
                MeterSpec::new("water_motor", "Water Motor", MeterRole::WaterSource),
            ],
        }
    }

    pub fn meters(&self) -> &[MeterSpec] {
        &self.meters
    }

    pub fn meter(&self, id: &MeterId) -> Option<&MeterSpec> {
        self.meters.iter().find(|m| &m.id == id)
    }

    /// Family configs in enumeration order.
    pub fn families(&self) -> Vec<FamilyConfig> {
        self.meters
            .iter()
            .filter(|m| m.role == MeterRole::FamilyMember)
            .filter_map(|m| FamilyConfig::new(m.id.clone(), m.name.clone(), m.members?).ok())
            .collect()
    }

    /// Meter whose name or alias equals `tenant_name`. Failing that, the
    /// first meter (in enumeration order) whose name or alias appears in it.
    pub fn match_tenant(&self, tenant_name: &str) -> Option<&MeterId> {
        self.meters
            .iter()
            .find(|m| m.is_tenant(tenant_name))
            .or_else(|| self.meters.iter().find(|m| m.appears_in(tenant_name)))
            .map(|m| &m.id)
    }

    /// Build this run's readings from the known previous readings and the
    /// current readings entered for the meters that were read.
    pub fn readings(
        &self,
        previous: &BTreeMap<MeterId, f64>,
        current: &BTreeMap<MeterId, f64>,
    ) -> Vec<MeterReading> {
        self.meters
            .iter()
            .map(|m| {
                MeterReading::new(
                    m.id.clone(),
                    m.name.clone(),
                    m.role,
                    previous.get(&m.id).copied().unwrap_or(0.0),
                    current.get(&m.id).copied(),
                )
            })
            .collect()
    }

    /// Rename a family or change its member count. Blank names and member
    /// counts outside `1..=MAX_MEMBERS` are ignored. Returns whether anything
    /// changed.
    pub fn update_family(&mut self, id: &MeterId, name: Option<&str>, members: Option<u32>) -> bool {
        let Some(meter) = self
            .meters
            .iter_mut()
            .find(|m| &m.id == id && m.role == MeterRole::FamilyMember)
        else {
            return false;
        };
        let mut changed = false;
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            if meter.name != name {
                meter.name = name.to_string();
                changed = true;
            }
        }
        if let Some(members) = members.filter(|m| (1..=MAX_MEMBERS).contains(m)) {
            if meter.members != Some(members) {
                meter.members = Some(members);
                changed = true;
            }
        }
        changed
    }

    pub fn apply_family_settings(&mut self, settings: &FamilySettings) {
        for (id, setting) in &settings.families {
            self.update_family(id, Some(&setting.name), Some(setting.members));
        }
    }

    pub fn family_settings(&self) -> FamilySettings {
        FamilySettings {
            families: self
                .meters
                .iter()
                .filter(|m| m.role == MeterRole::FamilyMember)
                .map(|m| {
                    (
                        m.id.clone(),
                        FamilySetting {
                            name: m.name.clone(),
                            members: m.members.unwrap_or(1),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySetting {
    pub name: String,
    pub members: u32,
}

/// Family names and member counts, persisted between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySettings {
    #[serde(flatten)]
    pub families: BTreeMap<MeterId, FamilySetting>,
}

impl FamilySettings {
    /// Missing or unreadable files yield empty settings.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "ignoring malformed family settings");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, json)
    }
}

/// Latest known readings per meter plus the most recent cost per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousReadings {
    pub readings: BTreeMap<MeterId, f64>,
    pub cost_per_unit: f64,
    /// Set when the ledger could not be read and defaults were used.
    #[serde(default)]
    pub degraded: bool,
}

impl PreviousReadings {
    pub fn zeroed(household: &Household, cost_per_unit: f64) -> Self {
        Self {
            readings: household.meters().iter().map(|m| (m.id.clone(), 0.0)).collect(),
            cost_per_unit,
            degraded: false,
        }
    }

    pub fn get(&self, id: &MeterId) -> f64 {
        self.readings.get(id).copied().unwrap_or(0.0)
    }

    /// Carry a completed run's readings forward.
    pub fn advance(&mut self, next: &[MeterReading]) {
        for r in next {
            self.readings.insert(r.meter_id.clone(), r.previous_reading);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_orders_families_and_counts_members() {
        let h = Household::default_layout();
        let families = h.families();
        let members: Vec<u32> = families.iter().map(|f| f.member_count).collect();
        assert_eq!(members, vec![4, 4, 2, 1]);
        assert_eq!(
            h.meter(&MeterId::new("water_motor")).map(|m| m.role),
            Some(MeterRole::WaterSource)
        );
    }

    #[test]
    fn two_water_sources_are_rejected() {
        let err = Household::new(vec![
            MeterSpec::new("a", "A", MeterRole::WaterSource),
            MeterSpec::new("b", "B", MeterRole::WaterSource),
        ])
        .unwrap_err();
        assert!(matches!(err, HouseholdError::MultipleWaterSources(_, _)));
    }

    #[test]
    fn family_without_members_is_rejected() {
        let err = Household::new(vec![MeterSpec::new("f", "F", MeterRole::FamilyMember)]).unwrap_err();
        assert_eq!(err, HouseholdError::NoMembers(MeterId::new("f")));
    }

    #[test]
    fn family_with_too_many_members_is_rejected() {
        let mut spec = MeterSpec::new("f", "F", MeterRole::FamilyMember);
        spec.members = Some(u32::MAX);
        let err = Household::new(vec![spec]).unwrap_err();
        assert_eq!(err, HouseholdError::TooManyMembers(MeterId::new("f"), u32::MAX));
    }

    #[test]
    fn renamed_family_containing_shop_keeps_its_own_rows() {
        let mut h = Household::default_layout();
        h.update_family(&MeterId::new("family1"), Some("Shop Owner"), None);
        assert_eq!(h.match_tenant("Shop Owner").map(MeterId::as_str), Some("family1"));
        assert_eq!(h.match_tenant("Shop").map(MeterId::as_str), Some("shop"));
        // Loose match still applies when nothing matches exactly.
        assert_eq!(h.match_tenant("Shop (ground floor)").map(MeterId::as_str), Some("shop"));
    }

    #[test]
    fn tenant_matching_uses_name_and_alias() {
        let mut h = Household::default_layout();
        h.update_family(&MeterId::new("family2"), Some("Upstairs"), None);
        assert_eq!(h.match_tenant("Upstairs").map(MeterId::as_str), Some("family2"));
        assert_eq!(h.match_tenant("Family 2").map(MeterId::as_str), Some("family2"));
        assert_eq!(h.match_tenant("Water Motor").map(MeterId::as_str), Some("water_motor"));
        assert_eq!(h.match_tenant("Somebody else"), None);
    }

    #[test]
    fn invalid_family_updates_are_ignored() {
        let mut h = Household::default_layout();
        let id = MeterId::new("family1");
        assert!(!h.update_family(&id, Some("   "), Some(0)));
        assert!(!h.update_family(&MeterId::new("shop"), Some("Store"), None));
        assert!(!h.update_family(&id, None, Some(MAX_MEMBERS + 1)));
        assert!(h.update_family(&id, None, Some(6)));
        assert_eq!(h.meter(&id).and_then(|m| m.members), Some(6));
    }

    #[test]
    fn family_settings_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings").join("families.json");

        let mut h = Household::default_layout();
        h.update_family(&MeterId::new("family3"), Some("Ground Floor"), Some(3));
        h.family_settings().save(&path).unwrap();

        let mut fresh = Household::default_layout();
        fresh.apply_family_settings(&FamilySettings::load(&path));
        assert_eq!(fresh, h);
    }

    #[test]
    fn missing_settings_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FamilySettings::load(&dir.path().join("nope.json")), FamilySettings::default());
    }

    #[test]
    fn readings_follow_layout_order() {
        let h = Household::default_layout();
        let previous = BTreeMap::from([(MeterId::new("shop"), 100.0)]);
        let current = BTreeMap::from([(MeterId::new("shop"), 150.0)]);
        let readings = h.readings(&previous, &current);
        assert_eq!(readings.len(), 7);
        assert_eq!(readings[0].units(), Some(50.0));
        assert_eq!(readings[1].previous_reading, 0.0);
        assert!(!readings[1].is_read());
    }
}
