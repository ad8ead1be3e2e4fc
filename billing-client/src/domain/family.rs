use serde::{Deserialize, Serialize};

use super::meter::MeterId;

/// Largest member count a single family may declare.
pub const MAX_MEMBERS: u32 = 1_000;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FamilyConfigError {
    #[error("family '{0}' must have at least one member")]
    NoMembers(MeterId),
    #[error("family '{0}' has {1} members, more than the allowed maximum")]
    TooManyMembers(MeterId, u32),
}

/// Member count used to split the shared water cost for one family meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub meter_id: MeterId,
    pub display_name: String,
    pub member_count: u32,
}

impl FamilyConfig {
    pub fn new(
        meter_id: impl Into<MeterId>,
        display_name: impl Into<String>,
        member_count: u32,
    ) -> Result<Self, FamilyConfigError> {
        let config = Self {
            meter_id: meter_id.into(),
            display_name: display_name.into(),
            member_count,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the member count of a config that did not come through `new`,
    /// e.g. one deserialized from a request body.
    pub fn validate(&self) -> Result<(), FamilyConfigError> {
        check_member_count(&self.meter_id, self.member_count)
    }
}

pub fn check_member_count(meter_id: &MeterId, member_count: u32) -> Result<(), FamilyConfigError> {
    if member_count < 1 {
        return Err(FamilyConfigError::NoMembers(meter_id.clone()));
    }
    if member_count > MAX_MEMBERS {
        return Err(FamilyConfigError::TooManyMembers(meter_id.clone(), member_count));
    }
    Ok(())
}
