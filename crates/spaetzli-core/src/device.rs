use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::{DeviceId, UserId};

/// A registered premium device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub device_identifier: DeviceId,
    pub device_name: String,
    pub platform: String,
    pub user: UserId,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub last_seen_at: DateTime<Utc>,
}

impl Device {
    pub fn new(
        device_identifier: DeviceId,
        device_name: impl Into<String>,
        platform: impl Into<String>,
        user: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            device_identifier,
            device_name: device_name.into(),
            platform: platform.into(),
            user,
            created_at: now,
            last_seen_at: now,
        }
    }
}
