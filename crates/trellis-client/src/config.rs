use std::time::Duration;

use trellis_protocol::ConfigChangeRequest;

/// Upper bound for a whole session run unless overridden by the caller.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
/// Account used on the authentication channel.
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
/// Network entity targeted by the maintenance plan.
pub struct NetworkProfile {
    pub network_id: u32,
    pub name: String,
    pub renamed: String,
    pub force_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `SinkSelection` values.
pub enum SinkSelection {
    AllSinks,
    Sinks(Vec<u32>),
}

impl SinkSelection {
    pub fn to_request(&self) -> Option<Vec<u32>> {
        match self {
            Self::AllSinks => None,
            Self::Sinks(addresses) => Some(addresses.clone()),
        }
    }
}

#[derive(Debug, Clone)]
/// Configuration change applied and confirmed by the rollout plan.
pub struct ConfigChange {
    pub network_id: u32,
    pub interval_seconds: u16,
    pub payload: Vec<u8>,
    pub override_existing: bool,
    pub sinks: SinkSelection,
}

impl ConfigChange {
    pub fn to_request(&self) -> ConfigChangeRequest {
        ConfigChangeRequest {
            network_id: self.network_id,
            interval_seconds: self.interval_seconds,
            payload: self.payload.clone(),
            override_existing: self.override_existing,
            sinks: self.sinks.to_request(),
        }
    }
}

#[derive(Clone)]
/// Immutable inputs for one session run. Built once by the caller; the only
/// session state learned later is the token returned by login.
pub struct SessionConfig {
    pub endpoint: String,
    pub credentials: Credentials,
    pub network: NetworkProfile,
    pub change: ConfigChange,
    pub completion_timeout: Duration,
}
