use clap::{ArgAction, Parser, ValueEnum};

use trellis_client::Plan;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u16(value: &str) -> Result<u16, String> {
    let parsed = value
        .parse::<u16>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Enumerates supported `CliSessionFlow` values.
pub enum CliSessionFlow {
    Maintenance,
    Rollout,
}

impl CliSessionFlow {
    pub fn plan(&self) -> Plan {
        match self {
            Self::Maintenance => Plan::network_maintenance(),
            Self::Rollout => Plan::config_rollout(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "trellis",
    about = "Session driver for the trellis management service",
    version
)]
/// Public struct `Cli` used across trellis components.
pub struct Cli {
    #[arg(
        long,
        env = "TRELLIS_ENDPOINT",
        default_value = "ws://127.0.0.1:8520",
        help = "Websocket endpoint of the management service; channel paths are appended"
    )]
    pub endpoint: String,

    #[arg(
        long,
        env = "TRELLIS_USERNAME",
        default_value = "operator",
        help = "Account name sent on the auth channel"
    )]
    pub username: String,

    #[arg(
        long,
        env = "TRELLIS_PASSWORD",
        hide_env_values = true,
        help = "Account password sent on the auth channel"
    )]
    pub password: String,

    #[arg(
        long,
        env = "TRELLIS_FLOW",
        value_enum,
        default_value = "rollout",
        help = "Session plan to run: network maintenance or config rollout"
    )]
    pub flow: CliSessionFlow,

    #[arg(
        long = "network-id",
        env = "TRELLIS_NETWORK_ID",
        default_value_t = 777_555,
        help = "Network targeted by both plans"
    )]
    pub network_id: u32,

    #[arg(
        long = "network-name",
        env = "TRELLIS_NETWORK_NAME",
        default_value = "trellis-network",
        help = "Name used when the maintenance plan creates the network"
    )]
    pub network_name: String,

    #[arg(
        long = "network-rename",
        env = "TRELLIS_NETWORK_RENAME",
        default_value = "trellis-network-renamed",
        help = "Name applied by the maintenance plan's update step"
    )]
    pub network_rename: String,

    #[arg(
        long = "force-delete",
        env = "TRELLIS_FORCE_DELETE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Delete the network even when the service reports it still in use"
    )]
    pub force_delete: bool,

    #[arg(
        long = "interval-seconds",
        env = "TRELLIS_INTERVAL_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u16,
        help = "Reporting interval carried by the config change"
    )]
    pub interval_seconds: u16,

    #[arg(
        long = "config-data",
        env = "TRELLIS_CONFIG_DATA",
        default_value = "00112233445566778899aabbccddeeff",
        help = "Hex-encoded opaque payload carried by the config change"
    )]
    pub config_data: String,

    #[arg(
        long = "override",
        env = "TRELLIS_OVERRIDE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Replace any configuration already present on the targets"
    )]
    pub override_existing: bool,

    #[arg(
        long = "sink",
        env = "TRELLIS_SINKS",
        value_delimiter = ',',
        help = "Sink addresses targeted by the config change; omit to address the whole network"
    )]
    pub sink: Vec<u32>,

    #[arg(
        long = "completion-timeout-seconds",
        env = "TRELLIS_COMPLETION_TIMEOUT_SECONDS",
        default_value_t = 10,
        value_parser = parse_positive_u64,
        help = "Upper bound for the whole session run, connect to close"
    )]
    pub completion_timeout_seconds: u64,
}
