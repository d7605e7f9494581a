//! Wire codec for the trellis management service: versioned JSON frames on the
//! request channels and self-delimited binary records on the telemetry channel.

mod api;
mod hex;
mod telemetry;

pub use api::{
    build_config_apply_request, build_login_request, build_network_create_request,
    build_network_delete_request, build_network_list_request, build_network_update_request,
    build_stream_attach_request, parse_network_records, parse_response_frame, rejection_details,
    require_session_token, ApiError, ApiRejection, ApiRequestFrame, ApiRequestKind,
    ApiResponseFrame, ApiStatus, ConfigChangeRequest, NetworkRecord, API_SCHEMA_VERSION,
};
pub use hex::{decode_hex, encode_hex, HexError};
pub use telemetry::{
    decode_telemetry_frame, encode_telemetry_frame, BroadcastSelection, ConfigBroadcast,
    TelemetryError, TelemetryFrame, TelemetryRecord, TELEMETRY_KIND_CONFIG_BROADCAST,
    TELEMETRY_KIND_NODE_PRESENCE, TELEMETRY_KIND_SNAPSHOT_INFO,
};
