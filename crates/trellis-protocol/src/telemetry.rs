use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::hex::encode_hex;

/// Record header layout: kind (u8) followed by body length (u16, network order).
pub const TELEMETRY_RECORD_HEADER_SIZE: usize = 3;

pub const TELEMETRY_KIND_SNAPSHOT_INFO: u8 = 0x01;
pub const TELEMETRY_KIND_NODE_PRESENCE: u8 = 0x02;
pub const TELEMETRY_KIND_CONFIG_BROADCAST: u8 = 0x03;

const SNAPSHOT_INFO_BODY_SIZE: usize = 8;
const NODE_PRESENCE_BODY_SIZE: usize = 8;
const CONFIG_BROADCAST_MIN_BODY_SIZE: usize = 14;

const BROADCAST_FLAG_OVERRIDE: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `TelemetryError` values.
pub enum TelemetryError {
    #[error("telemetry record truncated: need {required} bytes but {available} remain")]
    Truncated { required: usize, available: usize },
    #[error("invalid telemetry record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `BroadcastSelection` values.
pub enum BroadcastSelection {
    WholeNetwork,
    SinkList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Configuration broadcast observed on the telemetry channel after a change
/// reaches the network.
pub struct ConfigBroadcast {
    pub network_id: u32,
    pub sink_address: u32,
    pub sequence: u16,
    pub interval_seconds: u16,
    pub override_existing: bool,
    pub selection: BroadcastSelection,
    pub payload: Vec<u8>,
}

impl ConfigBroadcast {
    pub fn payload_hex(&self) -> String {
        encode_hex(&self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `TelemetryRecord` values.
pub enum TelemetryRecord {
    /// Universe size announcement. Totals may be re-announced; the latest wins.
    SnapshotInfo { network_id: u32, node_total: u32 },
    /// One member of the announced universe has been loaded.
    NodePresence { network_id: u32, node_address: u32 },
    ConfigBroadcast(ConfigBroadcast),
}

impl TelemetryRecord {
    fn kind(&self) -> u8 {
        match self {
            Self::SnapshotInfo { .. } => TELEMETRY_KIND_SNAPSHOT_INFO,
            Self::NodePresence { .. } => TELEMETRY_KIND_NODE_PRESENCE,
            Self::ConfigBroadcast(_) => TELEMETRY_KIND_CONFIG_BROADCAST,
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Self::SnapshotInfo {
                network_id,
                node_total,
            } => {
                body.put_u32(*network_id);
                body.put_u32(*node_total);
            }
            Self::NodePresence {
                network_id,
                node_address,
            } => {
                body.put_u32(*network_id);
                body.put_u32(*node_address);
            }
            Self::ConfigBroadcast(broadcast) => {
                body.put_u32(broadcast.network_id);
                body.put_u32(broadcast.sink_address);
                body.put_u16(broadcast.sequence);
                body.put_u16(broadcast.interval_seconds);
                body.put_u8(if broadcast.override_existing {
                    BROADCAST_FLAG_OVERRIDE
                } else {
                    0
                });
                body.put_u8(match broadcast.selection {
                    BroadcastSelection::WholeNetwork => 0,
                    BroadcastSelection::SinkList => 1,
                });
                body.put_slice(&broadcast.payload);
            }
        }
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decoded telemetry message: in-order records plus a count of skipped
/// unknown-kind records.
pub struct TelemetryFrame {
    pub records: Vec<TelemetryRecord>,
    pub skipped: usize,
}

pub fn decode_telemetry_frame(input: &[u8]) -> Result<TelemetryFrame, TelemetryError> {
    let mut buf = input;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    while buf.remaining() > 0 {
        if buf.remaining() < TELEMETRY_RECORD_HEADER_SIZE {
            return Err(TelemetryError::Truncated {
                required: TELEMETRY_RECORD_HEADER_SIZE,
                available: buf.remaining(),
            });
        }
        let kind = buf.get_u8();
        let length = buf.get_u16() as usize;
        if buf.remaining() < length {
            return Err(TelemetryError::Truncated {
                required: length,
                available: buf.remaining(),
            });
        }
        let mut body = buf.copy_to_bytes(length);
        match kind {
            TELEMETRY_KIND_SNAPSHOT_INFO => records.push(decode_snapshot_info(&mut body)?),
            TELEMETRY_KIND_NODE_PRESENCE => records.push(decode_node_presence(&mut body)?),
            TELEMETRY_KIND_CONFIG_BROADCAST => records.push(decode_config_broadcast(&mut body)?),
            _ => skipped = skipped.saturating_add(1),
        }
    }

    Ok(TelemetryFrame { records, skipped })
}

pub fn encode_telemetry_frame(records: &[TelemetryRecord]) -> Result<Vec<u8>, TelemetryError> {
    let mut frame = Vec::new();
    for record in records {
        let body = record.encode_body();
        if body.len() > u16::MAX as usize {
            return Err(TelemetryError::InvalidRecord(format!(
                "record body of {} bytes exceeds the length field",
                body.len()
            )));
        }
        frame.put_u8(record.kind());
        frame.put_u16(body.len() as u16);
        frame.put_slice(&body);
    }
    Ok(frame)
}

fn decode_snapshot_info(body: &mut Bytes) -> Result<TelemetryRecord, TelemetryError> {
    if body.remaining() < SNAPSHOT_INFO_BODY_SIZE {
        return Err(TelemetryError::Truncated {
            required: SNAPSHOT_INFO_BODY_SIZE,
            available: body.remaining(),
        });
    }
    Ok(TelemetryRecord::SnapshotInfo {
        network_id: body.get_u32(),
        node_total: body.get_u32(),
    })
}

fn decode_node_presence(body: &mut Bytes) -> Result<TelemetryRecord, TelemetryError> {
    if body.remaining() < NODE_PRESENCE_BODY_SIZE {
        return Err(TelemetryError::Truncated {
            required: NODE_PRESENCE_BODY_SIZE,
            available: body.remaining(),
        });
    }
    Ok(TelemetryRecord::NodePresence {
        network_id: body.get_u32(),
        node_address: body.get_u32(),
    })
}

fn decode_config_broadcast(body: &mut Bytes) -> Result<TelemetryRecord, TelemetryError> {
    if body.remaining() < CONFIG_BROADCAST_MIN_BODY_SIZE {
        return Err(TelemetryError::Truncated {
            required: CONFIG_BROADCAST_MIN_BODY_SIZE,
            available: body.remaining(),
        });
    }
    let network_id = body.get_u32();
    let sink_address = body.get_u32();
    let sequence = body.get_u16();
    let interval_seconds = body.get_u16();
    let flags = body.get_u8();
    let selection = match body.get_u8() {
        0 => BroadcastSelection::WholeNetwork,
        1 => BroadcastSelection::SinkList,
        other => {
            return Err(TelemetryError::InvalidRecord(format!(
                "unknown broadcast selection {other}"
            )))
        }
    };
    let payload = body.copy_to_bytes(body.remaining()).to_vec();

    Ok(TelemetryRecord::ConfigBroadcast(ConfigBroadcast {
        network_id,
        sink_address,
        sequence,
        interval_seconds,
        override_existing: flags & BROADCAST_FLAG_OVERRIDE != 0,
        selection,
        payload,
    }))
}
