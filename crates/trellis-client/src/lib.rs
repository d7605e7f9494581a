//! Session engine for the trellis management service.
//!
//! A session drives one validated plan over three websocket channels (auth,
//! config, telemetry). Channel tasks feed a single ordered inbox; the
//! `Session` coordinator owns all mutable state and walks the plan's steps
//! strictly forward, reporting one result code per run.

pub mod channel;
pub mod config;
pub mod correlator;
pub mod machine;
pub mod manager;
pub mod reporter;
pub mod session;
pub mod transport;

pub use channel::{ChannelEvent, ChannelName, CloseReason};
pub use config::{
    ConfigChange, Credentials, NetworkProfile, SessionConfig, SinkSelection,
    DEFAULT_COMPLETION_TIMEOUT,
};
pub use correlator::{CoverageCorrelator, CoverageSignal};
pub use machine::{
    Completion, MachineProgress, Plan, PlanError, SessionMachine, SessionStep, StepSpec,
};
pub use manager::SessionManager;
pub use reporter::{ResultCell, SessionReporter, FAILURE_RESULT, SUCCESS_RESULT};
pub use session::Session;
pub use transport::{Connection, Frame, Transport, TransportError, WsTransport};
