use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use trellis_protocol::{
    build_config_apply_request, build_login_request, build_network_create_request,
    build_network_delete_request, build_network_list_request, build_network_update_request,
    build_stream_attach_request, decode_telemetry_frame, parse_network_records,
    parse_response_frame, rejection_details, require_session_token, ApiRequestFrame,
    ApiRequestKind, ApiResponseFrame, ApiStatus, ConfigBroadcast, TelemetryRecord,
};

use crate::channel::{ChannelEvent, ChannelName, CloseReason};
use crate::config::SessionConfig;
use crate::correlator::{CoverageCorrelator, CoverageSignal};
use crate::machine::{Completion, MachineProgress, Plan, SessionMachine, StepSpec};
use crate::manager::SessionManager;
use crate::reporter::{SessionReporter, FAILURE_RESULT, SUCCESS_RESULT};
use crate::transport::{Frame, Transport};

/// Coordinator for one session run. Owns every piece of mutable session
/// state; channel tasks only feed events into its inbox, so no handler ever
/// races another.
pub struct Session {
    config: SessionConfig,
    manager: SessionManager,
    machine: SessionMachine,
    correlator: CoverageCorrelator,
    reporter: SessionReporter,
    inbox: mpsc::UnboundedReceiver<ChannelEvent>,
    session_token: Option<String>,
    current_sent: bool,
    expect_late_ack: bool,
    expect_late_broadcast: bool,
}

impl Session {
    pub fn new(config: SessionConfig, plan: Plan, transport: Arc<dyn Transport>) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        Self {
            manager: SessionManager::new(transport, events),
            machine: SessionMachine::new(plan),
            correlator: CoverageCorrelator::new(),
            reporter: SessionReporter::new(),
            inbox,
            config,
            session_token: None,
            current_sent: false,
            expect_late_ack: false,
            expect_late_broadcast: false,
        }
    }

    /// Runs the plan to completion and returns the session result code.
    ///
    /// The whole run is bounded by `completion_timeout`; there are no
    /// per-step timers. A run that does not finish in time keeps the default
    /// failure code.
    pub async fn run(mut self) -> i32 {
        let cell = self.reporter.cell();
        let timeout = self.config.completion_timeout;
        let timed_out = tokio::time::timeout(timeout, self.drive()).await.is_err();
        if timed_out {
            if self.reporter.is_finished() {
                warn!("channel shutdown did not finish before the completion timeout");
            } else {
                warn!(
                    timeout_seconds = timeout.as_secs(),
                    "session did not complete within the timeout"
                );
            }
            self.manager.stop_all();
        }
        cell.code()
    }

    async fn drive(&mut self) {
        let channels = self.machine.plan().channels();
        self.manager.open(&self.config.endpoint, &channels);
        while let Some(event) = self.inbox.recv().await {
            if let Err(error) = self.handle_event(event) {
                error!("session step failed: {error:#}");
                self.abort();
            }
            if !self.machine.is_running() && self.manager.all_closed() {
                break;
            }
        }
    }

    fn handle_event(&mut self, event: ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Opened(name) => self.handle_opened(name),
            ChannelEvent::Message(name, frame) => self.handle_message(name, frame),
            ChannelEvent::Closed(name, reason) => self.handle_closed(name, reason),
        }
    }

    fn handle_opened(&mut self, name: ChannelName) -> Result<()> {
        self.manager.mark_open(name);
        info!(channel = %name, "channel connected");
        self.try_send_current()
    }

    /// Sends the current step's request once its channel is open. Called both
    /// on step entry and on channel connect, whichever happens last.
    fn try_send_current(&mut self) -> Result<()> {
        if self.current_sent || !self.machine.is_running() {
            return Ok(());
        }
        let Some(spec) = self.machine.current().copied() else {
            return Ok(());
        };
        let Some((channel, kind)) = spec.request else {
            return Ok(());
        };
        if !self.manager.is_open(channel) {
            return Ok(());
        }
        let request = self.build_request(kind)?;
        let text = request
            .to_text()
            .with_context(|| format!("failed to encode the '{kind}' request"))?;
        self.manager.send(channel, Frame::Text(text))?;
        self.current_sent = true;
        debug!(step = %spec.step, channel = %channel, kind = %kind, "request sent");
        Ok(())
    }

    fn build_request(&self, kind: ApiRequestKind) -> Result<ApiRequestFrame> {
        let frame = match kind {
            ApiRequestKind::Login => build_login_request(
                &self.config.credentials.username,
                &self.config.credentials.password,
            ),
            ApiRequestKind::StreamAttach => {
                let token = self
                    .session_token
                    .as_deref()
                    .context("stream attach requires the session token from login")?;
                build_stream_attach_request(token)
            }
            ApiRequestKind::NetworkCreate => build_network_create_request(
                self.config.network.network_id,
                &self.config.network.name,
            ),
            ApiRequestKind::NetworkUpdate => build_network_update_request(
                self.config.network.network_id,
                &self.config.network.renamed,
            ),
            ApiRequestKind::NetworkList => build_network_list_request(),
            ApiRequestKind::NetworkDelete => build_network_delete_request(
                self.config.network.network_id,
                self.config.network.force_delete,
            ),
            ApiRequestKind::ConfigApply => {
                build_config_apply_request(&self.config.change.to_request())
            }
        };
        Ok(frame)
    }

    fn handle_message(&mut self, name: ChannelName, frame: Frame) -> Result<()> {
        if !self.machine.is_running() {
            self.handle_drain_message(name, frame);
            return Ok(());
        }
        match name {
            ChannelName::Auth | ChannelName::Config => {
                let Frame::Text(text) = frame else {
                    bail!("unexpected binary frame on the '{name}' channel");
                };
                let response = parse_response_frame(&text)
                    .with_context(|| format!("invalid response on the '{name}' channel"))?;
                self.handle_api_response(name, response)
            }
            ChannelName::Telemetry => match frame {
                // The attach reply shares the telemetry channel with the
                // binary record stream.
                Frame::Text(text) => {
                    let response = parse_response_frame(&text)
                        .context("invalid response on the 'telemetry' channel")?;
                    self.handle_api_response(name, response)
                }
                Frame::Binary(bytes) => self.handle_telemetry_payload(&bytes),
            },
        }
    }

    fn handle_api_response(&mut self, name: ChannelName, response: ApiResponseFrame) -> Result<()> {
        if let Some(spec) = self.machine.current().copied() {
            match spec.completion {
                Completion::Reply(channel) if channel == name && self.current_sent => {
                    return self.complete_reply(spec, response);
                }
                Completion::ConfigConfirmation
                    if name == ChannelName::Config && self.current_sent =>
                {
                    return self.complete_config_ack(spec, response);
                }
                _ => {}
            }
        }
        if self.expect_late_ack
            && name == ChannelName::Config
            && response.kind == ApiRequestKind::ConfigApply
        {
            self.expect_late_ack = false;
            info!(status = ?response.status, "config ack arrived after broadcast confirmation");
            return Ok(());
        }
        bail!(
            "unexpected '{}' response on the '{name}' channel",
            response.kind
        );
    }

    fn complete_reply(&mut self, spec: StepSpec, response: ApiResponseFrame) -> Result<()> {
        let Some((_, expected)) = spec.request else {
            bail!("step '{}' awaited a reply without sending a request", spec.step);
        };
        if response.kind != expected {
            bail!(
                "step '{}' expected a '{expected}' response, got '{}'",
                spec.step,
                response.kind
            );
        }
        if response.status == ApiStatus::Rejected {
            let rejection = rejection_details(&response);
            bail!(
                "step '{}' rejected by the service: {} ({})",
                spec.step,
                rejection.message,
                rejection.code
            );
        }
        match expected {
            ApiRequestKind::Login => {
                let token = require_session_token(&response).context("login response")?;
                debug!(token_chars = token.len(), "session token stored");
                self.session_token = Some(token);
            }
            ApiRequestKind::NetworkList => {
                let records =
                    parse_network_records(&response).context("network.list response")?;
                info!(count = records.len(), "network inventory received");
                for record in &records {
                    info!(network_id = record.network_id, name = %record.name, "network listed");
                }
            }
            _ => {}
        }
        info!(step = %spec.step, "step complete");
        self.advance_machine()
    }

    /// The ack side of the confirmation race. The broadcast side lives in
    /// `handle_config_broadcast`; whichever arrives first completes the step
    /// and flags the other as an expected late twin.
    fn complete_config_ack(&mut self, spec: StepSpec, response: ApiResponseFrame) -> Result<()> {
        if response.kind != ApiRequestKind::ConfigApply {
            bail!(
                "step '{}' expected a 'config.apply' response, got '{}'",
                spec.step,
                response.kind
            );
        }
        if response.status == ApiStatus::Rejected {
            let rejection = rejection_details(&response);
            bail!(
                "config change rejected by the service: {} ({})",
                rejection.message,
                rejection.code
            );
        }
        info!(step = %spec.step, "config change acknowledged on the config channel");
        self.expect_late_broadcast = true;
        self.advance_machine()
    }

    fn handle_telemetry_payload(&mut self, bytes: &[u8]) -> Result<()> {
        let telemetry = decode_telemetry_frame(bytes).context("undecodable telemetry frame")?;
        if telemetry.skipped > 0 {
            debug!(
                skipped = telemetry.skipped,
                "telemetry records of unknown kind skipped"
            );
        }
        for record in telemetry.records {
            if self.machine.is_running() {
                self.handle_telemetry_record(record)?;
            } else {
                // A record earlier in this frame finished the plan.
                self.drain_telemetry_record(record);
            }
        }
        Ok(())
    }

    fn handle_telemetry_record(&mut self, record: TelemetryRecord) -> Result<()> {
        let Some(spec) = self.machine.current().copied() else {
            return Ok(());
        };
        let awaiting_baseline = spec.completion == Completion::BaselineCoverage;
        match record {
            TelemetryRecord::SnapshotInfo {
                network_id,
                node_total,
            } => {
                if awaiting_baseline && network_id == self.config.change.network_id {
                    if self.correlator.record_expected(u64::from(node_total))
                        == CoverageSignal::Satisfied
                    {
                        return self.complete_baseline(spec);
                    }
                } else {
                    debug!(network_id, node_total, "snapshot info outside the baseline wait");
                }
            }
            TelemetryRecord::NodePresence {
                network_id,
                node_address,
            } => {
                if awaiting_baseline && network_id == self.config.change.network_id {
                    if self.correlator.record_member() == CoverageSignal::Satisfied {
                        return self.complete_baseline(spec);
                    }
                } else {
                    debug!(network_id, node_address, "node presence outside the baseline wait");
                }
            }
            TelemetryRecord::ConfigBroadcast(broadcast) => {
                return self.handle_config_broadcast(spec, broadcast);
            }
        }
        Ok(())
    }

    fn complete_baseline(&mut self, spec: StepSpec) -> Result<()> {
        info!(
            expected = ?self.correlator.expected(),
            observed = self.correlator.observed(),
            step = %spec.step,
            "baseline coverage complete"
        );
        self.advance_machine()
    }

    /// The broadcast side of the confirmation race. Broadcasts seen before
    /// the apply step is entered, or for another network, are progress of no
    /// interest here and are dropped.
    fn handle_config_broadcast(&mut self, spec: StepSpec, broadcast: ConfigBroadcast) -> Result<()> {
        let applying = spec.completion == Completion::ConfigConfirmation && self.current_sent;
        if applying && broadcast.network_id == self.config.change.network_id {
            info!(
                sequence = broadcast.sequence,
                interval_seconds = broadcast.interval_seconds,
                payload = %broadcast.payload_hex(),
                "config broadcast observed on the telemetry channel"
            );
            info!(step = %spec.step, "config change confirmed by broadcast");
            self.expect_late_ack = true;
            return self.advance_machine();
        }
        debug!(
            network_id = broadcast.network_id,
            sequence = broadcast.sequence,
            "config broadcast outside the confirmation wait ignored"
        );
        Ok(())
    }

    fn handle_closed(&mut self, name: ChannelName, reason: CloseReason) -> Result<()> {
        let requested = self.manager.is_closing(name);
        self.manager.mark_closed(name);
        if requested || !self.machine.is_running() {
            debug!(channel = %name, reason = %reason, "channel closed during shutdown");
            return Ok(());
        }
        bail!("'{name}' channel closed unexpectedly: {reason}");
    }

    /// Messages arriving between plan completion and channel teardown. Only
    /// the late twin of a config confirmation is worth a log line; everything
    /// else is discarded.
    fn handle_drain_message(&mut self, name: ChannelName, frame: Frame) {
        match (name, frame) {
            (ChannelName::Config, Frame::Text(text)) if self.expect_late_ack => {
                match parse_response_frame(&text) {
                    Ok(response) if response.kind == ApiRequestKind::ConfigApply => {
                        self.expect_late_ack = false;
                        info!(
                            status = ?response.status,
                            "config ack arrived after broadcast confirmation"
                        );
                    }
                    _ => debug!(channel = %name, "message after session end discarded"),
                }
            }
            (ChannelName::Telemetry, Frame::Binary(bytes)) if self.expect_late_broadcast => {
                if let Ok(telemetry) = decode_telemetry_frame(&bytes) {
                    for record in telemetry.records {
                        self.drain_telemetry_record(record);
                    }
                }
            }
            (name, _) => debug!(channel = %name, "message after session end discarded"),
        }
    }

    fn drain_telemetry_record(&mut self, record: TelemetryRecord) {
        match record {
            TelemetryRecord::ConfigBroadcast(broadcast)
                if self.expect_late_broadcast
                    && broadcast.network_id == self.config.change.network_id =>
            {
                self.expect_late_broadcast = false;
                info!(
                    sequence = broadcast.sequence,
                    "config broadcast arrived after ack confirmation"
                );
            }
            _ => debug!("telemetry record after session end discarded"),
        }
    }

    fn advance_machine(&mut self) -> Result<()> {
        match self.machine.advance() {
            MachineProgress::Entered(spec) => {
                info!(step = %spec.step, "entering step");
                if spec.completion == Completion::BaselineCoverage {
                    // Only records seen during the wait count.
                    self.correlator.reset();
                }
                self.current_sent = false;
                self.try_send_current()
            }
            MachineProgress::Complete => {
                info!("session plan complete");
                self.finish(SUCCESS_RESULT);
                Ok(())
            }
        }
    }

    fn finish(&mut self, code: i32) {
        if self.reporter.finish(code) {
            self.manager.stop_all();
        }
    }

    fn abort(&mut self) {
        self.machine.fail();
        self.finish(FAILURE_RESULT);
    }
}
