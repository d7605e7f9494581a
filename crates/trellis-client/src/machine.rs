use std::fmt;

use thiserror::Error;
use tracing::debug;

use trellis_protocol::ApiRequestKind;

use crate::channel::ChannelName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `SessionStep` values.
pub enum SessionStep {
    Login,
    TelemetryAttach,
    AwaitBaseline,
    ApplyConfig,
    CreateNetwork,
    UpdateNetwork,
    ListNetworks,
    DeleteNetwork,
}

impl SessionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::TelemetryAttach => "telemetry-attach",
            Self::AwaitBaseline => "await-baseline",
            Self::ApplyConfig => "apply-config",
            Self::CreateNetwork => "create-network",
            Self::UpdateNetwork => "update-network",
            Self::ListNetworks => "list-networks",
            Self::DeleteNetwork => "delete-network",
        }
    }
}

impl fmt::Display for SessionStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a step finishes.
pub enum Completion {
    /// A single success/failure response arrives on the named channel.
    Reply(ChannelName),
    /// The telemetry coverage correlator reports the baseline complete.
    BaselineCoverage,
    /// First of: an ack on the config channel, or a matching broadcast on
    /// the telemetry channel.
    ConfigConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One row of the session transition table: the step, the request it issues
/// on entry (channel and kind), and the condition that completes it.
pub struct StepSpec {
    pub step: SessionStep,
    pub request: Option<(ChannelName, ApiRequestKind)>,
    pub completion: Completion,
}

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `PlanError` values.
pub enum PlanError {
    #[error("plan must contain at least one step")]
    Empty,
    #[error("plan step '{0}' appears more than once")]
    DuplicateStep(&'static str),
    #[error("plan must start with a step that issues a request")]
    WaitFirst,
    #[error("step '{0}' attaches the stream before any login step")]
    AttachBeforeLogin(&'static str),
    #[error("step '{0}' must send on the channel its reply arrives on")]
    ReplyChannelMismatch(&'static str),
    #[error("step '{0}' must not issue a request")]
    UnexpectedRequest(&'static str),
    #[error("step '{0}' requires a config.apply request on the config channel")]
    MissingConfigRequest(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ordered, validated sequence of steps for one session.
pub struct Plan {
    steps: Vec<StepSpec>,
}

impl Plan {
    pub fn new(steps: Vec<StepSpec>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        for (index, spec) in steps.iter().enumerate() {
            if steps[..index].iter().any(|seen| seen.step == spec.step) {
                return Err(PlanError::DuplicateStep(spec.step.as_str()));
            }
            match spec.completion {
                Completion::Reply(channel) => match spec.request {
                    Some((request_channel, _)) if request_channel == channel => {}
                    _ => return Err(PlanError::ReplyChannelMismatch(spec.step.as_str())),
                },
                Completion::BaselineCoverage => {
                    if spec.request.is_some() {
                        return Err(PlanError::UnexpectedRequest(spec.step.as_str()));
                    }
                }
                Completion::ConfigConfirmation => match spec.request {
                    Some((ChannelName::Config, ApiRequestKind::ConfigApply)) => {}
                    _ => return Err(PlanError::MissingConfigRequest(spec.step.as_str())),
                },
            }
            if let Some((_, ApiRequestKind::StreamAttach)) = spec.request {
                let logged_in = steps[..index]
                    .iter()
                    .any(|seen| matches!(seen.request, Some((_, ApiRequestKind::Login))));
                if !logged_in {
                    return Err(PlanError::AttachBeforeLogin(spec.step.as_str()));
                }
            }
        }
        if steps[0].request.is_none() {
            return Err(PlanError::WaitFirst);
        }
        Ok(Self { steps })
    }

    /// Login, then create / rename / list / delete the target network over
    /// the config channel.
    pub fn network_maintenance() -> Self {
        Self {
            steps: vec![
                StepSpec {
                    step: SessionStep::Login,
                    request: Some((ChannelName::Auth, ApiRequestKind::Login)),
                    completion: Completion::Reply(ChannelName::Auth),
                },
                StepSpec {
                    step: SessionStep::CreateNetwork,
                    request: Some((ChannelName::Config, ApiRequestKind::NetworkCreate)),
                    completion: Completion::Reply(ChannelName::Config),
                },
                StepSpec {
                    step: SessionStep::UpdateNetwork,
                    request: Some((ChannelName::Config, ApiRequestKind::NetworkUpdate)),
                    completion: Completion::Reply(ChannelName::Config),
                },
                StepSpec {
                    step: SessionStep::ListNetworks,
                    request: Some((ChannelName::Config, ApiRequestKind::NetworkList)),
                    completion: Completion::Reply(ChannelName::Config),
                },
                StepSpec {
                    step: SessionStep::DeleteNetwork,
                    request: Some((ChannelName::Config, ApiRequestKind::NetworkDelete)),
                    completion: Completion::Reply(ChannelName::Config),
                },
            ],
        }
    }

    /// Login, attach the telemetry stream, wait for baseline coverage, then
    /// apply the configuration change and await its confirmation.
    pub fn config_rollout() -> Self {
        Self {
            steps: vec![
                StepSpec {
                    step: SessionStep::Login,
                    request: Some((ChannelName::Auth, ApiRequestKind::Login)),
                    completion: Completion::Reply(ChannelName::Auth),
                },
                StepSpec {
                    step: SessionStep::TelemetryAttach,
                    request: Some((ChannelName::Telemetry, ApiRequestKind::StreamAttach)),
                    completion: Completion::Reply(ChannelName::Telemetry),
                },
                StepSpec {
                    step: SessionStep::AwaitBaseline,
                    request: None,
                    completion: Completion::BaselineCoverage,
                },
                StepSpec {
                    step: SessionStep::ApplyConfig,
                    request: Some((ChannelName::Config, ApiRequestKind::ConfigApply)),
                    completion: Completion::ConfigConfirmation,
                },
            ],
        }
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Channels the plan touches, in first-use order, without duplicates.
    pub fn channels(&self) -> Vec<ChannelName> {
        let mut channels = Vec::new();
        let mut push = |channel: ChannelName, channels: &mut Vec<ChannelName>| {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        };
        for spec in &self.steps {
            if let Some((channel, _)) = spec.request {
                push(channel, &mut channels);
            }
            match spec.completion {
                Completion::Reply(channel) => push(channel, &mut channels),
                Completion::BaselineCoverage => push(ChannelName::Telemetry, &mut channels),
                Completion::ConfigConfirmation => {
                    push(ChannelName::Config, &mut channels);
                    push(ChannelName::Telemetry, &mut channels);
                }
            }
        }
        channels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Running(usize),
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `MachineProgress` values.
pub enum MachineProgress {
    Entered(StepSpec),
    Complete,
}

/// Cursor over a validated plan. Transitions are strictly forward; a step is
/// never revisited and failure is terminal.
#[derive(Debug)]
pub struct SessionMachine {
    plan: Plan,
    cursor: Cursor,
}

impl SessionMachine {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            cursor: Cursor::Running(0),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn current(&self) -> Option<&StepSpec> {
        match self.cursor {
            Cursor::Running(index) => self.plan.steps.get(index),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.cursor, Cursor::Running(_))
    }

    pub fn succeeded(&self) -> bool {
        self.cursor == Cursor::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.cursor == Cursor::Failed
    }

    /// Moves to the next step, or to the succeeded terminal state when the
    /// current step was the last one.
    pub fn advance(&mut self) -> MachineProgress {
        let Cursor::Running(index) = self.cursor else {
            debug!("advance requested on a finished machine");
            return MachineProgress::Complete;
        };
        let next = index + 1;
        match self.plan.steps.get(next) {
            Some(spec) => {
                self.cursor = Cursor::Running(next);
                MachineProgress::Entered(*spec)
            }
            None => {
                self.cursor = Cursor::Succeeded;
                MachineProgress::Complete
            }
        }
    }

    /// Terminal failure, reachable from any state. A machine that already
    /// finished keeps its outcome.
    pub fn fail(&mut self) {
        if let Cursor::Running(_) = self.cursor {
            self.cursor = Cursor::Failed;
        }
    }
}
