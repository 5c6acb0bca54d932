use serde::{Deserialize, Serialize};

use crate::reasoning::ForceReason;
use crate::retrieval::DegradedAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Retrieving,
    Reasoning,
    Answering,
    Done,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Retrieving => "retrieving",
            Self::Reasoning => "reasoning",
            Self::Answering => "answering",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "retrieving" => Ok(Self::Retrieving),
            "reasoning" => Ok(Self::Reasoning),
            "answering" => Ok(Self::Answering),
            "done" => Ok(Self::Done),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("unknown run state: {s}")),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model answered without being forced.
    Answered,
    DepthLimit,
    Deadline,
    RepeatedQuery,
    StepFailed,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::DepthLimit => "depth_limit",
            Self::Deadline => "deadline",
            Self::RepeatedQuery => "repeated_query",
            Self::StepFailed => "step_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<ForceReason> for TerminationReason {
    fn from(reason: ForceReason) -> Self {
        match reason {
            ForceReason::DepthLimit => Self::DepthLimit,
            ForceReason::Deadline => Self::Deadline,
            ForceReason::RepeatedQuery => Self::RepeatedQuery,
            ForceReason::StepFailed => Self::StepFailed,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TerminationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answered" => Ok(Self::Answered),
            "depth_limit" => Ok(Self::DepthLimit),
            "deadline" => Ok(Self::Deadline),
            "repeated_query" => Ok(Self::RepeatedQuery),
            "step_failed" => Ok(Self::StepFailed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown termination reason: {s}")),
        }
    }
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StateChanged {
        state: RunState,
    },
    Retrieving {
        depth: usize,
        query: String,
    },
    Retrieved {
        new_evidence: usize,
        degraded: Vec<DegradedAdapter>,
    },
    StepStarted {
        index: usize,
        forced: Option<ForceReason>,
    },
    StepFinished {
        index: usize,
        completed: bool,
        attempts: u32,
    },
    Finished {
        state: RunState,
        termination: TerminationReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_round_trip() {
        for state in [
            RunState::Planning,
            RunState::Retrieving,
            RunState::Reasoning,
            RunState::Answering,
            RunState::Done,
            RunState::Aborted,
        ] {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
        assert!(RunState::Done.is_terminal());
        assert!(!RunState::Reasoning.is_terminal());
    }

    #[test]
    fn force_reasons_map_to_termination() {
        assert_eq!(
            TerminationReason::from(ForceReason::RepeatedQuery),
            TerminationReason::RepeatedQuery
        );
        assert_eq!("step_failed".parse::<TerminationReason>().unwrap(), TerminationReason::StepFailed);
    }
}
