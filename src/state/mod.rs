//! Pipeline state machine
//!
//! Fixed linear order of states with a terminal `FAILED` reachable from any
//! non-terminal state. Every accepted transition is kept in the history.

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    MarketResearch,
    CompetitivePricing,
    FxSnapshot,
    FxImpact,
    MarginPlanning,
    DecisionBrief,
    Evaluation,
    Done,
    Failed,
}

impl PipelineState {
    /// Successor on the happy path. Terminal states have none.
    pub fn next(&self) -> Option<PipelineState> {
        use PipelineState::*;
        match self {
            Init => Some(MarketResearch),
            MarketResearch => Some(CompetitivePricing),
            CompetitivePricing => Some(FxSnapshot),
            FxSnapshot => Some(FxImpact),
            FxImpact => Some(MarginPlanning),
            MarginPlanning => Some(DecisionBrief),
            DecisionBrief => Some(Evaluation),
            Evaluation => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Name of the step output produced while in this state.
    pub fn step_name(&self) -> Option<&'static str> {
        use crate::steps::*;
        match self {
            PipelineState::MarketResearch => Some(MARKET_RESEARCH),
            PipelineState::CompetitivePricing => Some(COMPETITIVE_PRICING),
            PipelineState::FxSnapshot => Some(FX_SNAPSHOT),
            PipelineState::FxImpact => Some(FX_IMPACT),
            PipelineState::MarginPlanning => Some(MARGIN_SCENARIOS),
            PipelineState::DecisionBrief => Some(DECISION_BRIEF),
            PipelineState::Evaluation => Some(EVALUATION),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use PipelineState::*;
        match self {
            Init => "INIT",
            MarketResearch => "MARKET_RESEARCH",
            CompetitivePricing => "COMPETITIVE_PRICING",
            FxSnapshot => "FX_SNAPSHOT",
            FxImpact => "FX_IMPACT",
            MarginPlanning => "MARGIN_PLANNING",
            DecisionBrief => "DECISION_BRIEF",
            Evaluation => "EVALUATION",
            Done => "DONE",
            Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachine {
    current: PipelineState,
    history: Vec<PipelineState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Init,
            history: vec![PipelineState::Init],
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Move to the next state on the happy path.
    pub fn advance(&mut self) -> Result<PipelineState> {
        let next = self.current.next().ok_or_else(|| {
            OrchestrationError::InvalidTransition(format!("{} is terminal", self.current))
        })?;
        self.transition_to(next)
    }

    pub fn fail(&mut self) -> Result<PipelineState> {
        self.transition_to(PipelineState::Failed)
    }

    pub fn transition_to(&mut self, target: PipelineState) -> Result<PipelineState> {
        let allowed = !self.current.is_terminal()
            && (target == PipelineState::Failed || self.current.next() == Some(target));

        if !allowed {
            return Err(OrchestrationError::InvalidTransition(format!(
                "{} -> {}",
                self.current, target
            )));
        }

        self.current = target;
        self.history.push(target);
        Ok(target)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_reaches_done() {
        let mut machine = StateMachine::new();
        while !machine.current().is_terminal() {
            machine.advance().unwrap();
        }
        assert_eq!(machine.current(), PipelineState::Done);
        assert_eq!(machine.history().len(), 9);
        assert!(machine.advance().is_err());
    }

    #[test]
    fn test_fail_from_any_non_terminal_state() {
        let mut machine = StateMachine::new();
        machine.advance().unwrap();
        machine.advance().unwrap();
        assert_eq!(machine.fail().unwrap(), PipelineState::Failed);
        assert!(machine.fail().is_err());
        assert!(machine.advance().is_err());
    }

    #[test]
    fn test_skipping_ahead_is_rejected() {
        let mut machine = StateMachine::new();
        let result = machine.transition_to(PipelineState::Evaluation);
        assert!(matches!(result, Err(OrchestrationError::InvalidTransition(_))));
        assert_eq!(machine.current(), PipelineState::Init);
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&PipelineState::MarginPlanning).unwrap();
        assert_eq!(json, "\"MARGIN_PLANNING\"");
        assert_eq!(PipelineState::FxSnapshot.step_name(), Some("fx_snapshot"));
        assert_eq!(PipelineState::Done.step_name(), None);
    }
}
