//! Boundary types between the neuroevolution core and the simulated program.
//!
//! The core never talks to the target program directly. It consumes named
//! numeric features per simulation step ([`InputFeatures`]), exposes its
//! choices through the [`ActionSpace`] the caller supplied at generation
//! time, and records what actually happened in an [`ExecutionTrace`] for the
//! external persistence layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named numeric features per source sprite, pre-normalized to roughly
/// `[-1, 1]`: sprite name -> feature name -> value.
pub type InputFeatures = BTreeMap<String, BTreeMap<String, f64>>;

/// One discrete action the target program accepts, optionally carrying named
/// continuous parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Symbolic name of the action (e.g. "KeyPress:space").
    pub name: String,
    /// Names of the continuous parameters this action takes, in order.
    pub parameters: Vec<String>,
}

impl Action {
    /// A parameterless action.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// An action with named continuous parameters.
    #[must_use]
    pub fn with_parameters<I, S>(name: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }
}

/// The ordered list of available actions.
///
/// Determines how many classification and regression output nodes a freshly
/// generated chromosome receives: one classification output per action, one
/// regression output per action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActionSpace {
    actions: Vec<Action>,
}

impl ActionSpace {
    /// Build an action space from an ordered action list.
    #[must_use]
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// The actions, in their fixed order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of discrete actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the space holds no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Total number of continuous parameters across all actions.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.actions.iter().map(|a| a.parameters.len()).sum()
    }
}

/// One recorded step of a chromosome driving the target program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Simulation step index.
    pub step: usize,
    /// Name of the action the network selected.
    pub action: String,
    /// Parameter values passed with the action, in the action's parameter
    /// order.
    pub parameters: Vec<f64>,
}

/// The sequence of events recorded while evaluating a chromosome, dumped
/// alongside the gene lists so external tooling can replay the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionTrace {
    /// Recorded events, oldest first.
    pub events: Vec<TraceEvent>,
}

impl ExecutionTrace {
    /// Append one event.
    pub fn record(&mut self, step: usize, action: impl Into<String>, parameters: Vec<f64>) {
        self.events.push(TraceEvent {
            step,
            action: action.into(),
            parameters,
        });
    }
}
