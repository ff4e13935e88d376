//! Gene types for network chromosomes.
//!
//! This module defines the atomic genetic units:
//! - [`NodeGene`]: a neuron, with its role encoded in a [`NodeKind`] tag
//! - [`ConnectionGene`]: a weighted directed edge between two nodes
//!
//! Node identity is a plain integer [`NodeId`] minted by the
//! [`EvolutionContext`](crate::innovation::EvolutionContext) and stable across
//! clones, generations and independently generated chromosomes, so that
//! crossover can align genes by identity instead of structural inspection.
//! Connections live in a `SlotMap` arena keyed by [`ConnectionKey`].

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::activation::Activation;

new_key_type! {
    /// Arena key for a connection within one chromosome.
    pub struct ConnectionKey;
}

/// Stable integer identity of a node, shared across all chromosomes in a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u32);

/// Innovation number of a structural mutation, minted by the
/// [`InnovationLedger`](crate::innovation::InnovationLedger).
pub type Innovation = u64;

/// The role of a node, with role-specific payload.
///
/// Output nodes reference the symbolic action they stand for; regression
/// outputs additionally name the continuous parameter they produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Receives one named feature of one source sprite.
    Input {
        /// Name of the sprite this feature was extracted from.
        sprite: String,
        /// Name of the feature within the sprite.
        feature: String,
    },
    /// Constant 1.0 source.
    Bias,
    /// Internal node created by splitting a connection.
    Hidden,
    /// Discrete action-selection output. The softmax over all classification
    /// outputs forms the action distribution.
    Classification {
        /// Name of the action this output votes for.
        action: String,
    },
    /// Continuous parameter output for a parameterized action.
    Regression {
        /// Name of the action the parameter belongs to.
        action: String,
        /// Name of the parameter.
        parameter: String,
    },
}

impl NodeKind {
    /// Whether this node's value is set directly from supplied features.
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input { .. } | Self::Bias)
    }

    /// Whether this node is a classification or regression output.
    #[must_use]
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Classification { .. } | Self::Regression { .. })
    }
}

/// A node gene.
///
/// Structural identity is `id`, `kind`, `activation` and `depth`; the
/// remaining fields are per-step runtime state, double-buffered so that
/// recurrent connections can read the previous step's value while forward
/// connections read the value already updated this pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGene {
    /// Stable identity, used as the matching key across chromosomes.
    pub id: NodeId,
    /// Role tag with role-specific payload.
    pub kind: NodeKind,
    /// Activation function applied to the accumulated input sum.
    pub activation: Activation,
    /// Layer position: 0 for inputs/bias, 1 for outputs, split midpoints for
    /// hidden nodes. Drives activation scheduling and recurrence checks.
    pub depth: f64,
    /// Accumulated pre-activation sum for the current step.
    #[serde(skip)]
    pub input_sum: f64,
    /// Activation value of the current step.
    #[serde(skip)]
    pub value: f64,
    /// Activation value of the previous step (read by recurrent edges).
    #[serde(skip)]
    pub prev_value: f64,
    /// Whether this node received any signal this step.
    #[serde(skip)]
    pub activated: bool,
    /// How many steps this node has activated in so far. A node with count 0
    /// has never carried a signal and contributes nothing through recurrent
    /// edges.
    #[serde(skip)]
    pub activation_count: u32,
}

impl NodeGene {
    /// Create an input node for a named sprite feature.
    #[must_use]
    pub fn input(id: NodeId, sprite: impl Into<String>, feature: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Input {
                sprite: sprite.into(),
                feature: feature.into(),
            },
            Activation::None,
            0.0,
        )
    }

    /// Create the bias node.
    #[must_use]
    pub fn bias(id: NodeId) -> Self {
        Self::new(id, NodeKind::Bias, Activation::None, 0.0)
    }

    /// Create a hidden node at the given depth.
    #[must_use]
    pub fn hidden(id: NodeId, activation: Activation, depth: f64) -> Self {
        Self::new(id, NodeKind::Hidden, activation, depth)
    }

    /// Create a classification output for an action.
    #[must_use]
    pub fn classification(id: NodeId, action: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Classification {
                action: action.into(),
            },
            Activation::Softmax,
            1.0,
        )
    }

    /// Create a regression output for an action parameter.
    #[must_use]
    pub fn regression(
        id: NodeId,
        action: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::Regression {
                action: action.into(),
                parameter: parameter.into(),
            },
            Activation::None,
            1.0,
        )
    }

    fn new(id: NodeId, kind: NodeKind, activation: Activation, depth: f64) -> Self {
        Self {
            id,
            kind,
            activation,
            depth,
            input_sum: 0.0,
            value: 0.0,
            prev_value: 0.0,
            activated: false,
            activation_count: 0,
        }
    }

    /// Reset all runtime state to the initial/default values.
    pub fn reset(&mut self) {
        self.input_sum = 0.0;
        self.value = 0.0;
        self.prev_value = 0.0;
        self.activated = false;
        self.activation_count = 0;
    }
}

/// A connection gene.
///
/// The matching key for innovation lookup is `(source, target, recurrent)`:
/// two connections with an equal key anywhere in the population carry the
/// same innovation number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionGene {
    /// Identity of the source node.
    pub source: NodeId,
    /// Identity of the target node.
    pub target: NodeId,
    /// Whether this edge goes backward (or sideways) in depth and therefore
    /// reads the source's previous-step value during activation.
    pub recurrent: bool,
    /// Connection weight.
    pub weight: f64,
    /// Disabled connections are skipped during activation but preserved for
    /// crossover alignment.
    pub enabled: bool,
    /// Innovation number assigned by the ledger on first occurrence of this
    /// structural edge anywhere in the run.
    pub innovation: Innovation,
}

impl ConnectionGene {
    /// Create a new enabled connection.
    #[must_use]
    pub fn new(
        source: NodeId,
        target: NodeId,
        recurrent: bool,
        weight: f64,
        innovation: Innovation,
    ) -> Self {
        Self {
            source,
            target,
            recurrent,
            weight,
            enabled: true,
            innovation,
        }
    }
}
