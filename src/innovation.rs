//! Innovation tracking and the shared evolution context.
//!
//! The [`InnovationLedger`] is an append-only log of structural mutations.
//! The first occurrence of a structural edge (keyed by source id, target id
//! and recurrence flag) mints a fresh innovation number; every later
//! independent occurrence of the same edge anywhere in the run reuses it.
//! Splitting a connection mints a joint record: a fresh hidden-node id plus
//! innovation numbers for the two replacement connections, all reused when
//! the same split happens again. This is what lets two independently mutated
//! chromosomes be aligned gene-by-gene during crossover and distance
//! computation.
//!
//! Instead of process-wide statics, all shared counters and tables live in an
//! explicit [`EvolutionContext`] owned by the population manager and passed
//! by reference into chromosome construction and the genetic operators. The
//! single control thread mutates it only between fitness evaluations, so no
//! locking is needed; consumers must treat the ledger as append-only and
//! never renumber or remove entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::gene::{Innovation, NodeId};

/// A permanent record of one structural mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InnovationRecord {
    /// A new connection between two existing nodes.
    AddConnection {
        /// Source node identity.
        source: NodeId,
        /// Target node identity.
        target: NodeId,
        /// Recurrence class of the edge.
        recurrent: bool,
        /// Innovation number minted for the edge.
        innovation: Innovation,
    },
    /// A connection split through a fresh hidden node.
    SplitConnection {
        /// Source node of the split connection.
        source: NodeId,
        /// Target node of the split connection.
        target: NodeId,
        /// Innovation number of the connection that was split.
        split_innovation: Innovation,
        /// Identity minted for the new hidden node.
        node: NodeId,
        /// Innovation of the source -> node connection.
        incoming: Innovation,
        /// Innovation of the node -> target connection.
        outgoing: Innovation,
    },
}

/// The result of registering a connection split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitInnovation {
    /// Identity of the hidden node (reused on repeated splits).
    pub node: NodeId,
    /// Innovation of the source -> node connection.
    pub incoming: Innovation,
    /// Innovation of the node -> target connection.
    pub outgoing: Innovation,
}

/// Append-only log of structural mutations with lookup indexes.
///
/// The log itself is authoritative; the hash indexes only exist to make the
/// dedup lookups cheap. `len()` never decreases over the course of a run.
#[derive(Debug, Default)]
pub struct InnovationLedger {
    records: Vec<InnovationRecord>,
    connection_index: HashMap<(NodeId, NodeId, bool), Innovation>,
    split_index: HashMap<(NodeId, NodeId, Innovation), SplitInnovation>,
    next_innovation: Innovation,
}

impl InnovationLedger {
    /// Create an empty ledger. Innovation numbers start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            connection_index: HashMap::new(),
            split_index: HashMap::new(),
            next_innovation: 1,
        }
    }

    /// Innovation number for the edge `(source, target, recurrent)`.
    ///
    /// Mints and logs a fresh number on first occurrence, returns the
    /// existing one thereafter.
    pub fn connection(&mut self, source: NodeId, target: NodeId, recurrent: bool) -> Innovation {
        if let Some(&innovation) = self.connection_index.get(&(source, target, recurrent)) {
            return innovation;
        }

        let innovation = self.mint();
        self.connection_index
            .insert((source, target, recurrent), innovation);
        self.records.push(InnovationRecord::AddConnection {
            source,
            target,
            recurrent,
            innovation,
        });
        innovation
    }

    /// Joint innovation record for splitting the connection
    /// `(source, target)` whose own innovation is `split_innovation`.
    ///
    /// The first occurrence mints a hidden-node id (via `node_id`) and a pair
    /// of connection innovations; later occurrences of the same split reuse
    /// all three, so independently evolved chromosomes grow structurally
    /// identical hidden nodes.
    pub fn split(
        &mut self,
        source: NodeId,
        target: NodeId,
        split_innovation: Innovation,
        node_id: &mut impl FnMut() -> NodeId,
    ) -> SplitInnovation {
        if let Some(&split) = self.split_index.get(&(source, target, split_innovation)) {
            return split;
        }

        let node = node_id();
        let incoming = self.mint();
        let outgoing = self.mint();
        let split = SplitInnovation {
            node,
            incoming,
            outgoing,
        };
        self.split_index
            .insert((source, target, split_innovation), split);
        self.records.push(InnovationRecord::SplitConnection {
            source,
            target,
            split_innovation,
            node,
            incoming,
            outgoing,
        });
        split
    }

    /// Number of recorded structural mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no structural mutation has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The full append-only log, oldest first.
    #[must_use]
    pub fn records(&self) -> &[InnovationRecord] {
        &self.records
    }

    fn mint(&mut self) -> Innovation {
        let innovation = self.next_innovation;
        self.next_innovation += 1;
        innovation
    }
}

/// Shared mutable state of one evolutionary run.
///
/// Owns the innovation ledger, the monotonic node-id counter and the tables
/// mapping named inputs and outputs to stable node identities. Chromosomes
/// generated at different times, with different discovered input features,
/// resolve the same `(sprite, feature)` pair to the same [`NodeId`], which is
/// a precondition for innovation reuse and crossover alignment.
#[derive(Debug, Default)]
pub struct EvolutionContext {
    ledger: InnovationLedger,
    next_node: u32,
    input_table: HashMap<(String, String), NodeId>,
    output_table: HashMap<(String, Option<String>), NodeId>,
    bias: Option<NodeId>,
}

impl EvolutionContext {
    /// Create a fresh context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: InnovationLedger::new(),
            next_node: 0,
            input_table: HashMap::new(),
            output_table: HashMap::new(),
            bias: None,
        }
    }

    /// The innovation ledger.
    #[must_use]
    pub fn ledger(&self) -> &InnovationLedger {
        &self.ledger
    }

    /// Mint a fresh node identity.
    pub fn next_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Stable node identity for a named input feature, minted on first use.
    pub fn input_node(&mut self, sprite: &str, feature: &str) -> NodeId {
        if let Some(&id) = self
            .input_table
            .get(&(sprite.to_owned(), feature.to_owned()))
        {
            return id;
        }
        let id = self.next_node_id();
        self.input_table
            .insert((sprite.to_owned(), feature.to_owned()), id);
        id
    }

    /// Look up a named input feature without minting.
    #[must_use]
    pub fn find_input_node(&self, sprite: &str, feature: &str) -> Option<NodeId> {
        self.input_table
            .get(&(sprite.to_owned(), feature.to_owned()))
            .copied()
    }

    /// Stable identity of the bias node, minted on first use.
    pub fn bias_node(&mut self) -> NodeId {
        if let Some(id) = self.bias {
            return id;
        }
        let id = self.next_node_id();
        self.bias = Some(id);
        id
    }

    /// Stable identity for a classification output of `action`, or for the
    /// regression output of `(action, parameter)`.
    pub fn output_node(&mut self, action: &str, parameter: Option<&str>) -> NodeId {
        let key = (action.to_owned(), parameter.map(str::to_owned));
        if let Some(&id) = self.output_table.get(&key) {
            return id;
        }
        let id = self.next_node_id();
        self.output_table.insert(key, id);
        id
    }

    /// Innovation number for a connection edge, minted or reused.
    pub fn connection_innovation(
        &mut self,
        source: NodeId,
        target: NodeId,
        recurrent: bool,
    ) -> Innovation {
        self.ledger.connection(source, target, recurrent)
    }

    /// Joint innovation record for a connection split, minted or reused.
    pub fn split_innovation(
        &mut self,
        source: NodeId,
        target: NodeId,
        split_innovation: Innovation,
    ) -> SplitInnovation {
        let next = &mut self.next_node;
        self.ledger
            .split(source, target, split_innovation, &mut || {
                let id = NodeId(*next);
                *next += 1;
                id
            })
    }
}
