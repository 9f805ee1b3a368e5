// src/pipes/network.rs
//! Directed graph of pipes between named workers
//!
//! Nodes are worker names plus the reserved controller node; every edge
//! carries one endpoint of a pipe, indexed by destination. The graph is
//! built once by the controller before workers start and is read-only
//! afterwards.

use crate::pipes::endpoint::PipeEndpoint;
use crate::protocol::CONTROLLER_NODE;
use crate::utils::errors::{NodeError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// One directed edge of the pipe graph
#[derive(Clone)]
pub struct PipeEdge {
    /// Endpoint operated by the edge's origin node
    pub endpoint: Arc<PipeEndpoint>,

    /// Whether the underlying pipe is duplex
    pub duplex: bool,
}

/// Graph of pipes routing point-to-point channels between workers
pub struct PipeNetwork {
    nodes: HashSet<String>,
    edges: HashMap<(String, String), PipeEdge>,
    is_unique: bool,
}

impl PipeNetwork {
    /// Create an empty network in uniqueness mode: at most one pipe per
    /// unordered node pair.
    pub fn new() -> Self {
        Self {
            nodes: HashSet::new(),
            edges: HashMap::new(),
            is_unique: true,
        }
    }

    /// Whether the network enforces one pipe per node pair
    pub fn is_unique(&self) -> bool {
        self.is_unique
    }

    /// Insert the given nodes plus the controller node.
    ///
    /// Idempotent: inserting an existing node is not an error.
    pub fn populate<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.nodes.insert(name.into());
        }
        self.nodes.insert(CONTROLLER_NODE.to_string());
    }

    /// Registered node names
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Insert a pipe between `receiver` and `sender`.
    ///
    /// Creates one linked endpoint pair and two directed edges. For a
    /// simplex pipe the reverse edge still exists; the one-way constraint
    /// is enforced by endpoint capability, not by edge omission.
    pub fn insert_pipe(&mut self, (receiver, sender): (&str, &str), duplex: bool) -> Result<()> {
        let forward = (receiver.to_string(), sender.to_string());
        let backward = (sender.to_string(), receiver.to_string());

        if self.is_unique && (self.edges.contains_key(&forward) || self.edges.contains_key(&backward)) {
            return Err(NodeError::DuplicatePipe(
                receiver.to_string(),
                sender.to_string(),
            ));
        }

        self.nodes.insert(receiver.to_string());
        self.nodes.insert(sender.to_string());

        let (receiver_end, sender_end) = PipeEndpoint::pair(duplex);
        debug!(receiver, sender, duplex, "inserting pipe");

        self.edges.insert(
            forward,
            PipeEdge {
                endpoint: receiver_end,
                duplex,
            },
        );
        self.edges.insert(
            backward,
            PipeEdge {
                endpoint: sender_end,
                duplex,
            },
        );

        Ok(())
    }

    /// Whether a directed edge exists
    pub fn has_pipe(&self, (from, to): (&str, &str)) -> bool {
        self.edges.contains_key(&(from.to_string(), to.to_string()))
    }

    /// All outgoing edges from `node`, keyed by destination
    pub fn get_pipes(&self, node: &str) -> HashMap<String, PipeEdge> {
        self.edges
            .iter()
            .filter(|((from, _), _)| from == node)
            .map(|((_, to), edge)| (to.clone(), edge.clone()))
            .collect()
    }

    /// Whether the pipe behind a directed edge is duplex
    pub fn is_duplex(&self, (from, to): (&str, &str)) -> Result<bool> {
        self.edges
            .get(&(from.to_string(), to.to_string()))
            .map(|edge| edge.duplex)
            .ok_or_else(|| NodeError::UnknownPipe(from.to_string(), to.to_string()))
    }

    /// Outgoing edges from the controller node
    pub fn controller_pipes(&self) -> HashMap<String, PipeEdge> {
        self.get_pipes(CONTROLLER_NODE)
    }
}

impl Default for PipeNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populate_adds_controller() {
        let mut net = PipeNetwork::new();
        net.populate(["alpha", "beta"]);

        let nodes: Vec<&str> = net.nodes().collect();
        assert!(nodes.contains(&"alpha"));
        assert!(nodes.contains(&"beta"));
        assert!(nodes.contains(&CONTROLLER_NODE));
    }

    #[test]
    fn test_populate_is_idempotent() {
        let mut net = PipeNetwork::new();
        net.populate(["alpha"]);
        net.populate(["alpha"]);
        assert_eq!(net.nodes().count(), 2);
    }

    #[test]
    fn test_duplicate_pipe_rejected_either_direction() {
        let mut net = PipeNetwork::new();
        net.populate(["alpha", "beta"]);

        net.insert_pipe(("alpha", "beta"), true).unwrap();

        assert!(matches!(
            net.insert_pipe(("alpha", "beta"), true),
            Err(NodeError::DuplicatePipe(_, _))
        ));
        assert!(matches!(
            net.insert_pipe(("beta", "alpha"), false),
            Err(NodeError::DuplicatePipe(_, _))
        ));
    }

    #[test]
    fn test_get_pipes_indexes_by_destination() {
        let mut net = PipeNetwork::new();
        net.populate(["alpha", "beta", "gamma"]);
        net.insert_pipe(("alpha", "beta"), true).unwrap();
        net.insert_pipe(("alpha", "gamma"), true).unwrap();

        let pipes = net.get_pipes("alpha");
        assert_eq!(pipes.len(), 2);
        assert!(pipes.contains_key("beta"));
        assert!(pipes.contains_key("gamma"));

        assert_eq!(net.get_pipes("beta").len(), 1);
    }

    #[test]
    fn test_is_duplex_unknown_edge() {
        let net = PipeNetwork::new();
        assert!(matches!(
            net.is_duplex(("alpha", "beta")),
            Err(NodeError::UnknownPipe(_, _))
        ));
    }

    #[tokio::test]
    async fn test_linked_edges_share_one_pipe() {
        let mut net = PipeNetwork::new();
        net.populate(["alpha", "beta"]);
        net.insert_pipe(("alpha", "beta"), true).unwrap();

        let alpha_side = net.get_pipes("alpha").remove("beta").unwrap();
        let beta_side = net.get_pipes("beta").remove("alpha").unwrap();

        alpha_side.endpoint.send(bytes::Bytes::from_static(b"hi")).unwrap();
        let got = beta_side.endpoint.receive().await.unwrap().unwrap();
        assert_eq!(got.as_ref(), b"hi");
    }

    #[test]
    fn test_simplex_capability_on_edges() {
        let mut net = PipeNetwork::new();
        net.populate(["alpha", "beta"]);
        // alpha receives, beta sends
        net.insert_pipe(("alpha", "beta"), false).unwrap();

        let alpha_side = net.get_pipes("alpha").remove("beta").unwrap();
        let beta_side = net.get_pipes("beta").remove("alpha").unwrap();

        assert!(alpha_side.endpoint.readable());
        assert!(!alpha_side.endpoint.writable());
        assert!(beta_side.endpoint.writable());
        assert!(!beta_side.endpoint.readable());
        assert!(!alpha_side.duplex);
    }
}
