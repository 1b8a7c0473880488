//! Clock domains: shared edge sensitivities of stateful nodes.
//!
//! A [`ClockDomain`] is created the first time a register, latch or memory
//! asks for a given sensitivity list and is shared by every later node asking
//! for the same list. It is destroyed when its last user is removed.

use crate::ids::NodeId;
use kiln_common::BitVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which transition of a signal triggers a clock event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Edge {
    /// Rising edge of bit 0.
    Pos,
    /// Falling edge of bit 0.
    Neg,
    /// Any change of the signal's value.
    Any,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Edge::Pos => "posedge",
            Edge::Neg => "negedge",
            Edge::Any => "anyedge",
        })
    }
}

/// One entry of a sensitivity list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ClockEvent {
    /// The observed signal.
    pub signal: NodeId,
    /// The triggering transition.
    pub edge: Edge,
}

impl ClockEvent {
    /// Creates an event.
    pub fn new(signal: NodeId, edge: Edge) -> Self {
        Self { signal, edge }
    }

    /// Returns true if the transition `prev -> cur` triggers this event.
    pub fn triggers(&self, prev: &BitVector, cur: &BitVector) -> bool {
        let bit0 = |v: &BitVector| v.width() > 0 && v.bit(0);
        match self.edge {
            Edge::Pos => !bit0(prev) && bit0(cur),
            Edge::Neg => bit0(prev) && !bit0(cur),
            Edge::Any => prev != cur,
        }
    }
}

/// A sensitivity list plus the stateful nodes ticking on it.
#[derive(Clone, Debug)]
pub struct ClockDomain {
    events: Vec<ClockEvent>,
    users: Vec<NodeId>,
    sampled: Vec<Option<BitVector>>,
    fired: bool,
}

impl ClockDomain {
    /// Creates a domain with no users.
    pub fn new(events: Vec<ClockEvent>) -> Self {
        let sampled = vec![None; events.len()];
        Self {
            events,
            users: Vec::new(),
            sampled,
            fired: false,
        }
    }

    /// Returns the sensitivity list.
    pub fn events(&self) -> &[ClockEvent] {
        &self.events
    }

    /// Returns the stateful nodes in registration order.
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    /// Registers a stateful node.
    pub fn add_use(&mut self, node: NodeId) {
        if !self.users.contains(&node) {
            self.users.push(node);
        }
    }

    /// Unregisters a stateful node; returns true if the domain has no users left.
    pub fn remove_use(&mut self, node: NodeId) -> bool {
        self.users.retain(|u| *u != node);
        self.users.is_empty()
    }

    /// Returns true if the most recent sample fired.
    pub fn fired(&self) -> bool {
        self.fired
    }

    /// Samples the current event-signal values and records whether any event fired.
    ///
    /// Before the first sample every signal is taken to have been all zeros.
    pub fn sample(&mut self, values: &[BitVector]) -> bool {
        debug_assert_eq!(values.len(), self.events.len());
        let mut fired = false;
        for ((event, prev), cur) in self.events.iter().zip(&mut self.sampled).zip(values) {
            let before = match prev.take() {
                Some(v) => v,
                None => BitVector::new(cur.width()),
            };
            fired |= event.triggers(&before, cur);
            *prev = Some(cur.clone());
        }
        self.fired = fired;
        fired
    }

    /// Rewrites event signals through `map`.
    pub(crate) fn remap_signals(&mut self, map: impl Fn(NodeId) -> NodeId) {
        for event in &mut self.events {
            event.signal = map(event.signal);
        }
    }
}
