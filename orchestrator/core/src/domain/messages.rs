// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Wire Messages
//!
//! Payloads exchanged over the inter-satellite bus. The transport is
//! abstracted; these payloads are the contract.
//!
//! | Topic | Message |
//! |-------|---------|
//! | `coord/request_vote` | [`CoordMessage::RequestVote`] |
//! | `coord/vote_grant` | [`CoordMessage::ElectionVote`], granted [`CoordMessage::ProposalVote`] |
//! | `coord/vote_deny` | denied [`CoordMessage::ProposalVote`] |
//! | `coord/heartbeat` | [`CoordMessage::Heartbeat`] |
//! | `coord/proposal_request` | [`CoordMessage::ProposalRequest`] |
//! | `coord/action_approved` | [`CoordMessage::ActionApproved`] |
//! | `coord/action_propagate` | [`CoordMessage::ActionPropagate`] |
//! | `coord/action_ack` | [`CoordMessage::ActionAck`] |

use crate::domain::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const TOPIC_REQUEST_VOTE: &str = "coord/request_vote";
pub const TOPIC_VOTE_GRANT: &str = "coord/vote_grant";
pub const TOPIC_VOTE_DENY: &str = "coord/vote_deny";
pub const TOPIC_HEARTBEAT: &str = "coord/heartbeat";
pub const TOPIC_PROPOSAL_REQUEST: &str = "coord/proposal_request";
pub const TOPIC_ACTION_APPROVED: &str = "coord/action_approved";
pub const TOPIC_ACTION_PROPAGATE: &str = "coord/action_propagate";
pub const TOPIC_ACTION_ACK: &str = "coord/action_ack";

/// Every topic an engine instance listens on.
pub const COORDINATION_TOPICS: &[&str] = &[
    TOPIC_REQUEST_VOTE,
    TOPIC_VOTE_GRANT,
    TOPIC_VOTE_DENY,
    TOPIC_HEARTBEAT,
    TOPIC_PROPOSAL_REQUEST,
    TOPIC_ACTION_APPROVED,
    TOPIC_ACTION_PROPAGATE,
    TOPIC_ACTION_ACK,
];

/// Election term. Never decreases; a higher term always preempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Term(pub u64);

impl Term {
    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique consensus proposal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: AgentId,
    /// Candidate process uptime in milliseconds; second-level tie-break.
    pub candidate_uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionVote {
    pub term: Term,
    pub voter_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub term: Term,
    pub leader_id: AgentId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub proposal_id: ProposalId,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalVote {
    pub proposal_id: ProposalId,
    pub voter_id: AgentId,
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionApproved {
    pub proposal_id: ProposalId,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Set when the leader committed through the timeout fallback rather
    /// than a true quorum.
    #[serde(default)]
    pub fallback: bool,
    /// Leader term the commit was made in; receivers drop other terms.
    #[serde(default)]
    pub term: Term,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPropagate {
    pub proposal_id: ProposalId,
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub term: Term,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAck {
    pub proposal_id: ProposalId,
    pub agent_id: AgentId,
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordMessage {
    RequestVote(RequestVote),
    ElectionVote(ElectionVote),
    Heartbeat(Heartbeat),
    ProposalRequest(ProposalRequest),
    ProposalVote(ProposalVote),
    ActionApproved(ActionApproved),
    ActionPropagate(ActionPropagate),
    ActionAck(ActionAck),
}

impl CoordMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            CoordMessage::RequestVote(_) => TOPIC_REQUEST_VOTE,
            CoordMessage::ElectionVote(_) => TOPIC_VOTE_GRANT,
            CoordMessage::Heartbeat(_) => TOPIC_HEARTBEAT,
            CoordMessage::ProposalRequest(_) => TOPIC_PROPOSAL_REQUEST,
            CoordMessage::ProposalVote(vote) if vote.granted => TOPIC_VOTE_GRANT,
            CoordMessage::ProposalVote(_) => TOPIC_VOTE_DENY,
            CoordMessage::ActionApproved(_) => TOPIC_ACTION_APPROVED,
            CoordMessage::ActionPropagate(_) => TOPIC_ACTION_PROPAGATE,
            CoordMessage::ActionAck(_) => TOPIC_ACTION_ACK,
        }
    }
}

/// Addressed message as carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub from: AgentId,
    /// `None` broadcasts to every subscriber except the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<AgentId>,
    pub sent_at: DateTime<Utc>,
    pub message: CoordMessage,
}

impl Envelope {
    pub fn broadcast(from: AgentId, message: CoordMessage) -> Self {
        Self {
            topic: message.topic().to_string(),
            from,
            to: None,
            sent_at: Utc::now(),
            message,
        }
    }

    pub fn direct(from: AgentId, to: AgentId, message: CoordMessage) -> Self {
        Self {
            topic: message.topic().to_string(),
            from,
            to: Some(to),
            sent_at: Utc::now(),
            message,
        }
    }

    /// Whether `agent` should process this envelope.
    pub fn is_for(&self, agent: &AgentId) -> bool {
        match &self.to {
            Some(target) => target == agent,
            None => &self.from != agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_votes_map_to_grant_and_deny_topics() {
        let grant = CoordMessage::ProposalVote(ProposalVote {
            proposal_id: ProposalId::new(),
            voter_id: AgentId::from("SAT-001"),
            granted: true,
            reason: None,
        });
        let deny = CoordMessage::ProposalVote(ProposalVote {
            proposal_id: ProposalId::new(),
            voter_id: AgentId::from("SAT-001"),
            granted: false,
            reason: Some("battery critical".to_string()),
        });
        assert_eq!(grant.topic(), TOPIC_VOTE_GRANT);
        assert_eq!(deny.topic(), TOPIC_VOTE_DENY);
    }

    #[test]
    fn test_envelope_addressing() {
        let a = AgentId::from("SAT-A");
        let b = AgentId::from("SAT-B");
        let c = AgentId::from("SAT-C");
        let hb = CoordMessage::Heartbeat(Heartbeat {
            term: Term(3),
            leader_id: a.clone(),
            timestamp: Utc::now(),
        });

        let broadcast = Envelope::broadcast(a.clone(), hb.clone());
        assert!(!broadcast.is_for(&a));
        assert!(broadcast.is_for(&b));

        let direct = Envelope::direct(a, b.clone(), hb);
        assert!(direct.is_for(&b));
        assert!(!direct.is_for(&c));
    }

    #[test]
    fn test_message_is_tagged_on_the_wire() {
        let msg = CoordMessage::RequestVote(RequestVote {
            term: Term(7),
            candidate_id: AgentId::from("SAT-009"),
            candidate_uptime: 1200,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "request_vote");
        assert_eq!(json["term"], 7);
        let back: CoordMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
