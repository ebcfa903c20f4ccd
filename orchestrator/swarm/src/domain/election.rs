// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Leader Election State Machine
//!
//! Pure, clock-injected Raft-style election. The application service feeds it
//! inbound messages and periodic ticks and performs the [`ElectionOutput`]s it
//! returns; no I/O happens here.
//!
//! ```text
//! FOLLOWER --lease expired--> CANDIDATE --majority--> LEADER
//!     ^                           |                      |
//!     +------- higher term -------+------ higher term ---+
//! ```
//!
//! Candidates rank by `(AgentId, uptime)`; a lower-ranked candidate yields its
//! vote to a higher-ranked one in the same term.

use crate::domain::quorum::majority;
use chrono::Utc;
use constellation_core::domain::agent::AgentId;
use constellation_core::domain::messages::{CoordMessage, ElectionVote, Heartbeat, RequestVote, Term};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionState {
    Follower,
    Candidate,
    Leader,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionOutput {
    Broadcast(CoordMessage),
    Reply { to: AgentId, message: CoordMessage },
    /// `convergence` runs from the first candidacy since a leader was last
    /// known to this win.
    BecameLeader { term: Term, convergence: Duration },
    SteppedDown(Term),
    VoteGranted { candidate: AgentId, term: Term },
}

/// How an inbound heartbeat was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatDisposition {
    Accepted,
    Stale,
    Ignored,
}

#[derive(Debug)]
pub struct ElectionStateMachine {
    self_id: AgentId,
    started_at: Instant,
    state: ElectionState,
    term: Term,
    voted_for: Option<AgentId>,
    leader_id: Option<AgentId>,
    votes: HashSet<AgentId>,
    candidate_since: Option<Instant>,
    /// Follower lease validity; `None` until a leader has been heard.
    lease_until: Option<Instant>,
    /// Next instant at which a follower or candidate (re)starts an election.
    election_deadline: Instant,
    next_heartbeat: Instant,
    lease: Duration,
    heartbeat_interval: Duration,
}

impl ElectionStateMachine {
    /// `initial_timeout` is the randomized wait before a fresh follower's
    /// first candidacy.
    pub fn new(
        self_id: AgentId,
        now: Instant,
        initial_timeout: Duration,
        lease: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            self_id,
            started_at: now,
            state: ElectionState::Follower,
            term: Term::default(),
            voted_for: None,
            leader_id: None,
            votes: HashSet::new(),
            candidate_since: None,
            lease_until: None,
            election_deadline: now + initial_timeout,
            next_heartbeat: now,
            lease,
            heartbeat_interval,
        }
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn leader_id(&self) -> Option<&AgentId> {
        self.leader_id.as_ref()
    }

    pub fn is_leader(&self) -> bool {
        self.state == ElectionState::Leader
    }

    pub fn voted_for(&self) -> Option<&AgentId> {
        self.voted_for.as_ref()
    }

    pub fn lease_valid(&self, now: Instant) -> bool {
        matches!(self.lease_until, Some(until) if now < until)
    }

    pub fn uptime_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_millis() as u64
    }

    /// Drive timers. `timeout` is a freshly drawn randomized election timeout.
    pub fn on_tick(&mut self, now: Instant, alive: &[AgentId], timeout: Duration) -> Vec<ElectionOutput> {
        match self.state {
            ElectionState::Leader => {
                if now >= self.next_heartbeat {
                    self.next_heartbeat = now + self.heartbeat_interval;
                    vec![self.heartbeat()]
                } else {
                    vec![]
                }
            }
            ElectionState::Follower => {
                if self.lease_valid(now) || now < self.election_deadline {
                    vec![]
                } else {
                    self.start_election(now, alive, timeout)
                }
            }
            ElectionState::Candidate => {
                if now < self.election_deadline {
                    vec![]
                } else {
                    self.start_election(now, alive, timeout)
                }
            }
        }
    }

    fn start_election(&mut self, now: Instant, alive: &[AgentId], timeout: Duration) -> Vec<ElectionOutput> {
        self.term = self.term.next();
        self.state = ElectionState::Candidate;
        self.voted_for = Some(self.self_id.clone());
        self.leader_id = None;
        self.votes.clear();
        self.votes.insert(self.self_id.clone());
        self.election_deadline = now + timeout;
        self.candidate_since.get_or_insert(now);

        let mut outputs = vec![ElectionOutput::Broadcast(CoordMessage::RequestVote(RequestVote {
            term: self.term,
            candidate_id: self.self_id.clone(),
            candidate_uptime: self.uptime_ms(now),
        }))];
        if self.votes.len() >= majority(electorate(alive, &self.self_id)) {
            outputs.extend(self.become_leader(now));
        }
        outputs
    }

    fn become_leader(&mut self, now: Instant) -> Vec<ElectionOutput> {
        self.state = ElectionState::Leader;
        self.leader_id = Some(self.self_id.clone());
        self.lease_until = None;
        self.next_heartbeat = now + self.heartbeat_interval;
        let convergence = self
            .candidate_since
            .take()
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        vec![
            ElectionOutput::BecameLeader {
                term: self.term,
                convergence,
            },
            self.heartbeat(),
        ]
    }

    fn heartbeat(&self) -> ElectionOutput {
        ElectionOutput::Broadcast(CoordMessage::Heartbeat(Heartbeat {
            term: self.term,
            leader_id: self.self_id.clone(),
            timestamp: Utc::now(),
        }))
    }

    /// Adopt a strictly higher term and fall back to follower.
    fn adopt_term(&mut self, term: Term, outputs: &mut Vec<ElectionOutput>) {
        if self.state == ElectionState::Leader {
            outputs.push(ElectionOutput::SteppedDown(self.term));
        }
        self.term = term;
        self.state = ElectionState::Follower;
        self.voted_for = None;
        self.leader_id = None;
        self.votes.clear();
    }

    fn refresh_lease(&mut self, now: Instant, timeout: Duration) {
        let until = now + self.lease;
        self.lease_until = Some(until);
        self.election_deadline = until + timeout;
    }

    pub fn on_request_vote(
        &mut self,
        request: &RequestVote,
        now: Instant,
        timeout: Duration,
    ) -> Vec<ElectionOutput> {
        let mut outputs = Vec::new();
        if request.term < self.term {
            return outputs;
        }
        if request.term > self.term {
            self.adopt_term(request.term, &mut outputs);
        }

        let grant = match self.state {
            ElectionState::Leader => false,
            ElectionState::Candidate => {
                let theirs = (&request.candidate_id, request.candidate_uptime);
                let ours = (&self.self_id, self.uptime_ms(now));
                if theirs > ours {
                    self.state = ElectionState::Follower;
                    self.votes.clear();
                    true
                } else {
                    false
                }
            }
            ElectionState::Follower => match &self.voted_for {
                None => true,
                Some(existing) => existing == &request.candidate_id,
            },
        };

        if grant {
            self.voted_for = Some(request.candidate_id.clone());
            self.election_deadline = now + timeout.max(self.heartbeat_interval);
            outputs.push(ElectionOutput::VoteGranted {
                candidate: request.candidate_id.clone(),
                term: self.term,
            });
            outputs.push(ElectionOutput::Reply {
                to: request.candidate_id.clone(),
                message: CoordMessage::ElectionVote(ElectionVote {
                    term: self.term,
                    voter_id: self.self_id.clone(),
                }),
            });
        }
        outputs
    }

    pub fn on_vote(&mut self, vote: &ElectionVote, now: Instant, alive: &[AgentId]) -> Vec<ElectionOutput> {
        let mut outputs = Vec::new();
        if vote.term > self.term {
            self.adopt_term(vote.term, &mut outputs);
            return outputs;
        }
        if vote.term < self.term || self.state != ElectionState::Candidate {
            return outputs;
        }
        if !alive.contains(&vote.voter_id) {
            return outputs;
        }
        self.votes.insert(vote.voter_id.clone());
        if self.votes.len() >= majority(electorate(alive, &self.self_id)) {
            outputs.extend(self.become_leader(now));
        }
        outputs
    }

    pub fn on_heartbeat(
        &mut self,
        heartbeat: &Heartbeat,
        now: Instant,
        timeout: Duration,
    ) -> (HeartbeatDisposition, Vec<ElectionOutput>) {
        let mut outputs = Vec::new();
        if heartbeat.term < self.term {
            return (HeartbeatDisposition::Stale, outputs);
        }
        if heartbeat.leader_id == self.self_id {
            return (HeartbeatDisposition::Ignored, outputs);
        }
        if heartbeat.term > self.term {
            self.adopt_term(heartbeat.term, &mut outputs);
        } else if self.state == ElectionState::Leader {
            // Two leaders in one term: the lower-ranked one yields.
            if heartbeat.leader_id < self.self_id {
                return (HeartbeatDisposition::Ignored, outputs);
            }
            outputs.push(ElectionOutput::SteppedDown(self.term));
        }

        self.state = ElectionState::Follower;
        self.votes.clear();
        self.candidate_since = None;
        self.leader_id = Some(heartbeat.leader_id.clone());
        self.refresh_lease(now, timeout);
        (HeartbeatDisposition::Accepted, outputs)
    }
}

/// Alive count used for majority, always counting the local agent.
fn electorate(alive: &[AgentId], self_id: &AgentId) -> usize {
    if alive.contains(self_id) {
        alive.len()
    } else {
        alive.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(10);
    const HEARTBEAT: Duration = Duration::from_secs(1);
    const TIMEOUT: Duration = Duration::from_millis(200);

    fn ids(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::from(*n)).collect()
    }

    fn machine(id: &str, now: Instant) -> ElectionStateMachine {
        ElectionStateMachine::new(AgentId::from(id), now, TIMEOUT, LEASE, HEARTBEAT)
    }

    fn request(term: u64, candidate: &str, uptime: u64) -> RequestVote {
        RequestVote {
            term: Term(term),
            candidate_id: AgentId::from(candidate),
            candidate_uptime: uptime,
        }
    }

    fn heartbeat(term: u64, leader: &str) -> Heartbeat {
        Heartbeat {
            term: Term(term),
            leader_id: AgentId::from(leader),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_fresh_follower_waits_one_timeout() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("A", t0);
        assert!(m.on_tick(t0 + Duration::from_millis(100), &alive, TIMEOUT).is_empty());

        let out = m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        assert_eq!(m.state(), ElectionState::Candidate);
        assert_eq!(m.term(), Term(1));
        assert!(matches!(&out[0], ElectionOutput::Broadcast(CoordMessage::RequestVote(r)) if r.term == Term(1)));
    }

    #[test]
    fn test_single_agent_elects_itself() {
        let t0 = Instant::now();
        let alive = ids(&["A"]);
        let mut m = machine("A", t0);
        let out = m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        assert!(m.is_leader());
        assert!(out.contains(&ElectionOutput::BecameLeader {
            term: Term(1),
            convergence: Duration::ZERO,
        }));
    }

    #[test]
    fn test_candidate_wins_with_majority() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C", "D", "E"]);
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);

        let vote = |voter: &str| ElectionVote {
            term: Term(1),
            voter_id: AgentId::from(voter),
        };
        assert!(m.on_vote(&vote("B"), t0 + TIMEOUT, &alive).is_empty());
        let out = m.on_vote(&vote("C"), t0 + TIMEOUT, &alive);
        assert!(m.is_leader());
        assert!(out.iter().any(|o| matches!(o, ElectionOutput::BecameLeader { term, .. } if *term == Term(1))));
    }

    #[test]
    fn test_convergence_spans_repeated_candidacies() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        // Split vote: the first round times out and a second one starts.
        m.on_tick(t0 + TIMEOUT * 2, &alive, TIMEOUT);
        assert_eq!(m.term(), Term(2));

        let won_at = t0 + TIMEOUT * 2 + Duration::from_millis(50);
        let vote = ElectionVote {
            term: Term(2),
            voter_id: AgentId::from("B"),
        };
        let out = m.on_vote(&vote, won_at, &alive);
        assert!(out.contains(&ElectionOutput::BecameLeader {
            term: Term(2),
            convergence: Duration::from_millis(250),
        }));
    }

    #[test]
    fn test_heard_leader_clears_candidacy_start() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        m.on_heartbeat(&heartbeat(1, "B"), t0 + TIMEOUT, TIMEOUT);
        assert_eq!(m.state(), ElectionState::Follower);

        let restart = t0 + TIMEOUT + LEASE + TIMEOUT;
        m.on_tick(restart, &alive, TIMEOUT);
        assert_eq!(m.term(), Term(2));
        let vote = ElectionVote {
            term: Term(2),
            voter_id: AgentId::from("C"),
        };
        let out = m.on_vote(&vote, restart + Duration::from_millis(30), &alive);
        assert!(out.contains(&ElectionOutput::BecameLeader {
            term: Term(2),
            convergence: Duration::from_millis(30),
        }));
    }

    #[test]
    fn test_votes_from_dead_peers_do_not_count() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        m.on_vote(
            &ElectionVote {
                term: Term(1),
                voter_id: AgentId::from("Z"),
            },
            t0 + TIMEOUT,
            &alive,
        );
        assert_eq!(m.state(), ElectionState::Candidate);
    }

    #[test]
    fn test_follower_grants_one_vote_per_term() {
        let t0 = Instant::now();
        let mut m = machine("A", t0);
        let first = m.on_request_vote(&request(1, "B", 10), t0, TIMEOUT);
        assert!(first.iter().any(|o| matches!(o, ElectionOutput::Reply { .. })));
        let second = m.on_request_vote(&request(1, "C", 10), t0, TIMEOUT);
        assert!(second.is_empty());
        let again = m.on_request_vote(&request(1, "B", 10), t0, TIMEOUT);
        assert!(!again.is_empty());
    }

    #[test]
    fn test_lower_ranked_candidate_yields_to_higher() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        assert_eq!(m.state(), ElectionState::Candidate);

        let out = m.on_request_vote(&request(1, "B", 0), t0 + TIMEOUT, TIMEOUT);
        assert_eq!(m.state(), ElectionState::Follower);
        assert_eq!(m.voted_for(), Some(&AgentId::from("B")));
        assert!(out.iter().any(|o| matches!(o, ElectionOutput::Reply { to, .. } if to.as_str() == "B")));
    }

    #[test]
    fn test_higher_ranked_candidate_refuses_lower() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("C", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        let out = m.on_request_vote(&request(1, "B", 999_999), t0 + TIMEOUT, TIMEOUT);
        assert!(out.is_empty());
        assert_eq!(m.state(), ElectionState::Candidate);
    }

    #[test]
    fn test_stale_term_is_ignored() {
        let t0 = Instant::now();
        let mut m = machine("A", t0);
        m.on_heartbeat(&heartbeat(5, "B"), t0, TIMEOUT);
        assert_eq!(m.term(), Term(5));

        let (disposition, _) = m.on_heartbeat(&heartbeat(4, "C"), t0, TIMEOUT);
        assert_eq!(disposition, HeartbeatDisposition::Stale);
        assert_eq!(m.leader_id(), Some(&AgentId::from("B")));
        assert!(m.on_request_vote(&request(4, "C", 0), t0, TIMEOUT).is_empty());
    }

    #[test]
    fn test_heartbeat_refreshes_lease_and_expiry_triggers_election() {
        let t0 = Instant::now();
        let alive = ids(&["A", "B", "C"]);
        let mut m = machine("A", t0);
        m.on_heartbeat(&heartbeat(1, "B"), t0, TIMEOUT);
        assert!(m.lease_valid(t0 + Duration::from_secs(9)));
        assert!(m.on_tick(t0 + Duration::from_secs(9), &alive, TIMEOUT).is_empty());

        m.on_tick(t0 + LEASE + TIMEOUT, &alive, TIMEOUT);
        assert_eq!(m.state(), ElectionState::Candidate);
        assert_eq!(m.term(), Term(2));
    }

    #[test]
    fn test_leader_steps_down_on_higher_term() {
        let t0 = Instant::now();
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &ids(&["A"]), TIMEOUT);
        assert!(m.is_leader());

        let (disposition, out) = m.on_heartbeat(&heartbeat(3, "B"), t0 + TIMEOUT, TIMEOUT);
        assert_eq!(disposition, HeartbeatDisposition::Accepted);
        assert!(out.contains(&ElectionOutput::SteppedDown(Term(1))));
        assert_eq!(m.state(), ElectionState::Follower);
        assert_eq!(m.term(), Term(3));
    }

    #[test]
    fn test_same_term_leader_conflict_resolved_by_rank() {
        let t0 = Instant::now();
        let mut low = machine("A", t0);
        low.on_tick(t0 + TIMEOUT, &ids(&["A"]), TIMEOUT);
        let (_, out) = low.on_heartbeat(&heartbeat(1, "B"), t0 + TIMEOUT, TIMEOUT);
        assert!(out.contains(&ElectionOutput::SteppedDown(Term(1))));
        assert!(!low.is_leader());

        let mut high = machine("C", t0);
        high.on_tick(t0 + TIMEOUT, &ids(&["C"]), TIMEOUT);
        let (disposition, _) = high.on_heartbeat(&heartbeat(1, "B"), t0 + TIMEOUT, TIMEOUT);
        assert_eq!(disposition, HeartbeatDisposition::Ignored);
        assert!(high.is_leader());
    }

    #[test]
    fn test_leader_emits_periodic_heartbeats() {
        let t0 = Instant::now();
        let alive = ids(&["A"]);
        let mut m = machine("A", t0);
        m.on_tick(t0 + TIMEOUT, &alive, TIMEOUT);
        assert!(m.on_tick(t0 + TIMEOUT + Duration::from_millis(500), &alive, TIMEOUT).is_empty());
        let out = m.on_tick(t0 + TIMEOUT + HEARTBEAT, &alive, TIMEOUT);
        assert!(matches!(&out[0], ElectionOutput::Broadcast(CoordMessage::Heartbeat(h)) if h.term == Term(1)));
    }
}
