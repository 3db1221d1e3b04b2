//! Distributed commit coordination.
//!
//! When a multi-statement transaction spans shards, one node coordinates
//! the two-phase commit across the participants. The coordinator is a
//! small state machine driven by events (participant list received,
//! votes, acks) and emitting actions (send commit, send abort) for the
//! networking layer to carry out.
//!
//! Illegal transitions put the machine into [`CoordinatorState::Broken`]:
//! either a byzantine message arrived, or the transition table does not
//! reflect the asynchronous network faithfully. A broken coordinator
//! refuses all further events.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use docket_core::{ShardId, Timestamp};
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors from commit coordination.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// A vote arrived from a shard outside the participant list.
    #[error("shard {shard_id} is not a participant in this transaction")]
    UnknownParticipant {
        /// The voting shard.
        shard_id: ShardId,
    },

    /// The participant list omits a shard the coordinator has already
    /// heard a vote from.
    #[error("participant list omits shard {shard_id}, which has already voted")]
    ListMismatch {
        /// The already-voting shard missing from the list.
        shard_id: ShardId,
    },
}

/// Where the coordinator is in the two-phase commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the full participant list from the router.
    WaitingForParticipantList,
    /// Waiting for every participant's prepare vote.
    WaitingForVotes,
    /// The transaction aborted.
    Aborted,
    /// Commit decided; waiting for every participant's commit ack.
    WaitingForCommitAcks,
    /// The transaction committed everywhere.
    Committed,
    /// An illegal event arrived; the machine refuses further input.
    Broken,
}

/// What the caller must do after feeding an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Nothing to send.
    None,
    /// Send the commit decision to all participants.
    SendCommit,
    /// Send the abort decision to all participants.
    SendAbort,
}

/// State machine inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    RecvParticipantList,
    RecvVoteCommit,
    RecvVoteAbort,
    RecvFinalVoteCommit,
    RecvFinalCommitAck,
    RecvTryAbort,
}

/// The transition table. `None` means the event is illegal in that state
/// and breaks the machine.
const fn transition(
    state: CoordinatorState,
    event: Event,
) -> Option<(CoordinatorAction, CoordinatorState)> {
    use CoordinatorAction::{None as NoAction, SendAbort, SendCommit};
    use CoordinatorState::{
        Aborted, Committed, WaitingForCommitAcks, WaitingForParticipantList, WaitingForVotes,
    };

    match (state, event) {
        // Votes may race ahead of the participant list.
        (WaitingForParticipantList, Event::RecvParticipantList) => {
            Some((NoAction, WaitingForVotes))
        }
        (WaitingForParticipantList, Event::RecvVoteCommit) => {
            Some((NoAction, WaitingForParticipantList))
        }
        (WaitingForParticipantList | WaitingForVotes, Event::RecvVoteAbort | Event::RecvTryAbort) => {
            Some((SendAbort, Aborted))
        }

        (WaitingForVotes, Event::RecvVoteCommit | Event::RecvParticipantList) => {
            Some((NoAction, WaitingForVotes))
        }
        (WaitingForVotes, Event::RecvFinalVoteCommit) => Some((SendCommit, WaitingForCommitAcks)),

        // Late or duplicate votes after the decision are harmless.
        (Aborted, Event::RecvVoteAbort | Event::RecvVoteCommit | Event::RecvTryAbort) => {
            Some((NoAction, Aborted))
        }
        (WaitingForCommitAcks, Event::RecvVoteCommit | Event::RecvTryAbort) => {
            Some((NoAction, WaitingForCommitAcks))
        }
        (WaitingForCommitAcks, Event::RecvFinalCommitAck) => Some((NoAction, Committed)),
        (Committed, Event::RecvTryAbort) => Some((NoAction, Committed)),

        _ => None,
    }
}

/// Per-participant bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Participant {
    vote: Vote,
    acked_commit: bool,
    prepare_timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Vote {
    #[default]
    Unknown,
    Commit,
    Abort,
}

#[derive(Debug, Default)]
struct ParticipantList {
    full_list_received: bool,
    participants: BTreeMap<ShardId, Participant>,
}

impl ParticipantList {
    /// Records the authoritative list. Shards heard from early must all
    /// be on it.
    fn record_full_list(&mut self, shards: &BTreeSet<ShardId>) -> CoordinatorResult<()> {
        for known in self.participants.keys() {
            if !shards.contains(known) {
                return Err(CoordinatorError::ListMismatch { shard_id: *known });
            }
        }
        for shard_id in shards {
            self.participants.entry(*shard_id).or_default();
        }
        self.full_list_received = true;
        Ok(())
    }

    fn record_vote_commit(
        &mut self,
        shard_id: ShardId,
        prepare_timestamp: Timestamp,
    ) -> CoordinatorResult<()> {
        let participant = self.participant_for_vote(shard_id)?;
        participant.vote = Vote::Commit;
        participant.prepare_timestamp = Some(prepare_timestamp);
        Ok(())
    }

    fn record_vote_abort(&mut self, shard_id: ShardId) -> CoordinatorResult<()> {
        let participant = self.participant_for_vote(shard_id)?;
        participant.vote = Vote::Abort;
        Ok(())
    }

    fn record_commit_ack(&mut self, shard_id: ShardId) -> CoordinatorResult<()> {
        match self.participants.get_mut(&shard_id) {
            Some(participant) => {
                participant.acked_commit = true;
                Ok(())
            }
            None => Err(CoordinatorError::UnknownParticipant { shard_id }),
        }
    }

    /// Before the full list arrives, votes register the shard; after it,
    /// unknown shards are rejected.
    fn participant_for_vote(&mut self, shard_id: ShardId) -> CoordinatorResult<&mut Participant> {
        if self.full_list_received && !self.participants.contains_key(&shard_id) {
            return Err(CoordinatorError::UnknownParticipant { shard_id });
        }
        Ok(self.participants.entry(shard_id).or_default())
    }

    fn all_voted_commit(&self) -> bool {
        self.full_list_received
            && self.participants.values().all(|p| p.vote == Vote::Commit)
    }

    fn all_acked_commit(&self) -> bool {
        self.full_list_received && self.participants.values().all(|p| p.acked_commit)
    }

    fn highest_prepare_timestamp(&self) -> Option<Timestamp> {
        self.participants
            .values()
            .filter_map(|p| p.prepare_timestamp)
            .max()
    }

    fn non_acked_commit_participants(&self) -> BTreeSet<ShardId> {
        self.participants
            .iter()
            .filter(|(_, p)| !p.acked_commit)
            .map(|(shard_id, _)| *shard_id)
            .collect()
    }

    fn non_voted_participants(&self) -> BTreeSet<ShardId> {
        self.participants
            .iter()
            .filter(|(_, p)| p.vote == Vote::Unknown)
            .map(|(shard_id, _)| *shard_id)
            .collect()
    }
}

/// Coordinates a two-phase commit across the transaction's participants.
#[derive(Debug, Default)]
pub struct CommitCoordinator {
    inner: Mutex<CoordinatorInner>,
}

#[derive(Debug)]
struct CoordinatorInner {
    state: CoordinatorState,
    participants: ParticipantList,
}

impl Default for CoordinatorInner {
    fn default() -> Self {
        Self {
            state: CoordinatorState::WaitingForParticipantList,
            participants: ParticipantList::default(),
        }
    }
}

impl CommitCoordinator {
    /// Creates a coordinator waiting for its participant list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the coordinator's current state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.lock().state
    }

    /// Returns the commit timestamp: the highest prepare timestamp among
    /// the participants.
    #[must_use]
    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        self.lock().participants.highest_prepare_timestamp()
    }

    /// Returns the participants that have not acked the commit decision.
    #[must_use]
    pub fn non_acked_commit_participants(&self) -> BTreeSet<ShardId> {
        self.lock().participants.non_acked_commit_participants()
    }

    /// Returns the participants that have not voted yet.
    #[must_use]
    pub fn non_voted_participants(&self) -> BTreeSet<ShardId> {
        self.lock().participants.non_voted_participants()
    }

    /// Receives the full participant list this node coordinates.
    ///
    /// If every participant already voted commit, the commit decision
    /// falls out immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::ListMismatch`] if the list omits a
    /// shard the coordinator has already heard a vote from.
    pub fn recv_coordinate_commit(
        &self,
        participants: &BTreeSet<ShardId>,
    ) -> CoordinatorResult<CoordinatorAction> {
        let mut inner = self.lock();
        inner.participants.record_full_list(participants)?;
        let action = inner.on_event(Event::RecvParticipantList);
        if action != CoordinatorAction::None {
            return Ok(action);
        }
        Ok(inner.maybe_decide_commit())
    }

    /// Receives a participant's vote to commit, with the timestamp at
    /// which it prepared the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownParticipant`] if the full
    /// participant list has been received and the shard is not on it.
    pub fn recv_vote_commit(
        &self,
        shard_id: ShardId,
        prepare_timestamp: Timestamp,
    ) -> CoordinatorResult<CoordinatorAction> {
        let mut inner = self.lock();
        inner
            .participants
            .record_vote_commit(shard_id, prepare_timestamp)?;
        let action = inner.on_event(Event::RecvVoteCommit);
        if action != CoordinatorAction::None {
            return Ok(action);
        }
        Ok(inner.maybe_decide_commit())
    }

    /// Receives a participant's vote to abort.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownParticipant`] if the full
    /// participant list has been received and the shard is not on it.
    pub fn recv_vote_abort(&self, shard_id: ShardId) -> CoordinatorResult<CoordinatorAction> {
        let mut inner = self.lock();
        inner.participants.record_vote_abort(shard_id)?;
        Ok(inner.on_event(Event::RecvVoteAbort))
    }

    /// Receives an implicit abort: a newer transaction arrived for the
    /// same session.
    pub fn recv_try_abort(&self) -> CoordinatorAction {
        self.lock().on_event(Event::RecvTryAbort)
    }

    /// Marks a participant as having acknowledged the commit decision.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::UnknownParticipant`] if the shard is
    /// not a participant.
    pub fn recv_commit_ack(&self, shard_id: ShardId) -> CoordinatorResult<CoordinatorAction> {
        let mut inner = self.lock();
        inner.participants.record_commit_ack(shard_id)?;
        if inner.participants.all_acked_commit() {
            return Ok(inner.on_event(Event::RecvFinalCommitAck));
        }
        Ok(CoordinatorAction::None)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorInner> {
        self.inner.lock().expect("coordinator state poisoned")
    }
}

impl CoordinatorInner {
    fn on_event(&mut self, event: Event) -> CoordinatorAction {
        match transition(self.state, event) {
            Some((action, next)) => {
                self.state = next;
                action
            }
            None => {
                self.state = CoordinatorState::Broken;
                CoordinatorAction::None
            }
        }
    }

    /// Fires the commit decision once the list is in and every vote is
    /// a commit.
    fn maybe_decide_commit(&mut self) -> CoordinatorAction {
        if self.state == CoordinatorState::WaitingForVotes && self.participants.all_voted_commit() {
            return self.on_event(Event::RecvFinalVoteCommit);
        }
        CoordinatorAction::None
    }
}
