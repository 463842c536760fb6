//! Per-pair handshake state machine. No I/O.

use tandem_common::SignalingError;

use super::types::{ExchangeState, PairKey};
use crate::protocol::{IceCandidate, Role};

#[derive(Debug)]
pub struct Exchange {
    pair: PairKey,
    local_role: Role,
    peer_id: String,
    state: ExchangeState,
    generation: u64,
    offers_seen: u32,
    answers_seen: u32,
    remote_applied: bool,
    buffered: Vec<IceCandidate>,
}

impl Exchange {
    pub fn new(local_role: Role, local_id: &str, peer_id: &str) -> Self {
        Self {
            pair: PairKey::new(local_role, local_id, peer_id),
            local_role,
            peer_id: peer_id.to_string(),
            state: ExchangeState::Idle,
            generation: 0,
            offers_seen: 0,
            answers_seen: 0,
            remote_applied: false,
            buffered: Vec::new(),
        }
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    fn out_of_order(&self, message: &str) -> SignalingError {
        SignalingError::OutOfOrder {
            peer: self.peer_id.clone(),
            message: message.to_string(),
            state: self.state.to_string(),
        }
    }

    fn require_role(&self, role: Role, message: &str) -> Result<(), SignalingError> {
        if self.local_role == role {
            Ok(())
        } else {
            Err(SignalingError::RoleViolation(format!(
                "{} cannot handle {message} from {}",
                self.local_role, self.peer_id
            )))
        }
    }

    fn advance(&mut self, from: ExchangeState, to: ExchangeState, message: &str) -> Result<(), SignalingError> {
        if self.state != from || to.rank() <= self.state.rank() {
            return Err(self.out_of_order(message));
        }
        self.state = to;
        Ok(())
    }

    /// Guest created its offer.
    pub fn on_local_offer(&mut self) -> Result<(), SignalingError> {
        self.require_role(Role::Guest, "local offer")?;
        self.advance(ExchangeState::Idle, ExchangeState::OfferCreated, "local offer")?;
        self.offers_seen += 1;
        Ok(())
    }

    /// Host accepted the guest's offer. Applying it as the remote description
    /// is the caller's job, followed by [`mark_remote_applied`](Self::mark_remote_applied).
    pub fn on_remote_offer(&mut self) -> Result<(), SignalingError> {
        self.require_role(Role::Host, "offer")?;
        self.advance(ExchangeState::Idle, ExchangeState::OfferCreated, "offer")?;
        self.offers_seen += 1;
        Ok(())
    }

    pub fn on_local_answer(&mut self) -> Result<(), SignalingError> {
        self.require_role(Role::Host, "local answer")?;
        self.advance(ExchangeState::OfferCreated, ExchangeState::AnswerSent, "local answer")?;
        self.answers_seen += 1;
        Ok(())
    }

    pub fn on_remote_answer(&mut self) -> Result<(), SignalingError> {
        self.require_role(Role::Guest, "answer")?;
        self.advance(ExchangeState::OfferCreated, ExchangeState::AnswerReceived, "answer")?;
        self.answers_seen += 1;
        Ok(())
    }

    pub fn on_connected(&mut self) -> Result<(), SignalingError> {
        if self.offers_seen != 1 || self.answers_seen != 1 {
            return Err(self.out_of_order("connected"));
        }
        let from = match self.local_role {
            Role::Host => ExchangeState::AnswerSent,
            Role::Guest => ExchangeState::AnswerReceived,
        };
        self.advance(from, ExchangeState::Connected, "connected")
    }

    pub fn close(&mut self) {
        self.state = ExchangeState::Closed;
        self.buffered.clear();
    }

    /// Start over under a new generation.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = ExchangeState::Idle;
        self.offers_seen = 0;
        self.answers_seen = 0;
        self.remote_applied = false;
        self.buffered.clear();
    }

    /// Returns the candidate if it can be applied now, otherwise keeps it
    /// until the remote description lands.
    pub fn accept_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_applied {
            Some(candidate)
        } else {
            self.buffered.push(candidate);
            None
        }
    }

    /// Record that the remote description is applied and release buffered
    /// candidates in arrival order.
    pub fn mark_remote_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_applied = true;
        std::mem::take(&mut self.buffered)
    }
}
