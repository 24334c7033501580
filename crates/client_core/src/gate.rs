use std::collections::HashMap;

use shared::domain::{ChatId, PendingImage};

use crate::classifier::Classification;

/// Non-idle gate states. A chat without an entry is `Idle`.
#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Classifying { image_ref: String },
    Flagged(PendingImage),
}

/// What the caller must do once classification has resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Send the image now; the gate is back to `Idle`.
    Forward(String),
    /// Hold the image until the user confirms or cancels.
    AwaitConfirmation(PendingImage),
}

#[derive(Debug, Default)]
pub struct SensitiveContentGate {
    states: HashMap<ChatId, GateState>,
}

impl SensitiveContentGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, chat_id: &ChatId) -> Option<&GateState> {
        self.states.get(chat_id)
    }

    pub fn is_idle(&self, chat_id: &ChatId) -> bool {
        !self.states.contains_key(chat_id)
    }

    /// `Idle -> Classifying`. Returns `false` when the chat is not idle.
    pub fn begin(&mut self, chat_id: &ChatId, image_ref: impl Into<String>) -> bool {
        if self.states.contains_key(chat_id) {
            return false;
        }
        self.states.insert(
            chat_id.clone(),
            GateState::Classifying {
                image_ref: image_ref.into(),
            },
        );
        true
    }

    /// `Classifying -> Clear | Flagged`. A failed classification is treated
    /// as clear. Returns `None` when the chat was not classifying.
    pub fn resolve(
        &mut self,
        chat_id: &ChatId,
        classification: Option<Classification>,
    ) -> Option<GateDecision> {
        let image_ref = match self.states.remove(chat_id)? {
            GateState::Classifying { image_ref } => image_ref,
            flagged @ GateState::Flagged(_) => {
                self.states.insert(chat_id.clone(), flagged);
                return None;
            }
        };

        match classification {
            Some(Classification {
                sensitive: true,
                regions,
            }) => {
                let pending = PendingImage {
                    image_ref,
                    regions,
                    sensitive: true,
                };
                self.states
                    .insert(chat_id.clone(), GateState::Flagged(pending.clone()));
                Some(GateDecision::AwaitConfirmation(pending))
            }
            _ => Some(GateDecision::Forward(image_ref)),
        }
    }

    pub fn pending(&self, chat_id: &ChatId) -> Option<&PendingImage> {
        match self.states.get(chat_id)? {
            GateState::Flagged(pending) => Some(pending),
            GateState::Classifying { .. } => None,
        }
    }

    /// Confirm: `Flagged -> Idle`, handing back the image to send.
    pub fn take_pending(&mut self, chat_id: &ChatId) -> Option<PendingImage> {
        if !matches!(self.states.get(chat_id), Some(GateState::Flagged(_))) {
            return None;
        }
        match self.states.remove(chat_id) {
            Some(GateState::Flagged(pending)) => Some(pending),
            _ => None,
        }
    }

    /// Cancel: `Flagged -> Idle` without a send.
    pub fn cancel(&mut self, chat_id: &ChatId) -> bool {
        self.take_pending(chat_id).is_some()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
#[path = "tests/gate_tests.rs"]
mod tests;
