//! Mode switching
//!
//! A mode switch can land at any point of a conversation. The coordinator
//! retires whatever is in flight (playback via the player's single-flight
//! guarantee, capture via the conversation interrupt), announces the new
//! mode, and then either resumes listening or returns to idle.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use companion_core::{ConversationMode, ConversationState, TranscriptEntry};

use crate::orchestrator::ConversationOrchestrator;

/// Static mode-switch announcement table.
static ANNOUNCEMENTS: Lazy<HashMap<ConversationMode, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            ConversationMode::Chat,
            "I'm back! What do you want to chat about?",
        ),
        (
            ConversationMode::Story,
            "Story mode activated! Should I tell you a fairy tale?",
        ),
        (
            ConversationMode::Learning,
            "Hi! We are in study mode now. What do you want to learn?",
        ),
        (
            ConversationMode::Game,
            "Game mode on! Let's play a game!",
        ),
    ])
});

/// Greeting spoken when switching into `mode`.
pub fn announcement_for(mode: ConversationMode) -> &'static str {
    ANNOUNCEMENTS.get(&mode).copied().unwrap_or("Switching modes!")
}

/// Coordinates mode switches against the running orchestrator.
pub struct ModeSwitchCoordinator {
    orchestrator: Arc<ConversationOrchestrator>,
}

impl ModeSwitchCoordinator {
    pub fn new(orchestrator: Arc<ConversationOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Switch to `mode`, announcing it aloud.
    ///
    /// Interrupts capture and playback first; afterwards the conversation
    /// resumes listening if it was active in continuous mode, otherwise the
    /// engine returns to idle. Switching to the mode that is already active
    /// is a no-op.
    pub async fn switch(&self, mode: ConversationMode) {
        let o = &self.orchestrator;

        if o.mode() == mode {
            tracing::debug!(%mode, "already in requested mode");
            return;
        }

        // Retire in-flight speech first so the announcement never overlaps
        // a half-spoken reply.
        o.player().cancel();
        let was_active = o.interrupt_conversation().await;
        let resume = was_active && o.continuous();

        o.set_mode(mode);

        let greeting = announcement_for(mode);
        // The transcript hears about the switch whether or not synthesis
        // succeeds.
        o.transcript()
            .append(TranscriptEntry::assistant(greeting, mode))
            .await;

        o.set_state(ConversationState::Speaking);
        o.player().speak(greeting, o.language()).await;

        if resume {
            self.orchestrator.resume();
        } else {
            o.set_state(ConversationState::Idle);
            o.send_energy_reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_has_an_announcement() {
        for mode in ConversationMode::all() {
            assert!(!announcement_for(mode).is_empty());
        }
    }

    #[test]
    fn announcements_are_distinct() {
        let texts: std::collections::HashSet<_> = ConversationMode::all()
            .into_iter()
            .map(announcement_for)
            .collect();
        assert_eq!(texts.len(), ConversationMode::all().len());
    }
}
