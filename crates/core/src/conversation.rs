//! Conversation data model
//!
//! States, modes, languages and the per-turn records shared between the
//! engine and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine activity, owned exclusively by the orchestrator.
///
/// Exactly one value at a time; transitions are the only way callers
/// discover what the engine is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

/// Conversation mode, passed through to the dialogue service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Chat,
    Story,
    Learning,
    Game,
}

impl ConversationMode {
    /// Wire code used by the dialogue service.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::Chat => "chat",
            ConversationMode::Story => "story",
            ConversationMode::Learning => "learning",
            ConversationMode::Game => "game",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(ConversationMode::Chat),
            "story" => Some(ConversationMode::Story),
            "learning" => Some(ConversationMode::Learning),
            "game" => Some(ConversationMode::Game),
            _ => None,
        }
    }

    /// All modes, in presentation order.
    pub fn all() -> [ConversationMode; 4] {
        [
            ConversationMode::Chat,
            ConversationMode::Story,
            ConversationMode::Learning,
            ConversationMode::Game,
        ]
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session working language.
///
/// Sticky: the orchestrator keeps the last value reported by the dialogue
/// service and passes it into every transcription and dialogue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Language {
    #[default]
    English,
    Chinese,
    Spanish,
    Japanese,
}

impl Language {
    /// ISO 639-1 code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Chinese => "zh",
            Language::Spanish => "es",
            Language::Japanese => "ja",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::English),
            "zh" => Some(Language::Chinese),
            "es" => Some(Language::Spanish),
            "ja" => Some(Language::Japanese),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One completed conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub user_text: String,
    pub assistant_text: String,
    /// Working language after this turn (updated if the dialogue service
    /// reported a change)
    pub language: Language,
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// The unit appended to the external transcript store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub mode: ConversationMode,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>, mode: ConversationMode) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, mode: ConversationMode) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            mode,
            timestamp: Utc::now(),
        }
    }
}
