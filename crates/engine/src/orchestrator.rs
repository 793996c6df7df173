//! Conversation orchestrator
//!
//! The turn-taking state machine: Idle → Listening → Processing → Speaking,
//! looping while continuous mode is on. Each turn drives capture, voice
//! activity, transcription, dialogue, and playback strictly in order;
//! interruptions (stop button, mode switch) can arrive at any suspension
//! point and are observed through a per-conversation cancellation token.
//!
//! Mode and language are explicit orchestrator state passed into each stage
//! call, never read from ambient mutable cells by the stages themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use companion_config::constants::{phrases, timing};
use companion_config::Settings;
use companion_core::{
    AudioSource, ConversationMode, ConversationState, DialogueRequest, DialogueService, Language,
    SpeakerVerifier, TranscriptEntry, TranscriptSink, TranscriptionService, TurnResult,
    UtteranceResult,
};

use crate::capture::{AudioCaptureSession, CaptureConfig};
use crate::playback::SpeechSynthesisPlayer;
use crate::vad::{VadConfig, VadDecision, VoiceActivityMonitor};
use crate::EngineError;

/// Events broadcast to the UI layer (the engine's only outward surface).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The conversation state changed
    StateChanged(ConversationState),
    /// Current capture energy level in [0, 1]; 0.0 when capture stops
    Energy(f32),
    /// The active mode changed
    ModeChanged(ConversationMode),
    /// A full turn completed
    TurnCompleted(TurnResult),
    /// The configured speaker verifier rejected the utterance
    SpeakerRejected,
    /// A recoverable failure was handled
    Error(EngineError),
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub capture: CaptureConfig,
    pub vad: VadConfig,
    /// Delay before re-listening when capture saw no speech
    pub no_speech_retry: Duration,
    /// Delay before re-listening after a spoken reply or apology
    pub turn_retry: Duration,
    /// Greeting spoken when a conversation starts; `None` starts silently
    pub start_greeting: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            vad: VadConfig::default(),
            no_speech_retry: Duration::from_millis(timing::NO_SPEECH_RETRY_MS),
            turn_retry: Duration::from_millis(timing::TURN_RETRY_MS),
            start_greeting: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            capture: CaptureConfig::from_settings(&settings.audio),
            vad: VadConfig {
                silence_threshold: settings.audio.silence_threshold,
                silence_hold: Duration::from_millis(settings.audio.silence_hold_ms),
            },
            no_speech_retry: Duration::from_millis(settings.engine.no_speech_retry_ms),
            turn_retry: Duration::from_millis(settings.engine.turn_retry_ms),
            start_greeting: settings
                .companion
                .greet_on_start
                .then(|| settings.companion.start_greeting()),
        }
    }
}

/// How a turn ends, as seen by the conversation loop.
enum TurnFlow {
    /// Schedule the next turn after the given delay
    Continue(Duration),
    /// Leave the loop
    Stop,
}

struct ActiveConversation {
    id: u64,
    interrupt: CancellationToken,
    handle: JoinHandle<()>,
}

/// The turn-taking state machine.
pub struct ConversationOrchestrator {
    config: OrchestratorConfig,
    source: Arc<dyn AudioSource>,
    transcription: Arc<dyn TranscriptionService>,
    dialogue: Arc<dyn DialogueService>,
    player: Arc<SpeechSynthesisPlayer>,
    transcript: Arc<dyn TranscriptSink>,
    verifier: Option<Arc<dyn SpeakerVerifier>>,

    state: Mutex<ConversationState>,
    continuous: AtomicBool,
    mode: Mutex<ConversationMode>,
    language: Mutex<Language>,

    events: broadcast::Sender<EngineEvent>,
    conversation: Mutex<Option<ActiveConversation>>,
    conversation_ids: AtomicU64,
}

impl ConversationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        source: Arc<dyn AudioSource>,
        transcription: Arc<dyn TranscriptionService>,
        dialogue: Arc<dyn DialogueService>,
        player: Arc<SpeechSynthesisPlayer>,
        transcript: Arc<dyn TranscriptSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            source,
            transcription,
            dialogue,
            player,
            transcript,
            verifier: None,
            state: Mutex::new(ConversationState::Idle),
            continuous: AtomicBool::new(false),
            mode: Mutex::new(ConversationMode::default()),
            language: Mutex::new(Language::default()),
            events,
            conversation: Mutex::new(None),
            conversation_ids: AtomicU64::new(0),
        }
    }

    /// Gate each utterance through a speaker verifier before transcription.
    pub fn with_verifier(mut self, verifier: Arc<dyn SpeakerVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConversationState {
        *self.state.lock()
    }

    pub fn mode(&self) -> ConversationMode {
        *self.mode.lock()
    }

    pub fn language(&self) -> Language {
        *self.language.lock()
    }

    /// Whether a conversation loop is currently running.
    pub fn is_active(&self) -> bool {
        self.conversation.lock().is_some()
    }

    /// Whether hands-free looping is on.
    pub fn continuous(&self) -> bool {
        self.continuous.load(Ordering::SeqCst)
    }

    /// Start a hands-free conversation. A no-op when one is already running.
    pub fn start(self: &Arc<Self>) {
        self.continuous.store(true, Ordering::SeqCst);
        self.spawn_conversation(self.config.start_greeting.clone());
    }

    /// Stop everything: capture, playback, the loop, and continuous mode.
    pub async fn stop(&self) {
        self.continuous.store(false, Ordering::SeqCst);
        self.interrupt_conversation().await;
        self.set_state(ConversationState::Idle);
        let _ = self.events.send(EngineEvent::Energy(0.0));
        tracing::info!("conversation stopped");
    }

    /// Restart the listening loop without a greeting (mode-switch resume).
    pub(crate) fn resume(self: &Arc<Self>) {
        self.spawn_conversation(None);
    }

    fn spawn_conversation(self: &Arc<Self>, greeting: Option<String>) {
        let mut slot = self.conversation.lock();
        if slot.is_some() {
            tracing::debug!("conversation already active");
            return;
        }

        let id = self.conversation_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let interrupt = CancellationToken::new();
        let this = self.clone();
        let token = interrupt.clone();
        let handle = tokio::spawn(async move {
            this.run_conversation(token, id, greeting).await;
        });

        *slot = Some(ActiveConversation {
            id,
            interrupt,
            handle,
        });
        tracing::info!(conversation = id, "conversation started");
    }

    /// Cancel the running loop (if any) and wait for it to unwind; the
    /// capture session stops and the microphone is released before this
    /// returns. Leaves the continuous flag untouched.
    pub(crate) async fn interrupt_conversation(&self) -> bool {
        let active = self.conversation.lock().take();
        let Some(active) = active else {
            return false;
        };

        active.interrupt.cancel();
        self.player.cancel();
        if let Err(e) = active.handle.await {
            tracing::error!(error = %e, "conversation task failed");
        }
        tracing::debug!(conversation = active.id, "conversation interrupted");
        true
    }

    pub(crate) fn set_mode(&self, mode: ConversationMode) {
        *self.mode.lock() = mode;
        tracing::info!(%mode, "mode changed");
        let _ = self.events.send(EngineEvent::ModeChanged(mode));
    }

    pub(crate) fn set_state(&self, state: ConversationState) {
        let mut current = self.state.lock();
        if *current == state {
            return;
        }
        *current = state;
        drop(current);
        tracing::debug!(state = ?state, "state changed");
        let _ = self.events.send(EngineEvent::StateChanged(state));
    }

    pub(crate) fn player(&self) -> &Arc<SpeechSynthesisPlayer> {
        &self.player
    }

    pub(crate) fn transcript(&self) -> &Arc<dyn TranscriptSink> {
        &self.transcript
    }

    pub(crate) fn send_energy_reset(&self) {
        let _ = self.events.send(EngineEvent::Energy(0.0));
    }

    async fn run_conversation(
        self: Arc<Self>,
        interrupt: CancellationToken,
        id: u64,
        greeting: Option<String>,
    ) {
        if let Some(greeting) = greeting {
            if !interrupt.is_cancelled() {
                self.set_state(ConversationState::Speaking);
                self.transcript
                    .append(TranscriptEntry::assistant(&greeting, self.mode()))
                    .await;
                self.player.speak(&greeting, self.language()).await;
            }
        }

        loop {
            if !self.continuous() || interrupt.is_cancelled() {
                break;
            }

            let flow = match self.try_turn(&interrupt).await {
                Ok(flow) => flow,
                Err(err) => self.recover(err, self.language()).await,
            };

            match flow {
                TurnFlow::Continue(delay) => {
                    tokio::select! {
                        _ = interrupt.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                TurnFlow::Stop => break,
            }
        }

        // Release the slot if this loop still owns it; an interrupter that
        // already took it is responsible for the state that follows.
        let still_owned = {
            let mut slot = self.conversation.lock();
            if slot.as_ref().map(|c| c.id) == Some(id) {
                slot.take();
                true
            } else {
                false
            }
        };

        if still_owned && !interrupt.is_cancelled() {
            self.set_state(ConversationState::Idle);
            self.send_energy_reset();
        }
        tracing::info!(conversation = id, "conversation ended");
    }

    /// One turn: capture → end-point → (verify) → transcribe → dialogue →
    /// speak. Failures come back as [`EngineError`] for [`Self::recover`].
    async fn try_turn(&self, interrupt: &CancellationToken) -> Result<TurnFlow, EngineError> {
        self.set_state(ConversationState::Listening);

        let mut session =
            AudioCaptureSession::start(self.source.as_ref(), self.config.capture.clone()).await?;
        let mut monitor = VoiceActivityMonitor::new(self.config.vad.clone());

        let interrupted = loop {
            tokio::select! {
                _ = interrupt.cancelled() => break true,
                sample = session.next_energy() => match sample {
                    Some(sample) => {
                        let _ = self.events.send(EngineEvent::Energy(sample.level));
                        if monitor.observe(&sample) == VadDecision::EndOfUtterance {
                            break false;
                        }
                    }
                    // Max duration reached (or the device went away).
                    None => break false,
                }
            }
        };

        let captured = session.stop().await;
        self.send_energy_reset();

        if interrupted {
            tracing::debug!("capture interrupted, utterance discarded");
            return Ok(TurnFlow::Stop);
        }

        let Some(captured) = captured else {
            return Ok(TurnFlow::Stop);
        };
        let utterance = UtteranceResult {
            wav: captured.wav,
            duration: captured.duration,
            speech_detected: monitor.speech_detected(),
        };

        if !utterance.speech_detected {
            return Err(EngineError::NoSpeechDetected);
        }

        self.set_state(ConversationState::Processing);
        let mode = self.mode();
        let language = self.language();

        if let Some(verifier) = &self.verifier {
            let verdict = tokio::select! {
                _ = interrupt.cancelled() => return Ok(TurnFlow::Stop),
                verdict = verifier.verify(&utterance.wav) => verdict,
            };
            match verdict {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("speaker not recognized, discarding utterance");
                    let _ = self.events.send(EngineEvent::SpeakerRejected);
                    return Ok(self.continue_or_stop(self.config.no_speech_retry));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "speaker verification failed, continuing unverified");
                }
            }
        }

        let transcription = tokio::select! {
            _ = interrupt.cancelled() => return Ok(TurnFlow::Stop),
            result = self.transcription.transcribe(&utterance.wav, language) => result,
        };
        // The utterance is consumed exactly once; nothing below touches it.
        drop(utterance);

        let user_text = match transcription {
            Ok(t) if t.is_usable() => t.text,
            Ok(_) => {
                return Err(EngineError::Transcription(
                    companion_core::ServiceError::InvalidResponse(
                        "empty or unsuccessful transcription".to_string(),
                    ),
                ))
            }
            Err(e) => return Err(EngineError::Transcription(e)),
        };

        tracing::info!(text = %user_text, %mode, %language, "user turn transcribed");
        self.transcript
            .append(TranscriptEntry::user(&user_text, mode))
            .await;

        let reply = tokio::select! {
            _ = interrupt.cancelled() => return Ok(TurnFlow::Stop),
            result = self.dialogue.respond(DialogueRequest {
                text: user_text.clone(),
                mode,
                language,
            }) => result,
        };
        let reply = reply.map_err(EngineError::Dialogue)?;

        let language = match reply.language {
            Some(updated) if updated != language => {
                tracing::info!(language = %updated, "working language updated");
                *self.language.lock() = updated;
                updated
            }
            _ => language,
        };

        self.transcript
            .append(TranscriptEntry::assistant(&reply.text, mode))
            .await;
        let _ = self.events.send(EngineEvent::TurnCompleted(TurnResult {
            user_text,
            assistant_text: reply.text.clone(),
            language,
        }));

        self.set_state(ConversationState::Speaking);
        // Playback failure counts as finished; the player already logged it.
        self.player.speak(&reply.text, language).await;

        if interrupt.is_cancelled() {
            return Ok(TurnFlow::Stop);
        }
        Ok(self.continue_or_stop(self.config.turn_retry))
    }

    /// Handle a turn failure per the taxonomy; never propagates.
    async fn recover(&self, err: EngineError, language: Language) -> TurnFlow {
        match err {
            EngineError::CaptureUnavailable(_) => {
                tracing::error!(error = %err, "capture unavailable, leaving continuous mode");
                let _ = self.events.send(EngineEvent::Error(err));
                self.continuous.store(false, Ordering::SeqCst);
                self.set_state(ConversationState::Speaking);
                self.player
                    .speak(phrases::APOLOGY_NO_MICROPHONE, language)
                    .await;
                TurnFlow::Stop
            }
            EngineError::NoSpeechDetected => {
                tracing::debug!("no speech detected, re-listening silently");
                self.continue_or_stop(self.config.no_speech_retry)
            }
            EngineError::Transcription(_) => {
                tracing::warn!(error = %err, "transcription failed");
                let _ = self.events.send(EngineEvent::Error(err));
                self.apologize_then_continue(phrases::APOLOGY_UNHEARD, language)
                    .await
            }
            EngineError::Dialogue(_) => {
                tracing::warn!(error = %err, "dialogue failed");
                let _ = self.events.send(EngineEvent::Error(err));
                self.apologize_then_continue(phrases::APOLOGY_ERROR, language)
                    .await
            }
            // The player swallows these; a turn never surfaces them.
            EngineError::Synthesis(_) | EngineError::Playback(_) => {
                self.continue_or_stop(self.config.turn_retry)
            }
        }
    }

    async fn apologize_then_continue(&self, apology: &str, language: Language) -> TurnFlow {
        self.set_state(ConversationState::Speaking);
        self.player.speak(apology, language).await;
        self.continue_or_stop(self.config.turn_retry)
    }

    fn continue_or_stop(&self, delay: Duration) -> TurnFlow {
        if self.continuous() {
            TurnFlow::Continue(delay)
        } else {
            TurnFlow::Stop
        }
    }
}
