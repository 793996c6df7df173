//! Integration tests for the conversation turn pipeline
//!
//! Drives the full engine (capture -> VAD -> transcription -> dialogue ->
//! playback) against scripted fakes under paused virtual time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, timeout};
use tokio_util::sync::CancellationToken;

use companion_config::constants::phrases;
use companion_core::{
    AudioFrame, AudioOutput, AudioSource, CaptureError, CaptureStream, ConversationMode,
    ConversationState, DialogueReply, DialogueRequest, DialogueService, Language, PlaybackError,
    ServiceError, SpeakerVerifier, SpeechSynthesizer, TranscriptEntry, TranscriptSink,
    Transcription, TranscriptionService, Speaker,
};
use companion_engine::{
    announcement_for, CaptureConfig, ConversationOrchestrator, EngineEvent, ModeSwitchCoordinator,
    OrchestratorConfig, SpeechSynthesisPlayer, VadConfig,
};

// ---------------------------------------------------------------------------
// Scripted fakes
// ---------------------------------------------------------------------------

/// Deterministic broadband noise in [-amplitude, amplitude].
fn noise(amplitude: f32, len: usize) -> Vec<f32> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let unit = (state >> 8) as f32 / ((u32::MAX >> 8) as f32);
            (unit * 2.0 - 1.0) * amplitude
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Burst {
    amplitude: f32,
    millis: u64,
}

/// One 600 ms burst of clearly-audible noise.
fn speech_script() -> Vec<Burst> {
    vec![Burst {
        amplitude: 0.3,
        millis: 600,
    }]
}

/// Microphone that plays one script per acquisition (20 ms frames), then
/// emits dead silence until released.
struct ScriptedMicrophone {
    scripts: Mutex<VecDeque<Vec<Burst>>>,
    acquisitions: AtomicUsize,
    releases: Arc<AtomicUsize>,
    unavailable: bool,
}

impl ScriptedMicrophone {
    fn new(scripts: Vec<Vec<Burst>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            acquisitions: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            unavailable: false,
        }
    }

    fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Vec::new())
        }
    }

    fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSource for ScriptedMicrophone {
    async fn acquire(&self) -> Result<CaptureStream, CaptureError> {
        if self.unavailable {
            return Err(CaptureError::PermissionDenied);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let script = self.scripts.lock().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut sequence = 0u64;
            for burst in script {
                for _ in 0..burst.millis / 20 {
                    let frame = AudioFrame::new(noise(burst.amplitude, 320), sequence);
                    sequence += 1;
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                    time::sleep(Duration::from_millis(20)).await;
                }
            }
            loop {
                let frame = AudioFrame::new(vec![0.0; 320], sequence);
                sequence += 1;
                if tx.send(frame).await.is_err() {
                    return;
                }
                time::sleep(Duration::from_millis(20)).await;
            }
        });

        let releases = self.releases.clone();
        Ok(CaptureStream::new(rx, move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Transcription fake: scripted results, then "hello" forever. Records the
/// language hint of every call.
struct FakeTranscription {
    script: Mutex<VecDeque<Result<Transcription, ServiceError>>>,
    languages: Mutex<Vec<Language>>,
}

impl FakeTranscription {
    fn new(script: Vec<Result<Transcription, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            languages: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.languages.lock().len()
    }

    fn languages(&self) -> Vec<Language> {
        self.languages.lock().clone()
    }
}

#[async_trait]
impl TranscriptionService for FakeTranscription {
    async fn transcribe(
        &self,
        _wav: &[u8],
        language: Language,
    ) -> Result<Transcription, ServiceError> {
        self.languages.lock().push(language);
        self.script.lock().pop_front().unwrap_or_else(|| {
            Ok(Transcription {
                text: "hello".to_string(),
                success: true,
            })
        })
    }
}

/// Dialogue fake: scripted replies, then "hi there" forever. Records every
/// request.
struct FakeDialogue {
    script: Mutex<VecDeque<Result<DialogueReply, ServiceError>>>,
    requests: Mutex<Vec<DialogueRequest>>,
}

impl FakeDialogue {
    fn new(script: Vec<Result<DialogueReply, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<DialogueRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DialogueService for FakeDialogue {
    async fn respond(&self, request: DialogueRequest) -> Result<DialogueReply, ServiceError> {
        self.requests.lock().push(request);
        self.script.lock().pop_front().unwrap_or_else(|| {
            Ok(DialogueReply {
                text: "hi there".to_string(),
                language: None,
            })
        })
    }
}

/// Synthesizer that returns the text itself as audio bytes.
struct EchoSynth;

#[async_trait]
impl SpeechSynthesizer for EchoSynth {
    async fn synthesize(&self, text: &str, _language: Language) -> Result<Vec<u8>, ServiceError> {
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone)]
struct Play {
    text: String,
    completed: bool,
}

/// Speaker that records every play; each play lasts `duration` unless
/// cancelled.
struct RecordingSpeaker {
    plays: Mutex<Vec<Play>>,
    duration: Duration,
}

impl RecordingSpeaker {
    fn new(duration: Duration) -> Self {
        Self {
            plays: Mutex::new(Vec::new()),
            duration,
        }
    }

    fn plays(&self) -> Vec<Play> {
        self.plays.lock().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.plays.lock().iter().map(|p| p.text.clone()).collect()
    }

    fn spoke(&self, text: &str) -> bool {
        self.plays.lock().iter().any(|p| p.text == text)
    }

    fn completed(&self, text: &str) -> bool {
        self.plays.lock().iter().any(|p| p.text == text && p.completed)
    }
}

#[async_trait]
impl AudioOutput for RecordingSpeaker {
    async fn play(&self, audio: Vec<u8>, cancel: CancellationToken) -> Result<(), PlaybackError> {
        let index = {
            let mut plays = self.plays.lock();
            plays.push(Play {
                text: String::from_utf8_lossy(&audio).into_owned(),
                completed: false,
            });
            plays.len() - 1
        };

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = time::sleep(self.duration) => {
                self.plays.lock()[index].completed = true;
            }
        }
        Ok(())
    }
}

/// Append-only transcript fake.
#[derive(Default)]
struct VecTranscript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl VecTranscript {
    fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl TranscriptSink for VecTranscript {
    async fn append(&self, entry: TranscriptEntry) {
        self.entries.lock().push(entry);
    }
}

/// Verifier fake: scripted verdicts, then `true` forever.
struct FakeVerifier {
    script: Mutex<VecDeque<bool>>,
}

#[async_trait]
impl SpeakerVerifier for FakeVerifier {
    async fn verify(&self, _wav: &[u8]) -> Result<bool, ServiceError> {
        Ok(self.script.lock().pop_front().unwrap_or(true))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: Arc<ConversationOrchestrator>,
    coordinator: ModeSwitchCoordinator,
    mic: Arc<ScriptedMicrophone>,
    transcription: Arc<FakeTranscription>,
    dialogue: Arc<FakeDialogue>,
    speaker: Arc<RecordingSpeaker>,
    transcript: Arc<VecTranscript>,
    events: broadcast::Receiver<EngineEvent>,
}

struct HarnessOptions {
    mic_scripts: Vec<Vec<Burst>>,
    mic_unavailable: bool,
    transcription_script: Vec<Result<Transcription, ServiceError>>,
    dialogue_script: Vec<Result<DialogueReply, ServiceError>>,
    play_duration: Duration,
    max_capture: Duration,
    start_greeting: Option<String>,
    verifier_script: Option<Vec<bool>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            mic_scripts: vec![speech_script()],
            mic_unavailable: false,
            transcription_script: Vec::new(),
            dialogue_script: Vec::new(),
            play_duration: Duration::from_millis(100),
            max_capture: Duration::from_secs(3),
            start_greeting: None,
            verifier_script: None,
        }
    }
}

fn build(options: HarnessOptions) -> Harness {
    let mic = Arc::new(if options.mic_unavailable {
        ScriptedMicrophone::unavailable()
    } else {
        ScriptedMicrophone::new(options.mic_scripts)
    });
    let transcription = Arc::new(FakeTranscription::new(options.transcription_script));
    let dialogue = Arc::new(FakeDialogue::new(options.dialogue_script));
    let speaker = Arc::new(RecordingSpeaker::new(options.play_duration));
    let transcript = Arc::new(VecTranscript::default());

    let player = Arc::new(SpeechSynthesisPlayer::new(
        Arc::new(EchoSynth),
        speaker.clone(),
        true,
    ));

    let config = OrchestratorConfig {
        capture: CaptureConfig {
            max_duration: options.max_capture,
            ..Default::default()
        },
        vad: VadConfig::default(),
        no_speech_retry: Duration::from_millis(300),
        turn_retry: Duration::from_millis(500),
        start_greeting: options.start_greeting,
    };

    let mut orchestrator = ConversationOrchestrator::new(
        config,
        mic.clone(),
        transcription.clone(),
        dialogue.clone(),
        player,
        transcript.clone(),
    );
    if let Some(script) = options.verifier_script {
        orchestrator = orchestrator.with_verifier(Arc::new(FakeVerifier {
            script: Mutex::new(script.into()),
        }));
    }
    let orchestrator = Arc::new(orchestrator);

    Harness {
        coordinator: ModeSwitchCoordinator::new(orchestrator.clone()),
        events: orchestrator.subscribe(),
        orchestrator,
        mic,
        transcription,
        dialogue,
        speaker,
        transcript,
    }
}

/// Wait (in virtual time) until an event matching the predicate arrives.
async fn wait_for_event(
    rx: &mut broadcast::Receiver<EngineEvent>,
    mut predicate: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    timeout(Duration::from_secs(120), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait (in virtual time) until a condition holds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(120), async {
        while !condition() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// A spoken utterance flows through transcription and dialogue, the reply is
/// played, and the transcript records both sides of the turn.
#[tokio::test(start_paused = true)]
async fn full_turn_reaches_speaking_and_records_transcript() {
    let mut h = build(HarnessOptions::default());

    h.orchestrator.start();

    let event = wait_for_event(&mut h.events, |e| matches!(e, EngineEvent::TurnCompleted(_))).await;
    let EngineEvent::TurnCompleted(turn) = event else {
        unreachable!()
    };
    assert_eq!(turn.user_text, "hello");
    assert_eq!(turn.assistant_text, "hi there");
    assert_eq!(turn.language, Language::English);

    let speaker = h.speaker.clone();
    eventually(move || speaker.completed("hi there")).await;

    h.orchestrator.stop().await;
    assert_eq!(h.orchestrator.state(), ConversationState::Idle);

    let entries = h.transcript.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].speaker, Speaker::User);
    assert_eq!(entries[0].text, "hello");
    assert_eq!(entries[1].speaker, Speaker::Assistant);
    assert_eq!(entries[1].text, "hi there");

    let requests = h.dialogue.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, ConversationMode::Chat);
    assert_eq!(requests[0].language, Language::English);
}

/// A failed transcription speaks the "couldn't hear" apology and capture
/// restarts automatically; the dialogue service is never called.
#[tokio::test(start_paused = true)]
async fn transcription_failure_apologizes_then_relistens() {
    let h = build(HarnessOptions {
        transcription_script: vec![Ok(Transcription {
            text: String::new(),
            success: false,
        })],
        ..Default::default()
    });

    h.orchestrator.start();

    let speaker = h.speaker.clone();
    eventually(move || speaker.spoke(phrases::APOLOGY_UNHEARD)).await;

    let mic = h.mic.clone();
    eventually(move || mic.acquisitions() >= 2).await;

    assert!(h.dialogue.requests().is_empty());
    h.orchestrator.stop().await;
}

/// A dialogue failure speaks the generic apology and the loop continues.
#[tokio::test(start_paused = true)]
async fn dialogue_failure_apologizes_then_relistens() {
    let h = build(HarnessOptions {
        dialogue_script: vec![Err(ServiceError::Http("connection refused".into()))],
        ..Default::default()
    });

    h.orchestrator.start();

    let speaker = h.speaker.clone();
    eventually(move || speaker.spoke(phrases::APOLOGY_ERROR)).await;

    let mic = h.mic.clone();
    eventually(move || mic.acquisitions() >= 2).await;

    h.orchestrator.stop().await;
}

/// Stop during Listening releases the microphone immediately and never
/// transcribes the in-progress utterance.
#[tokio::test(start_paused = true)]
async fn stop_while_listening_releases_microphone_without_transcribing() {
    let mut h = build(HarnessOptions {
        mic_scripts: vec![Vec::new()],
        ..Default::default()
    });

    h.orchestrator.start();
    wait_for_event(&mut h.events, |e| {
        matches!(e, EngineEvent::StateChanged(ConversationState::Listening))
    })
    .await;

    h.orchestrator.stop().await;

    assert_eq!(h.orchestrator.state(), ConversationState::Idle);
    assert_eq!(h.transcription.call_count(), 0);
    assert_eq!(h.mic.releases(), h.mic.acquisitions());
    assert!(!h.orchestrator.is_active());
}

/// Silence-only captures retry silently: no apology, no transcription call.
#[tokio::test(start_paused = true)]
async fn silent_capture_retries_without_apology() {
    let h = build(HarnessOptions {
        mic_scripts: Vec::new(),
        max_capture: Duration::from_secs(1),
        ..Default::default()
    });

    h.orchestrator.start();

    let mic = h.mic.clone();
    eventually(move || mic.acquisitions() >= 3).await;

    assert_eq!(h.transcription.call_count(), 0);
    assert!(h.speaker.texts().is_empty());
    h.orchestrator.stop().await;
}

/// Capture never outlives the configured ceiling even when energy stays
/// above the threshold the whole time (VAD never end-points).
#[tokio::test(start_paused = true)]
async fn capture_is_bounded_by_max_duration() {
    let h = build(HarnessOptions {
        // Continuous loud noise for far longer than the 2 s ceiling.
        mic_scripts: vec![vec![Burst {
            amplitude: 0.3,
            millis: 60_000,
        }]],
        max_capture: Duration::from_secs(2),
        ..Default::default()
    });

    h.orchestrator.start();

    // The ceiling forces the turn onward: transcription gets called even
    // though the VAD never saw trailing silence.
    let transcription = h.transcription.clone();
    eventually(move || transcription.call_count() >= 1).await;

    h.orchestrator.stop().await;
}

/// A language reported by the dialogue service becomes the working language
/// of the next transcription and dialogue calls.
#[tokio::test(start_paused = true)]
async fn dialogue_language_update_sticks_for_next_turn() {
    let h = build(HarnessOptions {
        mic_scripts: vec![speech_script(), speech_script()],
        dialogue_script: vec![Ok(DialogueReply {
            text: "hola".to_string(),
            language: Some(Language::Spanish),
        })],
        ..Default::default()
    });

    h.orchestrator.start();

    let dialogue = h.dialogue.clone();
    eventually(move || dialogue.requests().len() >= 2).await;
    h.orchestrator.stop().await;

    let requests = h.dialogue.requests();
    assert_eq!(requests[0].language, Language::English);
    assert_eq!(requests[1].language, Language::Spanish);

    let languages = h.transcription.languages();
    assert_eq!(languages[0], Language::English);
    assert_eq!(languages[1], Language::Spanish);
}

/// A mode switch during Speaking cancels the reply mid-play, announces the
/// new mode to completion, and resumes listening in continuous mode.
#[tokio::test(start_paused = true)]
async fn mode_switch_while_speaking_cancels_and_resumes() {
    let h = build(HarnessOptions {
        mic_scripts: vec![speech_script(), Vec::new()],
        play_duration: Duration::from_secs(10),
        ..Default::default()
    });

    h.orchestrator.start();

    let speaker = h.speaker.clone();
    eventually(move || speaker.spoke("hi there")).await;

    let acquisitions_before = h.mic.acquisitions();
    h.coordinator.switch(ConversationMode::Story).await;

    assert_eq!(h.orchestrator.mode(), ConversationMode::Story);

    let greeting = announcement_for(ConversationMode::Story);
    assert!(h.speaker.spoke(greeting));

    // The interrupted reply never finished; the greeting did.
    let plays = h.speaker.plays();
    let reply = plays.iter().find(|p| p.text == "hi there").unwrap();
    assert!(!reply.completed, "reply should have been cut off");
    let speaker = h.speaker.clone();
    eventually(move || speaker.completed(greeting)).await;

    // Continuous mode was on, so listening resumes with a fresh capture.
    let mic = h.mic.clone();
    eventually(move || mic.acquisitions() > acquisitions_before).await;

    // The transcript heard the announcement under the new mode.
    let entries = h.transcript.entries();
    let announced = entries
        .iter()
        .find(|e| e.text == greeting)
        .expect("announcement in transcript");
    assert_eq!(announced.mode, ConversationMode::Story);

    h.orchestrator.stop().await;
}

/// A mode switch with no active conversation announces the mode and returns
/// to idle without starting capture.
#[tokio::test(start_paused = true)]
async fn mode_switch_when_idle_speaks_and_returns_to_idle() {
    let h = build(HarnessOptions::default());

    h.coordinator.switch(ConversationMode::Game).await;

    assert_eq!(h.orchestrator.state(), ConversationState::Idle);
    assert_eq!(h.orchestrator.mode(), ConversationMode::Game);
    assert_eq!(h.mic.acquisitions(), 0);
    assert!(h.speaker.spoke(announcement_for(ConversationMode::Game)));
}

/// Switching to the already-active mode does nothing.
#[tokio::test(start_paused = true)]
async fn mode_switch_to_current_mode_is_a_noop() {
    let h = build(HarnessOptions::default());

    h.coordinator.switch(ConversationMode::Chat).await;

    assert!(h.speaker.texts().is_empty());
    assert!(h.transcript.entries().is_empty());
}

/// An unavailable microphone apologizes, clears continuous mode, and lands
/// in Idle without retrying.
#[tokio::test(start_paused = true)]
async fn capture_unavailable_is_fatal_to_continuous_mode() {
    let h = build(HarnessOptions {
        mic_unavailable: true,
        ..Default::default()
    });

    h.orchestrator.start();

    let speaker = h.speaker.clone();
    eventually(move || speaker.spoke(phrases::APOLOGY_NO_MICROPHONE)).await;

    let orchestrator = h.orchestrator.clone();
    eventually(move || !orchestrator.is_active()).await;

    assert!(!h.orchestrator.continuous());
    assert_eq!(h.orchestrator.state(), ConversationState::Idle);
}

/// The configured greeting opens the conversation and lands in the
/// transcript before any user turn.
#[tokio::test(start_paused = true)]
async fn start_greeting_is_spoken_before_listening() {
    let h = build(HarnessOptions {
        start_greeting: Some("Hi! I'm Bobo. How can I help you today?".to_string()),
        ..Default::default()
    });

    h.orchestrator.start();

    let speaker = h.speaker.clone();
    eventually(move || speaker.spoke("Hi! I'm Bobo. How can I help you today?")).await;

    let transcript = h.transcript.clone();
    eventually(move || !transcript.entries().is_empty()).await;
    let entries = h.transcript.entries();
    assert_eq!(entries[0].speaker, Speaker::Assistant);
    assert_eq!(entries[0].text, "Hi! I'm Bobo. How can I help you today?");

    h.orchestrator.stop().await;
}

/// A rejected speaker is never transcribed; the engine re-listens.
#[tokio::test(start_paused = true)]
async fn rejected_speaker_skips_transcription() {
    let mut h = build(HarnessOptions {
        mic_scripts: vec![speech_script(), Vec::new()],
        verifier_script: Some(vec![false]),
        ..Default::default()
    });

    h.orchestrator.start();

    wait_for_event(&mut h.events, |e| matches!(e, EngineEvent::SpeakerRejected)).await;

    let mic = h.mic.clone();
    eventually(move || mic.acquisitions() >= 2).await;

    assert_eq!(h.transcription.call_count(), 0);
    assert!(h.dialogue.requests().is_empty());
    h.orchestrator.stop().await;
}
