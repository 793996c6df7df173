//! Voice companion entry point
//!
//! Wires the real microphone, speaker, and backend clients into the engine
//! and drives it from a line-oriented prompt. The graphical UI lives
//! elsewhere; this binary is the reference harness for the engine's public
//! surface: start, stop, mode switching, and the event stream.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use companion_audio::{CpalMicrophone, MicrophoneConfig, RodioSpeaker};
use companion_config::{load_settings, Settings};
use companion_core::{ConversationMode, SpeakerVerifier};
use companion_engine::{
    ConversationOrchestrator, EngineEvent, ModeSwitchCoordinator, OrchestratorConfig,
    SpeechSynthesisPlayer,
};
use companion_services::{
    HttpDialogueClient, HttpSpeakerVerifier, HttpSynthesisClient, HttpTranscriptionClient,
    MemoryTranscript,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before tracing so the subscriber can't depend on it.
    let env = std::env::var("COMPANION_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing();

    tracing::info!("Starting voice companion v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = %settings.services.base_url,
        name = %settings.companion.name,
        tts = settings.engine.tts_enabled,
        "configuration loaded"
    );

    let transcription = Arc::new(HttpTranscriptionClient::new(&settings.services)?);
    let dialogue = Arc::new(HttpDialogueClient::new(&settings.services)?);
    let synthesizer = Arc::new(HttpSynthesisClient::new(&settings.services)?);

    let player = Arc::new(SpeechSynthesisPlayer::new(
        synthesizer,
        Arc::new(RodioSpeaker::new()),
        settings.engine.tts_enabled,
    ));
    let transcript = Arc::new(MemoryTranscript::new());
    let microphone = Arc::new(CpalMicrophone::new(MicrophoneConfig::from_settings(
        &settings.audio,
    )));

    let mut orchestrator = ConversationOrchestrator::new(
        OrchestratorConfig::from_settings(&settings),
        microphone,
        transcription,
        dialogue,
        player.clone(),
        transcript,
    );
    if settings.services.verify_speaker {
        let verifier: Arc<dyn SpeakerVerifier> =
            Arc::new(HttpSpeakerVerifier::new(&settings.services)?);
        orchestrator = orchestrator.with_verifier(verifier);
    }
    let orchestrator = Arc::new(orchestrator);
    let coordinator = ModeSwitchCoordinator::new(orchestrator.clone());

    spawn_event_logger(orchestrator.subscribe());

    run_prompt(orchestrator, coordinator, player).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Surface engine events in the log; the energy stream is too chatty to
/// print.
fn spawn_event_logger(mut events: broadcast::Receiver<EngineEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::StateChanged(state)) => tracing::info!(?state, "engine state"),
                Ok(EngineEvent::TurnCompleted(turn)) => tracing::info!(
                    user = %turn.user_text,
                    assistant = %turn.assistant_text,
                    language = %turn.language,
                    "turn completed"
                ),
                Ok(EngineEvent::ModeChanged(mode)) => tracing::info!(%mode, "mode changed"),
                Ok(EngineEvent::SpeakerRejected) => tracing::warn!("speaker not recognized"),
                Ok(EngineEvent::Error(e)) => tracing::warn!(error = %e, "recoverable failure"),
                Ok(EngineEvent::Energy(_)) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_prompt(
    orchestrator: Arc<ConversationOrchestrator>,
    coordinator: ModeSwitchCoordinator,
    player: Arc<SpeechSynthesisPlayer>,
) -> anyhow::Result<()> {
    println!("commands: start | stop | mode <chat|story|learning|game> | tts <on|off> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "start" => orchestrator.start(),
            "stop" => orchestrator.stop().await,
            "quit" | "exit" => {
                orchestrator.stop().await;
                break;
            }
            "tts on" => player.set_enabled(true),
            "tts off" => {
                player.set_enabled(false);
                player.cancel();
            }
            _ => {
                if let Some(mode) = line.strip_prefix("mode ") {
                    match ConversationMode::from_str(mode.trim()) {
                        Some(mode) => coordinator.switch(mode).await,
                        None => println!("unknown mode: {mode}"),
                    }
                } else {
                    println!("unknown command: {line}");
                }
            }
        }
    }

    Ok(())
}
