//! Live sessions by id.
//!
//! Each entry pairs a `SessionMachine` with the `RelaySink` that carries its
//! audio to the client. Entries are created by `start` or rebuilt from the
//! store on first access after a restart. Retired and idle entries are swept;
//! the store keeps everything needed to rebuild them.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::guards::{Operation, StartGuards};
use super::machine::{EndOutcome, MachineDeps, QuestionView, SessionError, SessionMachine};
use super::profile::{Profile, ProfileResolver};
use super::round::RoundKind;
use crate::config::PlaybackSettings;
use crate::playback::{AudioSequencer, RelaySink};
use crate::speech::SpeechSynthesizer;

static USER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// Entries untouched for this long are dropped even while active.
const IDLE_AFTER: Duration = Duration::from_secs(30 * 60);
const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SessionEntry {
    pub machine: Arc<SessionMachine>,
    pub relay: Arc<RelaySink>,
    last_seen: Arc<StdMutex<Instant>>,
}

impl SessionEntry {
    fn new(machine: Arc<SessionMachine>, relay: Arc<RelaySink>) -> Self {
        Self {
            machine,
            relay,
            last_seen: Arc::new(StdMutex::new(Instant::now())),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    starts: StartGuards,
    deps: MachineDeps,
    profiles: Arc<dyn ProfileResolver>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: PlaybackSettings,
    public_base_url: String,
}

impl SessionRegistry {
    pub fn new(
        deps: MachineDeps,
        profiles: Arc<dyn ProfileResolver>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        playback: PlaybackSettings,
        public_base_url: &str,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            starts: StartGuards::default(),
            deps,
            profiles,
            synthesizer,
            playback,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn start(
        &self,
        user_id: &str,
        round: RoundKind,
    ) -> Result<(SessionEntry, QuestionView), SessionError> {
        if !USER_ID.is_match(user_id) {
            return Err(SessionError::InvalidUserId);
        }
        let _permit = self
            .starts
            .try_acquire(user_id)
            .ok_or(SessionError::Duplicate(Operation::Start))?;

        let profile = self
            .profiles
            .resolve(user_id)
            .await?
            .ok_or_else(|| SessionError::ProfileNotFound(user_id.to_string()))?;

        let id = Uuid::new_v4();
        let (relay, audio) = self.audio_for(round, id);
        let (machine, first) =
            SessionMachine::start(self.deps.clone(), id, profile, round, audio).await?;

        let entry = SessionEntry::new(machine, relay);
        self.sessions.write().await.insert(id, entry.clone());
        Ok((entry, first))
    }

    /// Looks up a session, rebuilding it from the store on a cache miss.
    pub async fn get(&self, id: Uuid, round: RoundKind) -> Result<SessionEntry, SessionError> {
        let cached = self.sessions.read().await.get(&id).cloned();
        let entry = match cached {
            Some(entry) => entry,
            None => self.load(id).await?,
        };
        entry.touch();

        let actual = entry.machine.round();
        if actual != round {
            return Err(SessionError::WrongRound {
                requested: round,
                actual,
            });
        }
        Ok(entry)
    }

    /// Ends a session. It leaves the cache only once the store has recorded
    /// the terminal status; otherwise the local entry keeps the session closed.
    pub async fn end(&self, entry: &SessionEntry) -> EndOutcome {
        let outcome = entry.machine.end().await;
        if outcome.persisted {
            self.sessions.write().await.remove(&entry.machine.id());
            debug!(session_id = %entry.machine.id(), "session evicted");
        }
        outcome
    }

    /// Drops the entry right away once its session has retired.
    pub async fn release_if_retired(&self, entry: &SessionEntry) {
        if entry.machine.is_retired() {
            self.sessions.write().await.remove(&entry.machine.id());
            debug!(session_id = %entry.machine.id(), "session evicted");
        }
    }

    /// Removes retired entries and entries idle past `IDLE_AFTER`. Returns
    /// how many were dropped.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let retired = entry.machine.is_retired();
            let idle = entry.idle_for() >= IDLE_AFTER;
            if retired || idle {
                debug!(session_id = %id, retired, idle, "session evicted");
            }
            !(retired || idle)
        });
        before - sessions.len()
    }

    /// Runs `sweep` every `SWEEP_EVERY` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_EVERY);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.sweep().await;
                if evicted > 0 {
                    let open = registry.open_sessions().await;
                    info!(
                        evicted,
                        open,
                        "swept inactive sessions"
                    );
                }
            }
        });
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn load(&self, id: Uuid) -> Result<SessionEntry, SessionError> {
        let session = self
            .deps
            .store
            .load_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))?;

        let profile = match self.profiles.resolve(&session.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => Profile::bare(&session.user_id),
            Err(e) => {
                warn!(session_id = %id, "profile lookup failed on resume: {e}");
                Profile::bare(&session.user_id)
            }
        };

        let (relay, audio) = self.audio_for(session.round, id);
        let machine = SessionMachine::resume(session, profile, audio, self.deps.clone());
        let fresh = SessionEntry::new(machine, relay);

        // A concurrent load may have won; keep whichever entry landed first.
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id).or_insert(fresh).clone();
        info!(session_id = %id, "session loaded from store");
        Ok(entry)
    }

    fn audio_for(&self, round: RoundKind, id: Uuid) -> (Arc<RelaySink>, AudioSequencer) {
        let relay = Arc::new(RelaySink::new(format!(
            "{}/api/v1/interviews/{round}/{id}/audio/clips",
            self.public_base_url
        )));
        let audio = AudioSequencer::spawn(
            relay.clone(),
            self.synthesizer.clone(),
            self.playback.clone(),
        );
        (relay, audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterviewSettings;
    use crate::interview::machine::AnswerInput;
    use crate::interview::session::SessionStatus;
    use crate::interview::testing::{MemoryStore, ScriptedOracle, StaticProfiles};
    use crate::playback::testing::FakeSynth;

    fn registry(store: Arc<MemoryStore>) -> SessionRegistry {
        registry_with(store, |_| {})
    }

    fn registry_with(
        store: Arc<MemoryStore>,
        tweak: impl FnOnce(&mut InterviewSettings),
    ) -> SessionRegistry {
        let mut settings = InterviewSettings {
            answer_timeout: None,
            ..Default::default()
        };
        tweak(&mut settings);
        let deps = MachineDeps {
            store,
            oracle: Arc::new(ScriptedOracle::new()),
            settings,
        };
        SessionRegistry::new(
            deps,
            Arc::new(StaticProfiles::of(&["alice", "bob_2"])),
            Arc::new(FakeSynth::new()),
            PlaybackSettings::default(),
            "http://localhost:8080/",
        )
    }

    #[tokio::test]
    async fn test_start_rejects_malformed_user_id() {
        let reg = registry(Arc::new(MemoryStore::new()));
        for bad in ["", "alice smith", "bob;drop", "ünïcode"] {
            assert!(matches!(
                reg.start(bad, RoundKind::Hr).await,
                Err(SessionError::InvalidUserId)
            ));
        }
    }

    #[tokio::test]
    async fn test_start_requires_known_profile() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone());
        assert!(matches!(
            reg.start("mallory", RoundKind::Technical).await,
            Err(SessionError::ProfileNotFound(_))
        ));
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_start_registers_session_with_warmup() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let (entry, first) = reg.start("alice", RoundKind::Hr).await.unwrap();
        assert_eq!(first.number, 1);
        assert!(first.is_warmup);
        assert_eq!(first.total, 10);
        assert_eq!(reg.open_sessions().await, 1);

        let again = reg.get(entry.machine.id(), RoundKind::Hr).await.unwrap();
        assert!(Arc::ptr_eq(&again.machine, &entry.machine));
    }

    #[tokio::test]
    async fn test_get_rejects_mismatched_round() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let (entry, _) = reg.start("bob_2", RoundKind::Coding).await.unwrap();
        assert!(matches!(
            reg.get(entry.machine.id(), RoundKind::Star).await,
            Err(SessionError::WrongRound {
                requested: RoundKind::Star,
                actual: RoundKind::Coding
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let id = Uuid::new_v4();
        assert!(matches!(
            reg.get(id, RoundKind::Hr).await,
            Err(SessionError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_session_survives_restart_through_store() {
        let store = Arc::new(MemoryStore::new());
        let id = {
            let reg = registry(store.clone());
            let (entry, _) = reg.start("alice", RoundKind::Technical).await.unwrap();
            entry.machine.id()
        };

        let reg = registry(store);
        assert_eq!(reg.open_sessions().await, 0);
        let entry = reg.get(id, RoundKind::Technical).await.unwrap();
        assert_eq!(entry.machine.status().await, SessionStatus::Active);
        assert_eq!(reg.open_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_end_evicts_once_persisted() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone());
        let (entry, _) = reg.start("alice", RoundKind::Star).await.unwrap();

        let outcome = reg.end(&entry).await;
        assert_eq!(outcome.status, SessionStatus::Cancelled);
        assert_eq!(reg.open_sessions().await, 0);

        let reloaded = reg.get(entry.machine.id(), RoundKind::Star).await.unwrap();
        assert_eq!(reloaded.machine.status().await, SessionStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_completed_and_idle_sessions() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry_with(store, |s| s.question_limit = Some(1));
        for _ in 0..5 {
            let (entry, _) = reg.start("alice", RoundKind::Technical).await.unwrap();
            let out = entry
                .machine
                .submit_answer(AnswerInput::Transcript {
                    text: Some("I led a team that built our payment system in Rust.".into()),
                    response_time_secs: None,
                    question_number: Some(1),
                })
                .await
                .unwrap();
            assert_eq!(out.status, SessionStatus::Completed);
        }
        let (active, _) = reg.start("bob_2", RoundKind::Coding).await.unwrap();
        assert_eq!(reg.open_sessions().await, 6);

        // Let each session's audio settle.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reg.sweep().await, 5);
        assert_eq!(reg.open_sessions().await, 1);

        tokio::time::sleep(IDLE_AFTER).await;
        assert_eq!(reg.sweep().await, 1);
        assert_eq!(reg.open_sessions().await, 0);

        let back = reg.get(active.machine.id(), RoundKind::Coding).await.unwrap();
        assert_eq!(back.machine.status().await, SessionStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_access_keeps_active_session() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let (entry, _) = reg.start("alice", RoundKind::Hr).await.unwrap();

        tokio::time::sleep(IDLE_AFTER - Duration::from_secs(60)).await;
        reg.get(entry.machine.id(), RoundKind::Hr).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(reg.sweep().await, 0);
        reg.release_if_retired(&entry).await;
        assert_eq!(reg.open_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_end_keeps_entry_when_store_is_unreachable() {
        let store = Arc::new(MemoryStore::new());
        let reg = registry(store.clone());
        let (entry, _) = reg.start("alice", RoundKind::Star).await.unwrap();
        store.fail_status_updates();

        let outcome = reg.end(&entry).await;
        assert!(!outcome.persisted);
        let cached = reg.get(entry.machine.id(), RoundKind::Star).await.unwrap();
        assert_eq!(cached.machine.status().await, SessionStatus::Cancelled);
    }
}
