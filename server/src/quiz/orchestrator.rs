use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use skyquiz_shared::aircraft::MISSING_CALLSIGN;
use skyquiz_shared::{
    AircraftRecord, GamePhase, GameView, GuessOutcome, QuestionKind, ROUNDS_PER_GAME,
    RouteDetails, RoundView, ScoreEntry, UserStats, score_for_correct_guess,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{EMPTY_SNAPSHOT_RETRY, MAX_TARGET_ATTEMPTS, RESULT_DISPLAY};
use crate::errors::{GameError, ResolveError};
use crate::quiz::options::build_options;
use crate::services::route_resolver::RouteLookup;
use crate::services::snapshot_cache::SnapshotCache;
use crate::state::ObservabilityCounters;
use crate::store::GameStore;

/// Route lookup started for one target pick.
struct Attempt {
    id: u64,
    target: AircraftRecord,
}

/// Completed route lookup, tagged with the pick it was started for.
struct Resolution {
    attempt_id: u64,
    icao24: String,
    result: Result<RouteDetails, ResolveError>,
}

struct ActiveRound {
    target: AircraftRecord,
    kind: QuestionKind,
    question: String,
    answer: String,
    options: Vec<String>,
    details: RouteDetails,
    asked_at: Instant,
    outcome: Option<GuessOutcome>,
}

/// Quiz state machine. Single writer: every transition happens through `&mut self`.
///
/// Route lookups run as detached tasks and report back over a channel that
/// [`RoundOrchestrator::update`] drains; results for abandoned picks are dropped.
pub struct RoundOrchestrator {
    snapshots: Arc<SnapshotCache>,
    resolver: Arc<dyn RouteLookup>,
    store: Arc<dyn GameStore>,
    home_base_names: Vec<String>,
    observability: Arc<ObservabilityCounters>,
    rng: StdRng,
    resolved_tx: mpsc::UnboundedSender<Resolution>,
    resolved_rx: mpsc::UnboundedReceiver<Resolution>,

    user: Option<UserStats>,
    phase: GamePhase,
    round: u32,
    score: u32,
    persisted: bool,
    next_attempt_id: u64,
    target_attempts: u32,
    awaiting: Option<Attempt>,
    retry_at: Option<Instant>,
    advance_at: Option<Instant>,
    current: Option<ActiveRound>,
}

impl RoundOrchestrator {
    pub fn new(
        snapshots: Arc<SnapshotCache>,
        resolver: Arc<dyn RouteLookup>,
        store: Arc<dyn GameStore>,
        home_base_names: Vec<String>,
        observability: Arc<ObservabilityCounters>,
    ) -> Self {
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        Self {
            snapshots,
            resolver,
            store,
            home_base_names,
            observability,
            rng: StdRng::from_os_rng(),
            resolved_tx,
            resolved_rx,
            user: None,
            phase: GamePhase::Idle,
            round: 0,
            score: 0,
            persisted: false,
            next_attempt_id: 0,
            target_attempts: 0,
            awaiting: None,
            retry_at: None,
            advance_at: None,
            current: None,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn user(&self) -> Option<&UserStats> {
        self.user.as_ref()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.phase,
            GamePhase::TargetSelecting
                | GamePhase::AwaitingDetails
                | GamePhase::Playing
                | GamePhase::Result
        )
    }

    /// Switch to `name`, loading saved stats or starting fresh. Ends any running game first.
    pub async fn login(&mut self, name: &str) -> Result<UserStats, GameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::EmptyName);
        }
        self.quit().await;

        let stats = match self.store.find_user(name).await {
            Ok(Some(stats)) => stats,
            Ok(None) => UserStats::new(name),
            Err(e) => {
                warn!(error = %e, name, "failed to load player stats; starting fresh");
                UserStats::new(name)
            }
        };
        info!(name, games = stats.games_played, "player logged in");
        self.user = Some(stats.clone());
        Ok(stats)
    }

    pub async fn logout(&mut self) {
        self.quit().await;
        if let Some(user) = self.user.take() {
            info!(name = %user.name, "player logged out");
        }
    }

    pub async fn start_game(&mut self, now: Instant) -> Result<(), GameError> {
        if self.user.is_none() {
            return Err(GameError::NotLoggedIn);
        }
        if self.is_running() {
            return Err(GameError::AlreadyRunning);
        }

        self.round = 0;
        self.score = 0;
        self.persisted = false;
        self.current = None;
        self.next_round(now).await;
        Ok(())
    }

    /// Advance to the next round, or end the game after the last one.
    pub async fn next_round(&mut self, now: Instant) {
        self.advance_at = None;
        if self.round >= ROUNDS_PER_GAME {
            self.finish_game().await;
            return;
        }
        self.round += 1;
        self.target_attempts = 0;
        self.start_round(now).await;
    }

    /// Pick a random aircraft from the latest snapshot and start resolving its route.
    ///
    /// Aircraft without a callsign cannot be looked up and are never picked. A snapshot
    /// with nothing pickable schedules another pick after [`EMPTY_SNAPSHOT_RETRY`].
    pub async fn start_round(&mut self, now: Instant) {
        self.current = None;
        self.awaiting = None;
        self.retry_at = None;
        self.phase = GamePhase::TargetSelecting;

        let snapshot = self.snapshots.latest().await;
        let candidates: Vec<&AircraftRecord> = snapshot
            .aircraft
            .iter()
            .filter(|record| record.callsign != MISSING_CALLSIGN)
            .collect();
        let Some(target) = candidates.choose(&mut self.rng).map(|record| (*record).clone()) else {
            debug!(round = self.round, "no identifiable aircraft in view yet; retrying target pick");
            self.retry_at = Some(now + EMPTY_SNAPSHOT_RETRY);
            return;
        };
        self.launch_attempt(target);
    }

    fn launch_attempt(&mut self, target: AircraftRecord) {
        self.next_attempt_id += 1;
        self.target_attempts += 1;
        let attempt_id = self.next_attempt_id;

        debug!(
            round = self.round,
            attempt = self.target_attempts,
            callsign = %target.callsign,
            "resolving quiz target"
        );

        let resolver = Arc::clone(&self.resolver);
        let tx = self.resolved_tx.clone();
        let callsign = target.callsign.clone();
        let icao24 = target.icao24.clone();
        tokio::spawn(async move {
            let result = resolver.resolve_route(&callsign).await;
            let resolution = Resolution {
                attempt_id,
                icao24,
                result,
            };
            if tx.send(resolution).is_err() {
                debug!(attempt_id, "orchestrator dropped before route lookup completed");
            }
        });

        self.awaiting = Some(Attempt {
            id: attempt_id,
            target,
        });
        self.phase = GamePhase::AwaitingDetails;
    }

    /// Apply finished lookups and due timers. Called once per frame.
    pub async fn update(&mut self, now: Instant) {
        while let Ok(resolution) = self.resolved_rx.try_recv() {
            self.apply_resolution(resolution, now).await;
        }

        if self.phase == GamePhase::TargetSelecting && self.retry_at.is_some_and(|at| now >= at) {
            self.start_round(now).await;
        }

        if self.phase == GamePhase::Result && self.advance_at.is_some_and(|at| now >= at) {
            self.next_round(now).await;
        }
    }

    async fn apply_resolution(&mut self, resolution: Resolution, now: Instant) {
        let is_current = self.awaiting.as_ref().is_some_and(|attempt| {
            attempt.id == resolution.attempt_id && attempt.target.icao24 == resolution.icao24
        });
        if !is_current {
            debug!(
                attempt_id = resolution.attempt_id,
                "ignoring route lookup for an abandoned target"
            );
            return;
        }
        let Some(attempt) = self.awaiting.take() else {
            return;
        };

        match resolution.result {
            Ok(details) => {
                self.observability.record_resolver_success();
                match classify(&details, &self.home_base_names) {
                    Some((kind, answer)) => {
                        self.begin_playing(attempt.target, details, kind, answer, now)
                            .await;
                    }
                    None => {
                        info!(
                            callsign = %attempt.target.callsign,
                            "route has unknown legs; picking a new target"
                        );
                        self.retry_with_new_target(now).await;
                    }
                }
            }
            Err(e) => {
                self.observability.record_resolver_failure();
                warn!(
                    callsign = %attempt.target.callsign,
                    malformed = e.is_malformed(),
                    "route lookup failed, picking a new target: {e}"
                );
                self.retry_with_new_target(now).await;
            }
        }
    }

    async fn retry_with_new_target(&mut self, now: Instant) {
        self.observability.record_discarded_target();
        if self.target_attempts >= MAX_TARGET_ATTEMPTS {
            warn!(
                round = self.round,
                attempts = self.target_attempts,
                "no aircraft with a usable route; giving up on this game"
            );
            self.phase = GamePhase::NoValidTarget;
            self.current = None;
            self.retry_at = None;
            if !self.persisted {
                self.persist_session().await;
            }
            return;
        }
        self.start_round(now).await;
    }

    async fn begin_playing(
        &mut self,
        target: AircraftRecord,
        details: RouteDetails,
        kind: QuestionKind,
        answer: String,
        now: Instant,
    ) {
        for label in [&details.real_destination, &details.origin] {
            if let Err(e) = self.store.save_airport(label).await {
                warn!(error = %e, "failed to record airport label");
            }
        }
        let airports = match self.store.load_airports().await {
            Ok(airports) => airports,
            Err(e) => {
                warn!(error = %e, "failed to load airport labels; using fallback cities");
                Vec::new()
            }
        };

        let options = build_options(&airports, &answer, &mut self.rng);
        let question = match kind {
            QuestionKind::Origin => format!("Where is {} from?", target.callsign),
            QuestionKind::Destination => format!("Where is {} going?", target.callsign),
        };
        info!(round = self.round, callsign = %target.callsign, ?kind, "round ready");

        self.current = Some(ActiveRound {
            target,
            kind,
            question,
            answer,
            options,
            details,
            asked_at: now,
            outcome: None,
        });
        self.phase = GamePhase::Playing;
    }

    /// Score `choice` against the active round. `None` when no question is open.
    pub fn submit_guess(&mut self, choice: &str, now: Instant) -> Option<GuessOutcome> {
        if self.phase != GamePhase::Playing {
            return None;
        }
        let round = self.current.as_mut()?;
        if round.outcome.is_some() {
            return None;
        }

        let correct = choice == round.answer;
        let points = if correct {
            score_for_correct_guess(now.saturating_duration_since(round.asked_at).as_secs_f64())
        } else {
            0
        };
        let outcome = GuessOutcome {
            correct,
            points,
            correct_answer: round.answer.clone(),
            wrong_choice: (!correct).then(|| choice.to_string()),
        };
        round.outcome = Some(outcome.clone());

        self.score += points;
        self.phase = GamePhase::Result;
        self.advance_at = Some(now + RESULT_DISPLAY);
        Some(outcome)
    }

    /// Abandon the game, saving the score if any round was played.
    pub async fn quit(&mut self) {
        if self.round > 0 && !self.persisted {
            self.persist_session().await;
        }
        self.phase = GamePhase::Idle;
        self.round = 0;
        self.score = 0;
        self.awaiting = None;
        self.retry_at = None;
        self.advance_at = None;
        self.current = None;
    }

    async fn finish_game(&mut self) {
        self.phase = GamePhase::GameOver;
        self.current = None;
        info!(score = self.score, "game over");
        if !self.persisted {
            self.persist_session().await;
        }
    }

    async fn persist_session(&mut self) {
        self.persisted = true;
        let Some(name) = self.user.as_ref().map(|user| user.name.clone()) else {
            return;
        };

        match self.store.save_user(&name, self.score).await {
            Ok(stats) => self.user = Some(stats),
            Err(e) => {
                self.observability.record_persist_failure();
                warn!(error = %e, name = %name, "failed to save player stats");
            }
        }

        let entry = ScoreEntry {
            name,
            score: self.score,
            date: Utc::now().format("%Y-%m-%d").to_string(),
        };
        if let Err(e) = self.store.add_score(entry).await {
            self.observability.record_persist_failure();
            warn!(error = %e, "failed to record high score");
        }
    }

    /// The answer of the open question when `icao24` is its target.
    ///
    /// Anything showing that aircraft's route must hide this label until a guess is in.
    pub fn hidden_answer_for(&self, icao24: &str) -> Option<&str> {
        let round = self.current.as_ref()?;
        (round.outcome.is_none() && round.target.icao24 == icao24).then_some(round.answer.as_str())
    }

    /// Same as [`Self::hidden_answer_for`], matching the target by callsign.
    pub fn hidden_answer_for_callsign(&self, callsign: &str) -> Option<&str> {
        let round = self.current.as_ref()?;
        let matches = round.target.callsign.eq_ignore_ascii_case(callsign.trim());
        (round.outcome.is_none() && matches).then_some(round.answer.as_str())
    }

    pub async fn view(&self) -> GameView {
        let current = match self.current.as_ref() {
            Some(round) => Some(RoundView {
                index: self.round,
                question: round.question.clone(),
                kind: round.kind,
                options: round.options.clone(),
                target: self.snapshots.find(&round.target.icao24).await,
                details: match round.outcome {
                    Some(_) => round.details.clone(),
                    None => round.details.redacted(&round.answer),
                },
                outcome: round.outcome.clone(),
            }),
            None => None,
        };

        GameView {
            phase: self.phase,
            user: self.user.clone(),
            round: self.round,
            score: self.score,
            current,
        }
    }
}

/// Decide what to ask. Aircraft bound for the home base are asked about their origin.
///
/// `None` when either leg is unknown.
pub fn classify(details: &RouteDetails, home_base_names: &[String]) -> Option<(QuestionKind, String)> {
    if !details.has_destination() || !details.has_origin() {
        return None;
    }
    let destination = details.real_destination.trim();
    let inbound = home_base_names
        .iter()
        .any(|home| destination.contains(home.as_str()));

    if inbound {
        Some((QuestionKind::Origin, details.origin.trim().to_string()))
    } else {
        Some((QuestionKind::Destination, destination.to_string()))
    }
}
