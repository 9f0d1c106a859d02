//! # Walk Session Store
//!
//! The central state machine of a walk.
//!
//! ## Architecture
//!
//! Every mutation is a [`WalkCommand`] fed to [`reduce`], a pure function
//! that consumes the current [`WalkState`] and returns the next one together
//! with a list of [`WalkEffect`]s. [`WalkSessionStore`] owns the state, runs
//! the reducer and then executes the effects against the recovery store and
//! the history repository:
//!
//! 1. The in-memory transition always happens first and is authoritative.
//! 2. Durable writes follow; failures are logged and never roll back (1).
//!
//! POI lookups are not performed here. The store hands a [`PoiLookup`] back
//! to the caller, which runs it wherever it likes and reports the result via
//! [`WalkSessionStore::apply_poi_candidates`]. Results for a session that has
//! since ended are discarded.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::auto_complete::should_auto_complete;
use crate::clock::Clock;
use crate::config::{PoiConfig, TrackerConfig};
use crate::error::{Result, WalkError};
use crate::history::WalkHistoryRepository;
use crate::poi::{confirm_visit, new_candidates, should_query};
use crate::recovery::RecoveryStore;
use crate::storage::KeyValueStore;
use crate::{CompletedWalk, GpsPoint, PetRef, PoiCandidate, PoiVisit, RoutePoint, WalkSession};

// ============================================================================
// Commands, State and Effects
// ============================================================================

/// Lifecycle state. There is no paused state: stopping ends the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WalkState {
    #[default]
    Idle,
    Tracking(WalkSession),
}

impl WalkState {
    pub fn session(&self) -> Option<&WalkSession> {
        match self {
            WalkState::Tracking(session) => Some(session),
            WalkState::Idle => None,
        }
    }
}

/// Everything that can happen to a walk.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkCommand {
    Start { pet: PetRef, session_id: String },
    AppendFix(RoutePoint),
    Stop { auto_completed: bool },
    Clear,
    /// Result of a nearby-places lookup issued for `session_id`
    PoisFound {
        session_id: String,
        candidates: Vec<PoiCandidate>,
    },
    /// Visit confirmed outside the dwell detector
    ConfirmPoi { session_id: String, visit: PoiVisit },
    /// Timer tick refreshing the live duration
    Tick,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkEffect {
    /// Mirror the current session into the recovery slot
    PersistSnapshot,
    /// Empty the recovery slot
    ClearSnapshot,
    /// Move a finished session into history
    Finalize(WalkSession),
    /// Ask the caller to look up nearby places
    LookupPois(PoiLookup),
}

/// A nearby-places query the caller should run asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub struct PoiLookup {
    pub session_id: String,
    pub point: GpsPoint,
    pub radius_meters: f64,
}

/// How the reducer treated a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied,
    /// No-op; the reason is for logs only
    Ignored(&'static str),
    Rejected(WalkError),
}

/// Next state plus the effects to run.
#[derive(Debug)]
pub struct Transition {
    pub state: WalkState,
    pub effects: Vec<WalkEffect>,
    pub outcome: Outcome,
}

impl Transition {
    fn applied(state: WalkState, effects: Vec<WalkEffect>) -> Self {
        Self {
            state,
            effects,
            outcome: Outcome::Applied,
        }
    }

    fn ignored(state: WalkState, reason: &'static str) -> Self {
        Self {
            state,
            effects: Vec::new(),
            outcome: Outcome::Ignored(reason),
        }
    }
}

/// Inputs the reducer needs besides state and command.
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext<'a> {
    pub now: i64,
    pub config: &'a TrackerConfig,
}

// ============================================================================
// Reducer
// ============================================================================

/// Apply one command to a state.
pub fn reduce(state: WalkState, command: WalkCommand, ctx: &ReduceContext<'_>) -> Transition {
    match command {
        WalkCommand::Start { pet, session_id } => match state {
            WalkState::Tracking(session) => {
                let err = WalkError::AlreadyTracking {
                    session_id: session.session_id.clone(),
                };
                Transition {
                    state: WalkState::Tracking(session),
                    effects: Vec::new(),
                    outcome: Outcome::Rejected(err),
                }
            }
            WalkState::Idle => {
                let mut session = WalkSession::new(session_id, pet, ctx.now);
                session.recompute_metrics(ctx.now);
                Transition::applied(
                    WalkState::Tracking(session),
                    vec![WalkEffect::PersistSnapshot],
                )
            }
        },

        WalkCommand::AppendFix(fix) => {
            let session = match state {
                WalkState::Tracking(session) => session,
                WalkState::Idle => return Transition::ignored(WalkState::Idle, "fix while idle"),
            };
            append_fix(session, fix, ctx)
        }

        WalkCommand::Stop { auto_completed } => match state {
            WalkState::Tracking(session) => finish(session, auto_completed, ctx.now),
            WalkState::Idle => Transition::ignored(WalkState::Idle, "stop while idle"),
        },

        WalkCommand::Clear => match state {
            WalkState::Tracking(_) => {
                Transition::applied(WalkState::Idle, vec![WalkEffect::ClearSnapshot])
            }
            WalkState::Idle => Transition::ignored(WalkState::Idle, "clear while idle"),
        },

        WalkCommand::PoisFound {
            session_id,
            candidates,
        } => {
            let mut session = match state {
                WalkState::Tracking(session) => session,
                WalkState::Idle => return Transition::ignored(WalkState::Idle, "poi lookup after walk ended"),
            };
            if session.session_id != session_id {
                return Transition::ignored(WalkState::Tracking(session), "poi lookup for another walk");
            }

            let fresh: Vec<PoiVisit> = new_candidates(&candidates, |id| session.knows_place(id))
                .into_iter()
                .map(|c| PoiVisit::pending(c.clone(), ctx.now))
                .collect();
            if fresh.is_empty() {
                return Transition::ignored(WalkState::Tracking(session), "no new places");
            }

            session.pending_pois.extend(fresh);
            confirm_pending(&mut session, &ctx.config.poi);
            Transition::applied(WalkState::Tracking(session), vec![WalkEffect::PersistSnapshot])
        }

        WalkCommand::ConfirmPoi { session_id, visit } => {
            let mut session = match state {
                WalkState::Tracking(session) => session,
                WalkState::Idle => return Transition::ignored(WalkState::Idle, "confirmation after walk ended"),
            };
            if session.session_id != session_id {
                return Transition::ignored(WalkState::Tracking(session), "confirmation for another walk");
            }
            if session.pois.iter().any(|p| p.place_id == visit.place_id) {
                return Transition::ignored(WalkState::Tracking(session), "place already confirmed");
            }

            session.pending_pois.retain(|p| p.place_id != visit.place_id);
            session.pois.push(PoiVisit {
                confirmed_at: visit.confirmed_at.or(Some(ctx.now)),
                ..visit
            });
            Transition::applied(WalkState::Tracking(session), vec![WalkEffect::PersistSnapshot])
        }

        WalkCommand::Tick => {
            let mut session = match state {
                WalkState::Tracking(session) => session,
                WalkState::Idle => return Transition::ignored(WalkState::Idle, "tick while idle"),
            };
            session.refresh_live_duration(ctx.now);
            // Duration is derived; no need to hit storage once a second
            Transition::applied(WalkState::Tracking(session), Vec::new())
        }
    }
}

fn append_fix(mut session: WalkSession, fix: RoutePoint, ctx: &ReduceContext<'_>) -> Transition {
    if !fix.is_valid() {
        return Transition::ignored(WalkState::Tracking(session), "invalid coordinates");
    }
    if let Some(last) = session.last_fix() {
        if fix.timestamp <= last.timestamp {
            return Transition::ignored(WalkState::Tracking(session), "non-increasing timestamp");
        }
    }

    session.route.push(fix);
    session.recompute_metrics(ctx.now);
    confirm_pending(&mut session, &ctx.config.poi);

    let mut effects = Vec::new();
    let poi = &ctx.config.poi;
    if poi.enabled && should_query(session.route.len(), poi.query_every_n_fixes) {
        effects.push(WalkEffect::LookupPois(PoiLookup {
            session_id: session.session_id.clone(),
            point: fix.point(),
            radius_meters: poi.search_radius_meters,
        }));
    }

    if should_auto_complete(&session.route, &ctx.config.auto_complete) {
        // The lookup would only be discarded once the walk has ended
        return finish(session, true, ctx.now);
    }

    effects.insert(0, WalkEffect::PersistSnapshot);
    Transition::applied(WalkState::Tracking(session), effects)
}

fn finish(mut session: WalkSession, auto_completed: bool, now: i64) -> Transition {
    session.end_time = Some(now);
    session.auto_completed = auto_completed;
    session.recompute_metrics(now);
    Transition::applied(WalkState::Idle, vec![WalkEffect::Finalize(session)])
}

/// Promote pending visits whose dwell condition is now met.
fn confirm_pending(session: &mut WalkSession, config: &PoiConfig) {
    if session.pending_pois.is_empty() {
        return;
    }

    let mut still_pending = Vec::with_capacity(session.pending_pois.len());
    for pending in std::mem::take(&mut session.pending_pois) {
        if session.pois.iter().any(|p| p.place_id == pending.place_id) {
            continue;
        }
        match confirm_visit(&session.route, &pending, config) {
            Some(visit) => {
                info!(
                    "[WalkStore] Visit to '{}' confirmed after {:.0}s",
                    visit.name, visit.dwell_seconds
                );
                session.pois.push(visit);
            }
            None => still_pending.push(pending),
        }
    }
    session.pending_pois = still_pending;
}

// ============================================================================
// Store
// ============================================================================

/// How a walk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Stored in history
    Saved(CompletedWalk),
    /// History write failed; the walk stays in the recovery slot and is
    /// retried later
    Deferred(WalkSession),
}

impl StopOutcome {
    pub fn completed(self) -> Option<CompletedWalk> {
        match self {
            StopOutcome::Saved(record) => Some(record),
            StopOutcome::Deferred(_) => None,
        }
    }

    pub fn session(&self) -> &WalkSession {
        match self {
            StopOutcome::Saved(record) => &record.session,
            StopOutcome::Deferred(session) => session,
        }
    }
}

/// What a dispatched command did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// False when the command was a no-op (dropped fix, idle stop, ...)
    pub applied: bool,
    /// Lookup the caller should run
    pub poi_lookup: Option<PoiLookup>,
    /// Set when this command ended the walk
    pub finished: Option<StopOutcome>,
}

/// Shared handle for hosts that deliver events from several callbacks.
pub type SharedWalkStore = Arc<Mutex<WalkSessionStore>>;

/// Owns the active walk and executes transition effects.
pub struct WalkSessionStore {
    state: WalkState,
    recovery: RecoveryStore,
    history: WalkHistoryRepository,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    /// Finished walks whose history write failed, oldest first
    pending_finalization: Vec<WalkSession>,
    sessions_started: u64,
}

impl WalkSessionStore {
    /// Open the store over `storage`, resuming an interrupted walk if the
    /// recovery slot holds one.
    pub fn open(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: TrackerConfig) -> Self {
        let mut store = Self {
            state: WalkState::Idle,
            recovery: RecoveryStore::new(storage.clone()),
            history: WalkHistoryRepository::open(storage),
            clock,
            config,
            pending_finalization: Vec::new(),
            sessions_started: 0,
        };
        store.restore();
        store
    }

    fn restore(&mut self) {
        self.pending_finalization = self.recovery.load_pending();

        match self.recovery.load() {
            Some(session) if self.history.find_by_session_id(&session.session_id).is_some() => {
                info!(
                    "[WalkStore] Walk {} is already in history, dropping stale snapshot",
                    session.session_id
                );
                self.recovery.clear();
            }
            Some(session) if session.is_finished() => {
                info!(
                    "[WalkStore] Found finished walk {} not yet in history, retrying",
                    session.session_id
                );
                if !self
                    .pending_finalization
                    .iter()
                    .any(|p| p.session_id == session.session_id)
                {
                    self.pending_finalization.push(session);
                    self.recovery.save_pending(&self.pending_finalization);
                }
            }
            Some(session) => {
                info!(
                    "[WalkStore] Resuming walk {} with {} fixes",
                    session.session_id,
                    session.route.len()
                );
                self.state = WalkState::Tracking(session);
            }
            None => {}
        }

        if !self.pending_finalization.is_empty() {
            self.retry_pending_finalization();
        }
    }

    /// Wrap the store for sharing across callbacks.
    pub fn into_shared(self) -> SharedWalkStore {
        Arc::new(Mutex::new(self))
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Run one command through the reducer and execute its effects.
    pub fn dispatch(&mut self, command: WalkCommand) -> Result<DispatchOutcome> {
        let ctx = ReduceContext {
            now: self.clock.now_ms(),
            config: &self.config,
        };
        let state = std::mem::take(&mut self.state);
        let transition = reduce(state, command, &ctx);
        self.state = transition.state;

        let mut outcome = DispatchOutcome::default();
        match transition.outcome {
            Outcome::Applied => outcome.applied = true,
            Outcome::Ignored(reason) => {
                debug!("[WalkStore] Ignored command: {}", reason);
                return Ok(outcome);
            }
            Outcome::Rejected(err) => return Err(err),
        }

        for effect in transition.effects {
            match effect {
                WalkEffect::PersistSnapshot => {
                    if let WalkState::Tracking(session) = &self.state {
                        self.recovery.save(session);
                    }
                }
                WalkEffect::ClearSnapshot => {
                    self.recovery.clear();
                }
                WalkEffect::Finalize(session) => {
                    outcome.finished = Some(self.finalize(session));
                }
                WalkEffect::LookupPois(lookup) => {
                    outcome.poi_lookup = Some(lookup);
                }
            }
        }
        Ok(outcome)
    }

    /// Begin a walk. Fails with `AlreadyTracking` if one is in progress.
    ///
    /// Returns the new session id.
    pub fn start_walk(&mut self, pet: PetRef) -> Result<String> {
        if !self.is_tracking() {
            self.retry_pending_finalization();
        }

        let session_id = self.next_session_id();
        let pet_name = pet.name.clone();
        self.dispatch(WalkCommand::Start {
            pet,
            session_id: session_id.clone(),
        })?;

        if !self.pending_finalization.is_empty() {
            warn!(
                "[WalkStore] {} finished walk(s) still waiting for history, kept for retry",
                self.pending_finalization.len()
            );
        }
        info!("[WalkStore] Started walk {} for {}", session_id, pet_name);
        Ok(session_id)
    }

    /// `walk-{now}-{n}`, skipping ids already used by stored or pending walks.
    fn next_session_id(&mut self) -> String {
        let now = self.clock.now_ms();
        loop {
            self.sessions_started += 1;
            let candidate = format!("walk-{}-{}", now, self.sessions_started);
            let taken = self.history.find_by_session_id(&candidate).is_some()
                || self
                    .pending_finalization
                    .iter()
                    .any(|p| p.session_id == candidate);
            if !taken {
                return candidate;
            }
        }
    }

    /// Feed one location fix. Never fails; bad fixes are dropped.
    pub fn append_fix(&mut self, fix: RoutePoint) -> DispatchOutcome {
        self.dispatch(WalkCommand::AppendFix(fix)).unwrap_or_default()
    }

    /// End the walk manually. `None` if no walk was active.
    pub fn stop_walk(&mut self) -> Option<StopOutcome> {
        self.dispatch(WalkCommand::Stop {
            auto_completed: false,
        })
        .ok()
        .and_then(|outcome| outcome.finished)
    }

    /// Discard the active walk without saving it. Always succeeds.
    pub fn clear_walk(&mut self) {
        if let Ok(outcome) = self.dispatch(WalkCommand::Clear) {
            if outcome.applied {
                info!("[WalkStore] Cleared active walk");
            }
        }
    }

    /// Apply the result of a lookup issued for `session_id`.
    pub fn apply_poi_candidates(&mut self, session_id: &str, candidates: Vec<PoiCandidate>) -> bool {
        self.dispatch(WalkCommand::PoisFound {
            session_id: session_id.to_string(),
            candidates,
        })
        .map(|o| o.applied)
        .unwrap_or(false)
    }

    /// Record a visit confirmed elsewhere. Duplicates are ignored.
    pub fn confirm_poi(&mut self, session_id: &str, visit: PoiVisit) -> bool {
        self.dispatch(WalkCommand::ConfirmPoi {
            session_id: session_id.to_string(),
            visit,
        })
        .map(|o| o.applied)
        .unwrap_or(false)
    }

    /// Refresh the live duration between fixes.
    pub fn tick(&mut self) {
        let _ = self.dispatch(WalkCommand::Tick);
    }

    /// Retry history writes that failed earlier. Returns the walks saved now.
    pub fn retry_pending_finalization(&mut self) -> Vec<CompletedWalk> {
        if self.pending_finalization.is_empty() {
            return Vec::new();
        }

        let mut saved = Vec::new();
        let mut failed = Vec::new();

        for session in std::mem::take(&mut self.pending_finalization) {
            match self.history.save(session.clone()) {
                Ok(record) => saved.push(record),
                Err(e) => {
                    warn!(
                        "[WalkStore] History still unavailable for {}: {}",
                        session.session_id, e
                    );
                    failed.push(session);
                }
            }
        }
        self.pending_finalization = failed;

        if !saved.is_empty() {
            let durable = self.recovery.save_pending(&self.pending_finalization);
            // The slot belongs to the active walk while tracking
            if !self.is_tracking() && (durable || self.pending_finalization.is_empty()) {
                self.recovery.clear();
            }
        }
        saved
    }

    fn finalize(&mut self, session: WalkSession) -> StopOutcome {
        self.retry_pending_finalization();

        // Finished snapshot first: if the slot cannot be cleared afterwards,
        // a restart sees a finished walk instead of resuming it.
        self.recovery.save(&session);

        let distance = session.distance_meters();
        let auto = session.auto_completed;
        match self.history.save(session.clone()) {
            Ok(record) => {
                self.recovery.clear();
                info!(
                    "[WalkStore] Finished walk {} as #{} ({:.0}m, auto={})",
                    record.session.session_id, record.id, distance, auto
                );
                StopOutcome::Saved(record)
            }
            Err(e) => {
                warn!(
                    "[WalkStore] Could not save walk {} to history, keeping it for retry: {}",
                    session.session_id, e
                );
                self.pending_finalization.push(session.clone());
                self.recovery.save_pending(&self.pending_finalization);
                StopOutcome::Deferred(session)
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> &WalkState {
        &self.state
    }

    pub fn session(&self) -> Option<&WalkSession> {
        self.state.session()
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, WalkState::Tracking(_))
    }

    pub fn history(&self) -> &WalkHistoryRepository {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut WalkHistoryRepository {
        &mut self.history
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn pending_finalization(&self) -> &[WalkSession] {
        &self.pending_finalization
    }

    /// Current session as JSON (for UI layers that consume JSON).
    pub fn session_json(&self) -> String {
        match self.session() {
            Some(session) => serde_json::to_string(session).unwrap_or_else(|_| "null".to_string()),
            None => "null".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
