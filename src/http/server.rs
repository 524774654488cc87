//! HTTP surface: role selection, session start, query submission, mood
//! read/write, plot read, history read, session cleanup. Thin `warp`
//! filters over the domain layer: one shared handle per subsystem,
//! injected into every handler via a `with_state` filter.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::dialogue::{self, DialogueLog};
use crate::error::EngineError;
use crate::llm::provider::LlmProvider;
use crate::mood::{MoodStore, MoodVector};
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::persona::PersonaStore;
use crate::plot::state_machine::StateMachine;
use crate::plot::{models, window};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub clock: Arc<Clock>,
    pub personas: Arc<PersonaStore>,
    pub mood_store: Arc<MoodStore>,
    pub dialogue: Arc<DialogueLog>,
    pub durable: Arc<crate::store::durable::DurableStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub system_provider: Arc<dyn LlmProvider>,
    pub state_machine: Arc<StateMachine>,
}

/// Life-story warm-up: if this role already has an outline, check the
/// time-advancement trigger and drive the state machine forward. A role
/// with no outline yet (outline authoring is out of scope here) is left
/// untouched. Failures are logged, never surfaced to the session-start
/// caller — the next trigger retries.
async fn maybe_advance_life_story(state: &AppState, role_id: &str) {
    let outline = match models::latest_outline(&state.durable, role_id).await {
        Ok(Some(outline)) => outline,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(role_id, error = %e, "failed to load life outline for warm-up");
            return;
        }
    };

    let now = state.clock.now().await;
    let max_plot_date = match models::max_plot_date(&state.durable).await {
        Ok(date) => date,
        Err(e) => {
            tracing::warn!(role_id, error = %e, "failed to read max plot date for warm-up");
            return;
        }
    };

    if !StateMachine::should_advance(now.date_naive(), max_plot_date) {
        return;
    }

    let Some(persona) = state.personas.get_cached(role_id).await else {
        return;
    };
    let current_age = now.date_naive().year() - outline.birthday.year();
    let past_life_summary = std::fs::read_to_string(state.config.summary_path(role_id, &outline.role_name)).ok();

    if let Err(e) = state
        .state_machine
        .advance_for_outline(state.system_provider.as_ref(), &persona.persona_text, &outline, current_age, past_life_summary.as_deref(), now.date_naive())
        .await
    {
        tracing::warn!(role_id, error = %e, "life-story advancement failed, state left unchanged");
    }
}

#[derive(Debug)]
struct ApiError(EngineError);

impl warp::reject::Reject for ApiError {}

fn reject(e: EngineError) -> Rejection {
    warp::reject::custom(ApiError(e))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

#[derive(Debug, Deserialize)]
struct SelectRoleRequest {
    role_name: String,
    age: u32,
    #[serde(default)]
    initial_mood: Option<MoodVector>,
}

#[derive(Debug, Serialize)]
struct SelectRoleResponse {
    role_id: String,
    role_name: String,
    mood: MoodVector,
}

async fn select_role(role_id: String, body: SelectRoleRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let initial_mood = body.initial_mood.unwrap_or_else(|| {
        MoodVector { valence: 0.0, arousal: 0.2, intensity: 4, tags: Vec::new(), description: String::new() }.normalized()
    });

    let persona = state
        .personas
        .load(&role_id, &body.role_name, body.age, initial_mood.clone())
        .await
        .map_err(reject)?;

    let mood = match state.mood_store.get(&role_id).await {
        Ok(mood) => mood,
        Err(EngineError::RoleNotConfigured(_)) => {
            state.mood_store.set(&role_id, &persona.initial_mood).await.map_err(reject)?;
            persona.initial_mood.clone()
        }
        Err(e) => return Err(reject(e)),
    };

    Ok(warp::reply::json(&SelectRoleResponse { role_id: persona.role_id.clone(), role_name: persona.role_name.clone(), mood }))
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    user_name: String,
    role_id: String,
    role_name: String,
    #[serde(default)]
    force_new_session: bool,
}

async fn start_session(body: StartSessionRequest, state: AppState) -> Result<impl Reply, Rejection> {
    maybe_advance_life_story(&state, &body.role_id).await;

    let session = dialogue::resolve_session(&state.durable, &body.user_name, &body.role_id, &body.role_name, body.force_new_session)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&session))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    role_id: String,
    user_name: String,
    message: String,
}

async fn send_message(session_id: String, body: SendMessageRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let persona = state
        .personas
        .get_cached(&body.role_id)
        .await
        .ok_or_else(|| reject(EngineError::RoleNotConfigured(body.role_id.clone())))?;

    let outcome: TurnOutcome = state
        .orchestrator
        .handle_turn(&persona, &body.user_name, &session_id, &body.message)
        .await
        .map_err(reject)?;

    Ok(warp::reply::json(&outcome_json(&outcome)))
}

fn outcome_json(outcome: &TurnOutcome) -> serde_json::Value {
    serde_json::json!({
        "response": outcome.response,
        "tools_used": outcome.tools_used,
        "system_message": outcome.system_message,
        "session_id": outcome.session_id,
    })
}

async fn get_mood(role_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    let mood = state.mood_store.get(&role_id).await.map_err(reject)?;
    Ok(warp::reply::json(&mood))
}

async fn set_mood(role_id: String, body: MoodVector, state: AppState) -> Result<impl Reply, Rejection> {
    let mood = body.normalized();
    state.mood_store.set(&role_id, &mood).await.map_err(reject)?;
    Ok(warp::reply::json(&mood))
}

async fn get_plot(role_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    let now = state.clock.now().await;
    let lines = window::resolve(&state.config, &role_id, now);
    Ok(warp::reply::json(&serde_json::json!({ "lines": lines })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    10
}

async fn get_history(session_id: String, query: HistoryQuery, state: AppState) -> Result<impl Reply, Rejection> {
    let messages = state.dialogue.query(&session_id, query.limit).await;
    Ok(warp::reply::json(&messages))
}

async fn close_session(session_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    state.dialogue.flush(&session_id).await.map_err(reject)?;
    Ok(warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(ApiError(e)) = err.find() {
        let status = match e {
            EngineError::RoleNotConfigured(_) | EngineError::PersonaMissing(_) => StatusCode::NOT_FOUND,
            EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else {
        (StatusCode::BAD_REQUEST, format!("{err:?}"))
    };

    Ok(warp::reply::with_status(warp::reply::json(&serde_json::json!({ "error": message })), status))
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state_filter = with_state(state);

    let select_role = warp::post()
        .and(warp::path!("roles" / String / "select"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(select_role);

    let start_session = warp::post()
        .and(warp::path!("sessions"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(start_session);

    let send_message = warp::post()
        .and(warp::path!("sessions" / String / "messages"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(send_message);

    let get_mood = warp::get()
        .and(warp::path!("roles" / String / "mood"))
        .and(state_filter.clone())
        .and_then(get_mood);

    let set_mood = warp::put()
        .and(warp::path!("roles" / String / "mood"))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(set_mood);

    let get_plot = warp::get()
        .and(warp::path!("roles" / String / "plot"))
        .and(state_filter.clone())
        .and_then(get_plot);

    let get_history = warp::get()
        .and(warp::path!("sessions" / String / "history"))
        .and(warp::query::<HistoryQuery>())
        .and(state_filter.clone())
        .and_then(get_history);

    let close_session = warp::post()
        .and(warp::path!("sessions" / String / "close"))
        .and(state_filter)
        .and_then(close_session);

    select_role
        .or(start_session)
        .or(send_message)
        .or(get_mood)
        .or(set_mood)
        .or(get_plot)
        .or(get_history)
        .or(close_session)
        .recover(handle_rejection)
}
