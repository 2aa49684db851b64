//! HTTP route handlers for the UI API.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fixer::core::types::{RunContext, RunOutcome};
use fixer::events::RunEvent;
use fixer::io::run_log::RunLog;
use fixer::looping::{LoopConfig, run_fix};
use fixer::model::AnyModel;
use fixer::tools::ToolRegistry;
use fixer::tools::fix::FixCodeTool;
use fixer::tools::github::{GitHubService, compose_issue_goal, register_repository_tools};

use crate::state::{AppState, RunEntry, RunLifecycle};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/runs", get(list_runs).post(start_run))
        .route("/runs/{run_id}", get(get_run))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/runs - list all known runs.
async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunEntry>> {
    Json(state.list_runs())
}

/// GET /api/runs/:run_id - get one run's entry.
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunEntry>, StatusCode> {
    state.get_run(&run_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub repository: String,
    pub issue: Option<u64>,
    pub goal: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: String,
}

/// POST /api/runs - start a run on a blocking worker thread.
///
/// Returns immediately with the run id; progress arrives on `/events`
/// and the terminal outcome lands in the run entry.
async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), (StatusCode, String)> {
    if request.issue.is_some() == request.goal.is_some() {
        return Err((
            StatusCode::BAD_REQUEST,
            "provide exactly one of issue or goal".to_string(),
        ));
    }

    let run_id = match request.issue {
        Some(number) => format!("issue-{number}"),
        None => adhoc_run_id(),
    };

    let inserted = state.try_insert_run(RunEntry {
        run_id: run_id.clone(),
        repository: request.repository.clone(),
        goal: request.goal.clone().unwrap_or_default(),
        lifecycle: RunLifecycle::Running,
        outcome: None,
    });
    if !inserted {
        return Err((
            StatusCode::CONFLICT,
            format!("run '{run_id}' is already in progress"),
        ));
    }

    info!(run_id = %run_id, repository = %request.repository, "starting run");
    let task_state = state.clone();
    let task_run_id = run_id.clone();
    tokio::task::spawn_blocking(move || {
        let outcome = execute_run(&task_state, &task_run_id, &request);
        task_state.finish_run(&task_run_id, outcome);
    });

    Ok((StatusCode::ACCEPTED, Json(StartRunResponse { run_id })))
}

/// Drive one full run on the current (blocking) thread.
///
/// Failures before the control loop starts still broadcast a terminal
/// event and produce a structured outcome.
fn execute_run(state: &AppState, run_id: &str, request: &StartRunRequest) -> RunOutcome {
    let fail = |summary: String, errors: Vec<String>| -> RunOutcome {
        let outcome = RunOutcome::error(summary, errors);
        let _ = state.event_tx.send(RunEvent::RunCompleted {
            run_id: run_id.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    };

    let cfg = &state.config;
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let service = match GitHubService::new(state.token.as_str(), timeout) {
        Ok(service) => Arc::new(service),
        Err(err) => return fail("Cannot construct GitHub client".to_string(), vec![format!("{err:#}")]),
    };

    if let Err(err) = service.verify_auth() {
        return fail(
            format!("Cannot authenticate to GitHub for {}", request.repository),
            vec![format!("{err:#}")],
        );
    }

    let goal = match request.issue {
        Some(number) => match service.get_issue(&request.repository, number) {
            Ok(issue) => compose_issue_goal(&issue),
            Err(err) => {
                return fail(
                    format!("Cannot fetch issue #{number} from {}", request.repository),
                    vec![format!("{err:#}")],
                );
            }
        },
        None => request.goal.clone().unwrap_or_default(),
    };
    state.set_run_goal(run_id, &goal);

    let ctx = RunContext {
        run_id: run_id.to_string(),
        goal,
        repository: request.repository.clone(),
        base_branch: cfg.base_branch.clone(),
    };

    let model = match AnyModel::from_config(cfg) {
        Ok(model) => Arc::new(model),
        Err(err) => return fail("Cannot construct model backend".to_string(), vec![format!("{err:#}")]),
    };

    let mut registry = ToolRegistry::new();
    register_repository_tools(&mut registry, service, &ctx);
    registry.register(Box::new(FixCodeTool::new(model.clone())));

    let run_log = match RunLog::create(&state.project_dir, &ctx.run_id) {
        Ok(log) => Some(log),
        Err(err) => {
            warn!(err = %err, "run log unavailable, continuing without artifacts");
            None
        }
    };

    let event_tx = state.event_tx.clone();
    run_fix(
        &ctx,
        &LoopConfig::from_config(cfg),
        model.as_ref(),
        &registry,
        run_log.as_ref(),
        move |event| {
            let _ = event_tx.send(event.clone());
        },
    )
}

fn adhoc_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("run-{millis}")
}
