use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    agents::AgentError,
    crew::CrewDocument,
    export::{render_pdf, DEFAULT_EXPORT_FILENAME},
    sequential::{PipelineResult, SequentialOrchestrator},
    template::RunInputs,
    LLMError,
};

pub struct AppState {
    orchestrator: SequentialOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: SequentialOrchestrator) -> Self {
        Self { orchestrator }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryRequest {
    pub movie_name: String,
    pub desired_ending: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub text: String,
    #[serde(flatten)]
    pub result: PipelineResult,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/agents", get(list_agents))
        .route("/api/summaries", post(create_summary))
        .route("/api/summaries/pdf", post(create_summary_pdf))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<ApiResponse<CrewDocument>> {
    Json(ApiResponse {
        data: state.orchestrator.crew().to_document(),
        message: None,
        success: true,
    })
}

pub async fn create_summary(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Response {
    let req = match parse_request(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    match run(&state, req).await {
        Ok(result) => Json(ApiResponse {
            data: Some(SummaryResponse {
                text: result.text(),
                result,
            }),
            message: None,
            success: true,
        })
        .into_response(),
        Err(err) => failure(err),
    }
}

pub async fn create_summary_pdf(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Response {
    let req = match parse_request(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };

    let result = match run(&state, req).await {
        Ok(result) => result,
        Err(err) => return failure(err),
    };

    match render_pdf(&result.text()) {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{DEFAULT_EXPORT_FILENAME}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "pdf export failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to export PDF: {}", e),
            )
        }
    }
}

fn parse_request(
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<SummaryRequest, Response> {
    match payload {
        Ok(Json(req)) => Ok(req),
        Err(rejection) => Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", rejection.body_text()),
        )),
    }
}

async fn run(state: &AppState, req: SummaryRequest) -> Result<PipelineResult, AgentError> {
    let inputs = RunInputs::new(req.movie_name, req.desired_ending);
    info!(movie = %inputs.movie_name, "summary requested");
    state.orchestrator.run(&inputs).await
}

/// HTTP status for a failed run.
pub fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::Template(_) => StatusCode::BAD_REQUEST,
        AgentError::ProviderTimeout | AgentError::Provider(LLMError::Timeout) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        AgentError::Provider(_) | AgentError::EmptyResponse(_) => StatusCode::BAD_GATEWAY,
        AgentError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::UnknownAgent(_) | AgentError::NoTasks => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: AgentError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "summary run failed");
    }
    error_response(status, format!("Execution error: {}", err))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ApiResponse {
            data: Option::<SummaryResponse>::None,
            message: Some(message),
            success: false,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::{FromRequest, State},
        http::{header, Request, StatusCode},
        response::{IntoResponse, Json},
    };

    use super::{create_summary, create_summary_pdf, list_agents, status_for, AppState, SummaryRequest};
    use crate::{
        agents::AgentError,
        crew::Crew,
        providers::scripted::ScriptedProvider,
        sequential::SequentialOrchestrator,
        LLMError,
    };

    fn state(provider: ScriptedProvider) -> Arc<AppState> {
        let orchestrator = SequentialOrchestrator::new(
            Arc::new(provider),
            "model",
            Arc::new(Crew::movie_summary()),
        );
        Arc::new(AppState::new(orchestrator))
    }

    fn request(
        movie: &str,
        ending: &str,
    ) -> Result<Json<SummaryRequest>, axum::extract::rejection::JsonRejection> {
        Ok(Json(SummaryRequest {
            movie_name: movie.to_string(),
            desired_ending: ending.to_string(),
        }))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn lists_the_roster() {
        let response = list_agents(State(state(ScriptedProvider::echo())))
            .await
            .into_response();
        let body = body_json(response).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["agents"].as_array().unwrap().len(), 5);
        assert_eq!(body["data"]["tasks"][0]["name"], "plan_plot");
    }

    #[tokio::test]
    async fn summary_returns_final_text_and_steps() {
        let provider = ScriptedProvider::from_fn(|index, _| Ok(format!("step {index}")));
        let response = create_summary(State(state(provider)), request("Stree", "a twist")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["text"], "step 4");
        assert_eq!(body["data"]["movie_name"], "Stree");
        assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn blank_input_is_a_bad_request() {
        let response =
            create_summary(State(state(ScriptedProvider::echo())), request("  ", "ending")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("movie_name"));
    }

    #[tokio::test]
    async fn malformed_body_gets_the_error_envelope() {
        let raw = Request::builder()
            .method("POST")
            .uri("/api/summaries")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"movie_name":"Stree"}"#))
            .unwrap();
        let payload = Json::<SummaryRequest>::from_request(raw, &()).await;
        assert!(payload.is_err());

        let response = create_summary(State(state(ScriptedProvider::echo())), payload).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("desired_ending"));
    }

    #[tokio::test]
    async fn upstream_failure_is_bad_gateway() {
        let provider = ScriptedProvider::from_fn(|_, _| {
            Err(LLMError::Status {
                status: 503,
                message: "over capacity".into(),
            })
        });
        let response = create_summary(State(state(provider)), request("Stree", "twist")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn pdf_endpoint_returns_attachment() {
        let response =
            create_summary_pdf(State(state(ScriptedProvider::echo())), request("Stree", "twist"))
                .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("Generated_Movie_Script_Summary.pdf"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        assert_eq!(status_for(&AgentError::ProviderTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&AgentError::Provider(LLMError::Timeout)),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
