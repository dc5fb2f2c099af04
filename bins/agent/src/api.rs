//! HTTP control surface.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use sdn::agent::Agent;
use sdn::model::NetworkModel;
use sdn::observe::HostInterfaces;

const GRAPHVIZ_CONTENT_TYPE: &str = "text/vnd.graphviz";

pub fn router<L: HostInterfaces + 'static>(agent: Agent<L>) -> Router {
    Router::new()
        .route(
            "/net-model.json",
            get(get_net_model::<L>).put(put_net_model::<L>),
        )
        .route("/net-config.gv", get(get_net_config::<L>))
        .route("/sdn-status.json", get(get_sdn_status::<L>))
        .layer(middleware::from_fn(log_request))
        .with_state(agent)
}

async fn log_request(req: Request, next: Next) -> Response {
    tracing::info!("HTTP request {} {}", req.method(), req.uri().path());
    next.run(req).await
}

async fn get_net_model<L: HostInterfaces + 'static>(
    State(agent): State<Agent<L>>,
) -> Json<NetworkModel> {
    Json(agent.net_model().await)
}

async fn put_net_model<L: HostInterfaces + 'static>(
    State(agent): State<Agent<L>>,
    body: String,
) -> Response {
    let model: NetworkModel = match serde_json::from_str(&body) {
        Ok(model) => model,
        Err(e) => {
            let msg = format!("failed to decode network model: {e}");
            tracing::warn!("{msg}");
            return (StatusCode::BAD_REQUEST, msg).into_response();
        }
    };
    match agent.apply_model(model).await {
        Ok(status) => {
            let msg = match status.config_errors.len() {
                0 => "network model applied\n".to_string(),
                n => format!("network model applied, {n} item(s) failed, see /sdn-status.json\n"),
            };
            (StatusCode::OK, msg).into_response()
        }
        Err(e) => {
            let code = if e.is_validation() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            tracing::warn!(status = %code, error = %e, "network model rejected");
            (code, format!("{e}\n")).into_response()
        }
    }
}

async fn get_net_config<L: HostInterfaces + 'static>(
    State(agent): State<Agent<L>>,
) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, GRAPHVIZ_CONTENT_TYPE)],
        agent.net_config_dot().await,
    )
}

async fn get_sdn_status<L: HostInterfaces + 'static>(
    State(agent): State<Agent<L>>,
) -> Json<sdn::model::SdnStatus> {
    Json(agent.status().await)
}
