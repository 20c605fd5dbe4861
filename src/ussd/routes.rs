//! HTTP endpoints: the gateway callback plus read-only session inspection.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use super::router::UssdRouter;
use super::session::{GatewayRequest, UssdSession};
use crate::store::traits::SessionStore;

/// Shared state for USSD routes.
#[derive(Clone)]
pub struct UssdRouteState {
    pub router: Arc<UssdRouter>,
    pub sessions: Arc<dyn SessionStore>,
}

/// Session as exposed over the inspection API.
#[derive(Serialize)]
struct SessionView<'a> {
    #[serde(flatten)]
    session: &'a UssdSession,
    level_code: i64,
}

fn not_found(session_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": format!("Unknown session {session_id}")})),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "Session store unavailable"})),
    )
        .into_response()
}

/// POST /ait_ussd
///
/// Gateway callback. Answers with the `CON`/`END` text as plain text.
async fn gateway_callback(
    State(state): State<UssdRouteState>,
    Form(request): Form<GatewayRequest>,
) -> Response {
    match state.router.handle(&request).await {
        Ok(screen) => {
            if screen.ends_dialog() {
                debug!(session_id = %request.session_id, "USSD dialog ended");
            }
            screen.text().into_response()
        }
        Err(e) if e.is_client_error() => {
            warn!(session_id = %request.session_id, error = %e, "Rejected gateway request");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            error!(session_id = %request.session_id, error = %e, "USSD request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Service temporarily unavailable",
            )
                .into_response()
        }
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
    }))
}

/// GET /api/ussd/sessions/{id}
async fn get_session(
    State(state): State<UssdRouteState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get_session(&session_id).await {
        Ok(Some(session)) => Json(SessionView {
            level_code: session.level.code(),
            session: &session,
        })
        .into_response(),
        Ok(None) => not_found(&session_id),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to load session");
            internal_error()
        }
    }
}

/// GET /api/ussd/sessions/{id}/events
async fn list_events(
    State(state): State<UssdRouteState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get_session(&session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(&session_id),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to load session");
            return internal_error();
        }
    }
    match state.sessions.list_events(&session_id).await {
        Ok(events) => Json(serde_json::json!({
            "session_id": session_id,
            "events": events,
        }))
        .into_response(),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to list session events");
            internal_error()
        }
    }
}

/// Build the USSD routes.
pub fn ussd_routes(state: UssdRouteState) -> Router {
    Router::new()
        .route("/ait_ussd", post(gateway_callback))
        .route("/health", get(health))
        .route("/api/ussd/sessions/{id}", get(get_session))
        .route("/api/ussd/sessions/{id}/events", get(list_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phone::PhoneNormalizer;
    use crate::provisioning::{LocalProvisioning, PinHasher};
    use crate::store::LibSqlBackend;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    async fn app() -> Router {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let hasher = PinHasher::with_params(8, 1, 1).unwrap();
        let bridge = Arc::new(LocalProvisioning::new(db.clone(), hasher.clone()));
        let router = UssdRouter::new(db.clone(), bridge, PhoneNormalizer::new("254"), hasher);
        ussd_routes(UssdRouteState {
            router: Arc::new(router),
            sessions: db,
        })
    }

    fn gateway(form: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ait_ussd")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn gateway_returns_plain_text_menu() {
        let app = app().await;
        let resp = app
            .oneshot(gateway("sessionId=s1&phoneNumber=%2B254712345678&text="))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        assert_eq!(body_text(resp).await, "CON Welcome to Be.Well \n1. Register");
    }

    #[tokio::test]
    async fn gateway_walks_the_dialog() {
        let app = app().await;
        let resp = app
            .clone()
            .oneshot(gateway("sessionId=s1&phoneNumber=0712345678&text="))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(gateway(
                "sessionId=s1&phoneNumber=0712345678&text=1%2AJohn%2ADoe%2A01011990%2A1234%2A1234",
            ))
            .await
            .unwrap();
        assert_eq!(
            body_text(resp).await,
            "CON Thanks for signing up for Be.Well \n1. Opt out from marketing messages \n2. Change PIN"
        );
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let app = app().await;
        let resp = app.clone().oneshot(gateway("text=1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(gateway("sessionId=s1&phoneNumber=abc&text="))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_check() {
        let resp = app().await.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "ussd-onboarding");
    }

    #[tokio::test]
    async fn session_inspection() {
        let app = app().await;
        app.clone()
            .oneshot(gateway(
                "sessionId=s1&phoneNumber=0712345678&text=1%2AJohn%2ADoe%2A01011990%2A1234",
            ))
            .await
            .unwrap();

        let resp = app.clone().oneshot(get_request("/api/ussd/sessions/s1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["level"], "confirm_pin");
        assert_eq!(json["level_code"], 5);
        assert_eq!(json["phone_number"], "+254712345678");
        assert_eq!(json["first_name"], "John");
        assert_eq!(json["date_of_birth"], "1990-01-01");
        assert!(json.get("staged_pin").is_none());

        let resp = app
            .clone()
            .oneshot(get_request("/api/ussd/sessions/s1/events"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        let events = json["events"].as_array().unwrap();
        assert_eq!(events.first().unwrap()["kind"], "session_started");
        assert_eq!(events.last().unwrap()["kind"], "entered_pin");

        let resp = app.oneshot(get_request("/api/ussd/sessions/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_session_events_are_not_found() {
        let resp = app()
            .await
            .oneshot(get_request("/api/ussd/sessions/nope/events"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
