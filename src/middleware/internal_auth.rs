//! Shared-secret check on the orchestrator's internal callback endpoints.
//!
//! Node-to-node auth only; user-facing authentication is outside this
//! system. The worker sends the secret in the X-Internal-Secret header.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::services::callback::INTERNAL_SECRET_HEADER;
use crate::utils::ApiError;

#[derive(Clone)]
pub struct InternalAuthState {
    pub shared_secret: String,
}

pub async fn internal_auth_middleware(
    State(state): State<InternalAuthState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(secret) if secret == state.shared_secret => next.run(request).await,
        Some(_) => {
            tracing::warn!("Internal callback with wrong shared secret rejected");
            ApiError::unauthorized("invalid internal secret").into_response()
        },
        None => ApiError::unauthorized("missing internal secret header").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, middleware as axum_middleware, routing::post};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = InternalAuthState { shared_secret: "s3cret".to_string() };
        Router::new()
            .route("/api/internal/ping", post(|| async { "pong" }))
            .layer(axum_middleware::from_fn_with_state(state, internal_auth_middleware))
    }

    #[tokio::test]
    async fn correct_secret_passes() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/internal/ping")
                    .header(INTERNAL_SECRET_HEADER, "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_is_unauthorized() {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/internal/ping")
                    .header(INTERNAL_SECRET_HEADER, "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/internal/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
