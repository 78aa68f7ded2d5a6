use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{
    modules,
    web::{AppState, auth, uploads::PUBLIC_PREFIX},
};

pub fn build_router(state: AppState) -> Router {
    let upload_dir = state.config().upload_dir.clone();
    let body_limit = state.config().max_upload_bytes;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .merge(modules::training_videos::router(state.clone()))
        .merge(modules::question_papers::router(state.clone()))
        .merge(modules::assignments::router(state.clone()))
        .merge(modules::joining_forms::router(state.clone()))
        .nest_service(PUBLIC_PREFIX, ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::{
        auth::issue_token,
        test_support::{empty_request, json_request, multipart_request, offline_state, send},
    };
    use chrono::Duration;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn healthz_is_ok() {
        let dir = tempdir().expect("temp dir");
        let app = build_router(offline_state(dir.path()));

        let (status, _) = send(&app, empty_request("GET", "/healthz", None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_require_bearer_token() {
        let dir = tempdir().expect("temp dir");
        let app = build_router(offline_state(dir.path()));

        for (method, uri) in [
            ("GET", "/hr/"),
            ("GET", "/hr"),
            ("DELETE", "/hr/training-video/1"),
            ("GET", "/hr/get-question-paper"),
            ("GET", "/hr/get-question-paper/P1"),
            ("DELETE", "/hr/delete-question-paper/P1"),
            ("GET", "/hr/assign-paper/E1"),
            ("GET", "/joining/forms"),
            ("DELETE", "/joining/form/3"),
        ] {
            let (status, body) = send(&app, empty_request(method, uri, None)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(body["error"], "Missing or invalid Authorization header");
        }
    }

    #[tokio::test]
    async fn guards_run_before_multipart_handlers() {
        let dir = tempdir().expect("temp dir");
        let app = build_router(offline_state(dir.path()));

        let request = multipart_request(
            "POST",
            "/hr/training-video",
            None,
            &[("video", Some("intro.mp4"), "bytes")],
        );
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Nothing reached the upload directory.
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn malformed_and_expired_tokens_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let state = offline_state(dir.path());
        let secret = state.config().jwt_secret.clone();
        let app = build_router(state);

        let (status, body) = send(&app, empty_request("GET", "/hr/", Some("not-a-jwt"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or expired token");

        let expired = issue_token("EMP-1", &secret, Duration::minutes(-10)).expect("token");
        let (status, _) = send(&app, empty_request("GET", "/hr/", Some(expired.as_str()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = issue_token("EMP-1", "some-other-secret", Duration::hours(1)).expect("token");
        let (status, _) = send(&app, empty_request("GET", "/hr/", Some(forged.as_str()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signup_and_login_validate_required_fields() {
        let dir = tempdir().expect("temp dir");
        let app = build_router(offline_state(dir.path()));

        let (status, body) = send(&app, json_request("POST", "/auth/signup", None, json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "name is required");

        let payload = json!({
            "name": "Asha",
            "employeeID": "E1",
            "department": "HR",
            "designation": "Manager",
            "password": "pw",
            "shift": "A",
        });
        let (status, body) = send(&app, json_request("POST", "/auth/signup", None, payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().expect("message").contains("designation"));

        let (status, body) = send(
            &app,
            json_request("POST", "/auth/login", None, json!({ "employeeID": "E1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "password is required");
    }

    #[tokio::test]
    async fn malformed_json_bodies_render_error_envelope() {
        let dir = tempdir().expect("temp dir");
        let app = build_router(offline_state(dir.path()));

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/auth/signup")
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from("{not json"))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string(), "{body}");

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/auth/login")
            .body(axum::body::Body::from(r#"{"employeeID":"E1","password":"pw"}"#))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .expect("message")
                .contains("Content-Type"),
            "{body}"
        );

        let (status, body) = send(
            &app,
            json_request("POST", "/auth/login", None, json!({ "employeeID": 42 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string(), "{body}");
    }

    #[tokio::test]
    async fn uploads_are_served_statically() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join("abc_intro video.mp4"), b"frames").expect("write");
        let app = build_router(offline_state(dir.path()));

        let response = tower::ServiceExt::oneshot(
            app,
            empty_request("GET", "/uploads/abc_intro%20video.mp4", None),
        )
        .await
        .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&bytes[..], b"frames");
    }
}
