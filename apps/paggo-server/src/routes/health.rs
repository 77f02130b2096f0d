//! Health check endpoints

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "paggo-server",
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::{test_state, TestEngine};
    use axum::http::StatusCode;
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_health_endpoints() {
        let ctx = test_state(TestEngine::Fixed("x")).await;
        let server = TestServer::new(crate::routes::app(ctx.state.clone())).unwrap();

        for path in ["/health", "/api/v1/health"] {
            let response = server.get(path).await;
            response.assert_status_ok();
            let body: serde_json::Value = response.json();
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["service"], "paggo-server");
        }
    }

    #[tokio::test]
    async fn test_documents_require_owner() {
        let ctx = test_state(TestEngine::Fixed("x")).await;
        let server = TestServer::new(crate::routes::app(ctx.state.clone())).unwrap();

        let response = server.get("/api/v1/documents").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "unauthorized");
    }
}
