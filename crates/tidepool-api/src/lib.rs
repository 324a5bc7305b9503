//! tidepool-api: HTTP API of the manage server.
//!
//! Thin axum handlers over [`ServiceLifecycle`]. Mutations answer `200` with
//! an empty body; failures answer a plain-text message with the status of
//! the error's kind.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/catalog/{service_type}` | Create a service |
//! | PUT | `/v1/catalog/{service_type}` | Update a service's config |
//! | POST | `/v1/catalog/init` | Complete service initialization |
//! | GET | `/v1/catalog/init/{service_name}` | Check service initialization |
//! | GET | `/v1/services/{service_name}` | Get service attributes |

pub mod error;
pub mod handlers;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tidepool_manage::ServiceLifecycle;
use tracing::Instrument;
use uuid::Uuid;

pub use error::ApiError;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: ServiceLifecycle,
}

pub fn build_router(lifecycle: ServiceLifecycle) -> Router {
    let state = ApiState { lifecycle };

    let v1 = Router::new()
        .route("/catalog/init", post(handlers::set_service_init))
        .route("/catalog/init/{service_name}", get(handlers::check_service_init))
        .route(
            "/catalog/{service_type}",
            post(handlers::create_service).put(handlers::update_service),
        )
        .route("/services/{service_name}", get(handlers::get_service_attr))
        .with_state(state);

    Router::new()
        .nest("/v1", v1)
        .layer(middleware::from_fn(request_span))
}

/// Run each request inside a span carrying a fresh request id.
async fn request_span(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    async move {
        let resp = next.run(req).await;
        tracing::debug!(status = resp.status().as_u16(), "request finished");
        resp
    }
    .instrument(span)
    .await
}
