//! replikit-api: REST API for replikit.
//!
//! Provides axum route handlers for managing fleets and replicas. Writes go
//! through the controller [`Client`], so admission webhooks apply to API
//! requests exactly as they do to the controllers.
//!
//! # API Routes
//!
//! All paths are relative to `/api/v1/namespaces/{namespace}`.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/fleets` | List fleets |
//! | POST | `/fleets` | Create a fleet |
//! | GET | `/fleets/{name}` | Get a fleet with its status |
//! | DELETE | `/fleets/{name}` | Delete a fleet (finalized by the controller) |
//! | POST | `/fleets/{name}/scale` | Change the desired replica count |
//! | GET | `/replicas` | List replicas, optionally `?fleet=<name>` |
//! | POST | `/replicas` | Create a replica |
//! | GET | `/replicas/{name}` | Get a replica |
//! | DELETE | `/replicas/{name}` | Delete a replica |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use replikit_controller::Client;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub client: Client,
}

/// Build the complete API router.
pub fn build_router(client: Client) -> Router {
    let api_state = ApiState { client };

    let namespaced = Router::new()
        .route("/fleets", get(handlers::list_fleets).post(handlers::create_fleet))
        .route("/fleets/{name}", get(handlers::get_fleet).delete(handlers::delete_fleet))
        .route("/fleets/{name}/scale", post(handlers::scale_fleet))
        .route("/replicas", get(handlers::list_replicas).post(handlers::create_replica))
        .route("/replicas/{name}", get(handlers::get_replica).delete(handlers::delete_replica))
        .with_state(api_state);

    Router::new().nest("/api/v1/namespaces/{namespace}", namespaced)
}
