//! Gateway flow endpoints.
//!
//! Each endpoint validates its body, acquires a gateway token, posts a fresh
//! envelope to the operation's gateway URL, records the step on the caller's
//! flow record and relays the gateway response.
//!
//! | Route | Step | Record prefix |
//! |---|---|---|
//! | `POST /fetch-modes` | [`FlowStep::FetchModes`] | `fetch_` |
//! | `POST /generate-link-token` | [`FlowStep::LinkToken`] | `link_token_` |
//! | `POST /auth-init` | [`FlowStep::AuthInit`] | `auth_init_` |
//! | `POST /confirm-auth` | [`FlowStep::AuthConfirm`] | `auth_confirm_` |
//! | `POST /link-care-context` | [`FlowStep::LinkCareContext`] | `link_care_context_` |

mod envelope;
mod error;
mod gateway;
mod handlers;
mod request;

use axum::{Router, routing::post};

use crate::server::AppState;

pub use envelope::{Envelope, FlowStep};
pub use error::FlowError;
pub use gateway::{
    GatewayClient, GatewayResponse, HEADER_CM_ID, HEADER_REQUEST_ID, HEADER_TIMESTAMP,
};
pub use handlers::{
    PersistTarget, auth_init, confirm_auth, fetch_modes, generate_link_token, link_care_context,
};
pub use request::{DEFAULT_AUTH_MODE, PURPOSE_KYC_AND_LINK};

/// Flow routes, relative to the configured API prefix.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/fetch-modes", post(fetch_modes))
        .route("/generate-link-token", post(generate_link_token))
        .route("/auth-init", post(auth_init))
        .route("/confirm-auth", post(confirm_auth))
        .route("/link-care-context", post(link_care_context))
}
