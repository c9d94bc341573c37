//! Flagstone HTTP service.
//!
//! Two surfaces over one tenant store:
//!
//! - **Evaluation** (`POST /evaluate`, `POST /evaluate/{flag}`) — the
//!   high-traffic read path, gated by evaluation tokens.
//! - **Management** (`/api/...`) — definition reads, validated mutations
//!   and cross-environment sync, gated by management tokens.
//!
//! Tenants are selected per request via the `X-App-Id` / `X-Env-Id`
//! headers and default to `default` / `production`.

pub mod server;

pub use server::config::ServiceConfig;
pub use server::state::AppState;
pub use server::{create_router, run_serve};
