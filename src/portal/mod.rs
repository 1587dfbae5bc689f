//! Thames Water portal access.
//!
//! The portal exposes no public API; everything here replays what its web
//! frontend does over plain HTTP. `client` is the shared HTTP-exchange
//! layer (one client, one cookie jar), `auth` drives the scraped
//! OAuth2/PKCE login sequence, and `usage` fetches per-day meter readings
//! through the authenticated session.

mod auth;
mod client;
mod pkce;
mod usage;

pub use auth::{AuthSession, OAuthTokens};
pub use client::PortalHttp;
pub use pkce::PkceMaterial;
pub use usage::UsageClient;
