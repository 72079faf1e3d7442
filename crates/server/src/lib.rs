//! The relay: aggregates playback sources behind a small HTTP API.

pub mod catalog;
pub mod context;
pub mod error;
pub mod routes;
pub mod server;
pub mod token;

pub use catalog::{catalog_from_config, CatalogLookup, CatalogMatch, HttpCatalog, NoCatalog};
pub use context::{CurrentResponse, MediaStatus, MobileStatus, PushPayload, RelayContext, RelayOptions};
pub use error::RelayError;
pub use server::RelayServer;
pub use token::resolve_api_token;
