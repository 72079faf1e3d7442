pub mod clock;
pub mod config;
pub mod model;
pub mod urls;

pub use clock::now_ms;
pub use config::{AppConfig, CatalogConfig, ClientConfig, HelperConfig, NotificationConfig, RelayConfig};
pub use model::{ExternalPushRecord, PlaybackSource, PlaybackState};
