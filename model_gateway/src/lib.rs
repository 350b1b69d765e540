pub mod app_context;
pub mod attachments;
pub mod config;
pub mod gate;
pub mod history;
pub mod logging;
pub mod observability;
pub mod routers;
pub mod server;
pub mod version;
