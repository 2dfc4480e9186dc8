pub mod child_job;
pub mod command_line;
pub mod config;
pub mod deferred;
pub mod engine;
pub mod event_loop;
pub mod logging;
pub mod mode;
pub mod paths;
pub mod platform;
pub mod preferences;
pub mod session;
pub mod types;
pub mod window;

pub use mode::ExecutionMode;
pub use preferences::app_preferences;
pub use session::{startup, Session, Startup};
