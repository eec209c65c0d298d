// Testcard Services
// Business logic layer

mod ffmpeg_handler;
mod log_manager;
mod settings_manager;
mod stream_registry;

pub use ffmpeg_handler::*;
pub use log_manager::*;
pub use settings_manager::*;
pub use stream_registry::*;
