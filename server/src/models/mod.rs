// Testcard Models
// Data structures for the application

mod settings;
mod encoding_profile;
mod stream_target;
mod stream_record;
mod output_buffer;

pub use settings::*;
pub use encoding_profile::*;
pub use stream_target::*;
pub use stream_record::*;
pub use output_buffer::*;
