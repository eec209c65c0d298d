// Testcard Commands
// Operations behind the HTTP endpoints

mod stream;
mod system;

pub use stream::*;
pub use system::*;
