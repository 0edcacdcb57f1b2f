pub mod error;
pub mod stream;

pub use error::CodeStreamError;
pub use stream::CodeStream;
