pub mod query_session;
pub mod session;
pub mod sources;
pub mod stream;

pub use query_session::{QueryEvent, QueryOptions, QuerySession};
pub use session::{ChatSession, GenerateOptions, SessionError, SessionEvent, SessionState};
pub use sources::{PollSettings, SourceError, ValidationError};
