pub mod session;

pub use session::{ChatBackend, ChatSession, DELEGATE_TOOL};
