pub mod log;
pub mod session;

pub use log::{DialogueLog, DialogueMessage, SenderType};
pub use session::{resolve_session, ChatSession};
