pub mod link;
pub mod terminal;
pub mod transcript;

pub use link::{Link, LinkProvider, SerialLink, SerialLinkProvider};
pub use terminal::{SerialSession, SerialSubscriber, SessionTiming, TerminalState, BAUD_RATES};
pub use transcript::{display_text, Transcript, ACK, DEFAULT_MAX_TRANSCRIPT_LEN, NAK};
