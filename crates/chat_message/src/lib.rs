pub mod message;

pub use message::{
    Button, InboundMessage, ListRow, ListSection, LogLevel, MediaKind, OutboundMessage,
    OutgoingEnvelope,
};
