pub mod conversation;
pub mod message;
pub mod status;

// Re-export for convenience
pub use conversation::{
    dedup_key, Conversation, ConversationSummary, ConversationUpdate, CordMode, EncryptedCord,
    Participant,
};
pub use message::{
    MediaRef, Message, MessageDraft, MessagePage, MessageUpdate, StatusRow, ValidatedDraft,
    MAX_TEXT_CHARS,
};
pub use status::DeliveryStatus;
