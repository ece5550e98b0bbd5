pub mod conversation_service;
pub mod message_service;
pub mod moderation;
pub mod status_tracker;
pub mod unread_counter;
pub mod user_directory;

pub use conversation_service::ConversationService;
pub use message_service::MessageService;
pub use moderation::{AllowAllModeration, KeywordModeration, ModerationGate, ModerationVerdict};
pub use status_tracker::StatusTracker;
pub use unread_counter::UnreadCounter;
pub use user_directory::{DirectoryUser, MemoryUserDirectory, PgUserDirectory, UserDirectory};
