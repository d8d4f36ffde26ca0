pub mod conversation;
pub mod member;
pub mod message;
pub mod user;

pub use conversation::{
    pair_key, AddParticipantsRequest, Conversation, ConversationSummary, ConversationType,
    CreateConversationRequest, NewConversation,
};
pub use member::{ConversationParticipant, MemberRole, NewParticipant};
pub use message::{
    EditMessageRequest, Message, MessagePageQuery, MessageType, NewMessage, SendMessageRequest,
    SuccessResponse,
};
pub use user::UserSummary;
