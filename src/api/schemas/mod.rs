pub mod attachments;
pub mod chat;
pub mod health;
