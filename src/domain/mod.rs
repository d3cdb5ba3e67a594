pub mod auth;
pub mod codec;
pub mod conversation;
pub mod message;
pub mod presence;
