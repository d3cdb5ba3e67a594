pub mod attachment_service;
pub mod chat_service;
pub mod directory;
pub mod fanout;
pub mod gateway;
pub mod health_service;
pub mod message_store;
pub mod presence_service;
pub mod rate_limit_service;
