pub mod chat;
pub mod notify;
