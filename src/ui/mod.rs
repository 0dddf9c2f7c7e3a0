pub mod app;
pub mod chat;
