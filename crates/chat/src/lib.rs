#![deny(unsafe_code)]

/// Terminal front end driving a chat session.
pub mod app;
/// Chat domain: transcript, stream lifecycle and the session.
pub mod chat;
pub mod notification;
pub mod render;
/// Settings persistence.
pub mod settings;
pub mod upload;
