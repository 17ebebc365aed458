pub mod agent;
pub mod cancel;
pub mod chat;
pub mod config;
pub mod error;
pub mod hitl;
pub mod mentions;
pub mod stream;
pub mod tool;
pub mod world;
