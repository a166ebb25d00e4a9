// ABOUTME: Root library module for the Misskey channel plugin
// ABOUTME: Gateway, inbound delivery, outbound sends, agent tools, slash commands, and a standalone host

pub mod channel;
pub mod commands;
pub mod gateway;
pub mod inbound;
pub mod local_host;
pub mod outbound;
pub mod plugin;
pub mod tools;

// Re-export the bridge and host contracts
pub use mkclaw_bridge as bridge;
pub use mkclaw_core::config;
pub use mkclaw_core::paths;
pub use mkclaw_core::registry;
pub use mkclaw_core::traits;

pub use channel::MisskeyChannel;
pub use gateway::{Gateway, GatewayState};
pub use plugin::register;
