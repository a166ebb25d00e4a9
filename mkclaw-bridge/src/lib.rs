// ABOUTME: Process bridge for the Misskey `what` CLI.
// ABOUTME: Spawns `what stream`, re-emits its JSONL feed as typed events, and runs one-shot commands.

pub mod actions;
pub mod bridge;
pub mod command;
pub mod event;
pub mod hub;
pub mod note;
pub mod reconnect;

pub use actions::{
    MediaPostOptions, PostOptions, ReplyOptions, TimelineKind, UploadOptions, DEFAULT_LIMIT,
};
pub use bridge::{BridgeConfig, MisskeyCli, StreamOptions, DEFAULT_BINARY};
pub use command::{CommandResult, DEFAULT_COMMAND_TIMEOUT};
pub use event::{BridgeEvent, EventKind, NotePayload, StreamEvent};
pub use hub::{EventFilter, EventHub, EventReceiver};
pub use note::{Note, NoteUser, Visibility};
pub use reconnect::{ReconnectPolicy, ReconnectState};
