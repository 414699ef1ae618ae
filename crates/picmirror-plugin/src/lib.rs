//! PicMirror chat plugin
//!
//! The boundary to the host chat framework: typed message events, command
//! parsing, the request handler and the plugin lifecycle.

pub mod command;
pub mod event;
pub mod handler;
pub mod plugin;

pub use command::{help_text, Command};
pub use event::{MessageEvent, MessageSegment, OutgoingMessage, ReplySegment};
pub use handler::{HandleOutcome, MirrorHandler};
pub use plugin::{MirrorPlugin, PluginHost};
