//! HTTP Handlers

mod command;
mod jobs;
mod ping;
mod websocket;

pub use command::*;
pub use jobs::*;
pub use ping::*;
pub use websocket::*;
