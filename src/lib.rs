#![forbid(unsafe_code)]

pub mod archive;
pub mod clips;
pub mod config;
pub mod playback;
pub mod render;
pub mod twitch;
