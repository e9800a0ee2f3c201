pub mod api;
pub mod common;
pub mod config;
pub mod extraction;
pub mod historical;
pub mod lmdb;
pub mod logging;
pub mod websocket;
