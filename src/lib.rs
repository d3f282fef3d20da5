//! castrelay: a multi-instance media ingest-and-fanout service. Acquires
//! video/audio from an encoder child process per instance, repackages its
//! output into self-describing container frames, caches enough history for
//! late joiners, and fans the stream out to WebSocket subscribers.

pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod instance;
pub mod media;
pub mod observer;
pub mod process;
pub mod registry;
pub mod router;
pub mod subscriber;
