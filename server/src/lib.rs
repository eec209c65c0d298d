// Testcard Server
// Launches time-bounded FFmpeg test-pattern streams to an RTMP ingest

pub mod commands;
pub mod models;
pub mod server;
pub mod services;
