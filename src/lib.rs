// Library exports for Threadline
// This allows integration tests and the client to use Threadline modules

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod forum;
pub mod realtime;
pub mod routes;
pub mod state;
pub mod storage;
