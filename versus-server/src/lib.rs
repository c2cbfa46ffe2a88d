//! Server core of a real time two player versus game: login, matchmaking, live sessions
//! relayed over web sockets, results and rematches.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod connections;
pub mod directory;
pub mod error;
pub mod locks;
pub mod matchmaking;
pub mod model;
pub mod orchestrator;
pub mod routes;
pub mod socket;
pub mod storage;
pub mod testing;

pub use app_state::{AppState, Stores};
pub use config::ServerConfig;
pub use error::ServerError;
