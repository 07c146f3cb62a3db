pub mod clock;
pub mod config;
pub mod cookies;
pub mod credentials;
pub mod duration;
pub mod engine;
pub mod extract;
pub mod heuristics;
pub mod outcome;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod transport;
