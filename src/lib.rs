pub mod api;
pub mod client;
pub mod controller;
pub mod controller_manager;
pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod resources;
pub mod state;

pub use error::{Error, Result};
