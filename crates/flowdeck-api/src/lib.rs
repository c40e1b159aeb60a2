pub mod auth;
pub mod error;
pub mod realtime;
pub mod rest;
pub mod routes;
pub mod seed;
pub mod server;
pub mod services;
pub mod state;

pub use error::*;
pub use routes::*;
pub use server::*;
pub use state::*;
