pub mod auth;
pub mod error;
pub mod hotspots;
pub mod messages;
pub mod middleware;
pub mod posts;
pub mod users;

mod validate;
