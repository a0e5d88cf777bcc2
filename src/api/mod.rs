pub mod auth;
mod handlers;
pub mod response;
mod routes;

pub use routes::create_router;
