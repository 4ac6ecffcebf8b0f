mod cors;
mod error;
mod handlers;
mod middleware;
mod params;
mod payload;
mod router;
mod state;
mod views;


pub use cors::CorsPolicy;
pub use router::app_router;
pub use state::AppState;
