// Livecast API Library
//
// HTTP front of the stream server: segment delivery, stream control and
// status endpoints

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
