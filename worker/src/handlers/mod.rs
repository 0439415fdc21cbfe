mod status;

pub use status::{router, AppState};
