mod controller;
mod state;

pub use controller::ProgressSession;
pub use state::{FlushState, SessionSnapshot};
