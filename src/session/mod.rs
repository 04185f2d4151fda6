pub mod input;
pub mod result;
pub mod state;

pub use input::{KeyEvent, ValidatedBatch, validate_batch};
pub use result::SessionReport;
pub use state::Session;
