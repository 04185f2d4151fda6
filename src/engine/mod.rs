pub mod bigram;
pub mod mode;
pub mod profile;
pub mod ranking;
pub mod scoring;
pub mod selector;

pub use mode::{Mode, ModeOverride, ModeSource, resolve_mode};
pub use profile::{BigramCounts, LetterCounts, WeakBigramProfile};
pub use selector::{Selection, SelectionRequest, Strategy};
