mod matcher;
mod rules;
mod state;

pub use matcher::{InhibitionMatch, find_inhibition};
pub use rules::{InhibitRule, compile_rules};
pub use state::{InhibitionRecord, InhibitionState, StateMirror, StateSweepReport};
