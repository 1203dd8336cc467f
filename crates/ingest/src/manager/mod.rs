mod case;
mod core;
mod events;
mod jobs;
mod messages;
mod workers;


pub use self::case::CaseEvent;
pub use self::core::{IngestManager, IngestManagerBuilder};
pub(crate) use self::core::ManagerShared;
