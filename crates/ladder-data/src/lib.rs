pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{DataLoadError, LadderData, load_ladder_data};
pub use settings::{RuntimeSettings, SummaryFormat};
