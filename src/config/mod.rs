pub mod load;
pub mod model;
pub mod save;

pub use load::{load_settings, ConfigSources};
pub use model::{ConfigFile, PassphraseSource, Settings};
