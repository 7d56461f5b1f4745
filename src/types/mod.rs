pub mod settings;
pub mod trading;

pub use settings::*;
pub use trading::*;
