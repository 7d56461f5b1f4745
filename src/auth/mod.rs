pub mod credential;
pub mod token_store;

pub use credential::*;
pub use token_store::*;
