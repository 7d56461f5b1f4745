pub mod buffer;
pub mod connection;
pub mod transport;

pub use buffer::*;
pub use connection::{ConnectionState, LiveConnection, CONNECTED_MESSAGE, DEFAULT_RECONNECT_DELAY};
pub use transport::*;
