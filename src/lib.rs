//! Client-side session and live-log layer for a remote automated trading
//! service.
//!
//! [`session::SessionContext`] ties together the persisted credential
//! ([`auth`]), the authenticated REST client ([`api`]) and the reconnecting
//! log stream ([`live`]).

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod live;
pub mod session;
pub mod types;

pub use error::{ConsoleError, Result};
pub use session::{SessionContext, SessionEvent, SessionSnapshot};
