pub mod config;
pub mod daemon;
pub mod error;
pub mod intent;
pub mod lsdb;
pub mod messages;
pub mod neighbor;
pub mod rib;
pub mod spf;

pub type RouterId = String;

pub use error::{Error, Result};
