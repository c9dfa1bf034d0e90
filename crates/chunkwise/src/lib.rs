#![doc = include_str!("../README.md")]

mod cache;
mod config;
mod dispatcher;
mod error;
mod filter;
mod gateway;
mod id;
mod intents;
mod manager;
mod model;
mod nonce;
mod registry;
mod request;
mod stream;


pub use crate::cache::*;
pub use crate::config::*;
pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::filter::*;
pub use crate::gateway::*;
pub use crate::id::*;
pub use crate::intents::*;
pub use crate::manager::*;
pub use crate::model::*;
pub use crate::nonce::*;
pub use crate::registry::*;
pub use crate::request::*;
pub use crate::stream::*;
