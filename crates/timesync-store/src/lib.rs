//! # timesync-store
//!
//! Persistence for users and timers.
//!
//! The server talks to storage only through the [`TimerRepository`] and
//! [`UserRepository`] traits. Two backends implement them: [`MemoryStore`]
//! for tests and throwaway instances, and [`Database`], a synchronous
//! `rusqlite` handle that runs schema migrations on open.

pub mod database;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod timers;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;
pub use repository::{Repository, TimerRepository, UserRepository};
