//! Fixture data management for an ephemeral database instance.
//!
//! A [`FixtureSet`] maps collection names to document sequences. The
//! [`FixtureManager`] loads, cleans, replays and drops fixture data through
//! a [`DocumentStore`], which the live engine implements via [`MongoStore`].

mod manager;
mod set;
mod store;

#[cfg(test)]
mod memory_store;

pub use manager::{FixtureManager, InsertCounts};
pub use set::FixtureSet;
pub use store::{DocumentStore, MongoStore, NAMESPACE_NOT_FOUND};
