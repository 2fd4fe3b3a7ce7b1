//! Test-suite facade for an ephemeral database instance.
//!
//! [`TestDatabase`] combines the lifecycle controller and the fixture
//! manager behind the operations a test suite calls: `start`, `load`,
//! `get_collection`, `refresh`, `clean`, `drop`, `drop_all` and `stop`.
//!
//! [`unique_context`] gives parallel tests their own context, and thereby
//! their own working directory.

mod database;

pub use database::TestDatabase;

use std::sync::atomic::{AtomicU32, Ordering};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", prefix, id)
}

/// Context name unique to this process and call.
pub fn unique_context(prefix: &str) -> String {
    unique_id(&format!("{}-{}", prefix, std::process::id()))
}
