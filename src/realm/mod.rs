//! Realm handles
//!
//! - `Environment` - Explicit registry of open files and cached realms
//! - `Realm` - Thread-bound handle: reads, writes, refresh, events
//! - `Results` - Live collections observed through a realm

mod environment;
#[allow(clippy::module_inception)]
mod realm;
mod results;

pub use environment::Environment;
pub use realm::{Realm, RealmEvent, RealmTransaction};
pub use results::Results;
