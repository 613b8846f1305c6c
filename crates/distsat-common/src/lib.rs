#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared scalar types for the distributed SAT platform: job/application
//! identifiers, the solver verdict codes, the rolling checksum used on the
//! clause-sharing wire format, and small time helpers.

mod checksum;
mod ids;
mod params;
mod time;
mod verdict;

pub use checksum::Checksum;
pub use ids::{ApplicationKind, JobId, Priority, Revision};
pub use params::Params;
pub use time::PlatformClock;
pub use verdict::Verdict;
