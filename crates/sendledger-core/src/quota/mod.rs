//! Rolling-Window Quota Guard.

mod guard;
mod policy;
mod window;

pub use guard::{Acquired, Admission, LimitKind, Reservation, ScopeGroup, WAIT_JITTER_SECS};
pub use policy::{QuotaPolicy, QuotaScope, Saturation};
pub use window::{WindowStats, window_stats};
