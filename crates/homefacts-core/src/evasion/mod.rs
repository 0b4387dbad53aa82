//! Evasion session manager.
//!
//! Scraping-tier adapters never talk to the network directly: they borrow an
//! [`IdentityLease`] from their [`IdentityPool`] and send through it, which
//! keeps pacing, header/cookie handling and rotation rules in one place.

mod cookies;
mod detect;
mod fingerprint;
mod identity;
mod pool;

pub use cookies::CookieJar;
pub use detect::BlockDetector;
pub use fingerprint::{FingerprintProfile, PacingWindow, PROFILES};
pub use identity::{Identity, IdentityState};
pub use pool::{
    CheckoutError, EvasionConfig, IdentityLease, IdentityPool, IdentityPoolBuilder, PoolStats,
    SendError,
};
