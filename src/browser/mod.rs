//! Headless browser management: executable discovery, launch, and the
//! pre-warmed context pool used by the dynamic fetch path.

pub mod launch;
pub mod pool;

pub use pool::{BrowserContext, BrowserPool, PoolOptions};
