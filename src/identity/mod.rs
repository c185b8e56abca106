//! Credential handling and upstream session management.
//! Keep the public surface thin and split implementation across sub-modules.

mod credentials;
mod provider;
mod renewal;
mod session;

#[cfg(test)]
pub(crate) mod fakes;

pub use credentials::{decode_basic, CredentialError, CredentialKey, Identity};
pub use provider::{fetch_all, paginate, SessionFactory, UpstreamSession, PAGE_SIZE};
pub use session::{CacheConfig, SessionCache};
