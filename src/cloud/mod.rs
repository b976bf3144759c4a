//! Abstract interfaces onto the OpenStack REST APIs this daemon drives.
//!
//! Per the design brief these are external collaborators: the core
//! volume-lifecycle logic in `provider`/`connector` is written against the
//! traits here, never against a concrete HTTP client, so tests can substitute
//! fakes. The `reqwest`-backed implementations are intentionally thin.

pub mod block;
pub mod compute;
pub mod http;
pub mod identity;
pub mod share;

pub use block::BlockClient;
pub use compute::ComputeClient;
pub use http::{CinderHttpClient, ManilaHttpClient, NovaHttpClient};
pub use identity::IdentitySession;
pub use share::ShareClient;
