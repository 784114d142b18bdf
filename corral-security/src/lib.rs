//! CORRAL Security - Authorization Snapshots
//!
//! ACLs live in an authoritative [`AclStore`](corral_storage::AclStore).
//! Reads go through a bounded-staleness cache holding an
//! [`AuthorizationSnapshot`], rebuilt wholesale by [`AclCacheLoader`] after
//! any mutation or once the staleness window runs out.

pub mod loader;
pub mod service;
pub mod snapshot;

pub use loader::AclCacheLoader;
pub use service::AclService;
pub use snapshot::{AclCache, AuthorizationSnapshot, PrincipalIndex, RepoKeyIndex};
