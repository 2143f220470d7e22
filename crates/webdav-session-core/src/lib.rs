//! Core of a stateful WebDAV client session.
//!
//! This crate holds everything that does not touch the network directly:
//! - `token`: lock-token grammar (absolute URI, Coded-URL, `If` list)
//! - `uri`: location resolution and comparison keys
//! - `lock`: the per-session `LockRegistry`
//! - `listing`: PROPFIND multistatus to `ResourceDescriptor`s
//! - `xml`: reading and writing WebDAV XML bodies
//! - `exchange`: the `Exchange` trait a transport implements

mod error;
mod exchange;
mod listing;
mod lock;
mod property;
mod token;
mod types;
pub mod uri;
pub mod xml;

pub use error::{DavError, Result};
pub use exchange::{DavMethod, DavRequest, DavResponse, Exchange};
pub use listing::{decode, decode_self, ResourceDescriptor};
pub use lock::{HeldLock, LockAcquireResult, LockRegistry, LockReleaseResult};
pub use property::{DavProperty, PropertyDiff, QualifiedName, DAV_NS};
pub use token::{if_header, AbsoluteUri, CodedUrl, ConditionalList, LockToken};
pub use types::{Depth, LockRequest, LockScope, LockTimeout};
pub use xml::{ActiveLock, MultiStatus, MultiStatusEntry, PropStat};
