//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (route lookup, longest prefix first)
//!     → matcher.rs (segment-bounded prefix match + strip)
//!     → Return: matched Route or None
//!
//! Route Compilation (at startup):
//!     ServiceConfig[]
//!     → Parse target URLs once
//!     → Sort by prefix length
//!     → Freeze as immutable Router
//! ```

pub mod matcher;
pub mod router;

pub use router::{join_target, Route, Router, Target};
