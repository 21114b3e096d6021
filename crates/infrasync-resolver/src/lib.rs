//! # infrasync Resolver
//!
//! Cross-source identity resolution. Sources report the same physical
//! estate under different identifiers — the MDM service knows a laptop
//! by serial, the firewall by hostname, the endpoint console by agent
//! UUID. This crate decides which sightings are the same real-world
//! object and folds them into one logical entity per object.
//!
//! ## How resolution works
//!
//! 1. Extract each sighting's candidate [`AliasKey`]s (kind-specific,
//!    priority-ordered).
//! 2. Union sightings that share any candidate key in a [`DisjointSet`]
//!    — merging is transitive across the alias graph.
//! 3. Fold each group with the [`PrecedenceTable`]: a fixed per-attribute
//!    source priority picks winners, recency breaks ties, losers stay on
//!    the record as provenance.
//!
//! Under-merging is preferred to over-merging throughout: a sighting
//! with no matching key stays a singleton, and groups that would collide
//! on a natural key are kept separate under a disambiguated key. Wrongly
//! splitting one device into two is recoverable; silently conflating two
//! distinct devices is not.

pub mod alias;
pub mod dsu;
pub mod merge;

pub use alias::{alias_keys, AliasKey};
pub use dsu::DisjointSet;
pub use merge::{PrecedenceTable, Resolver};
