//! Token cache: deterministic keys, cache records, and the lookup engine over a
//! [`TokenCacheStore`](crate::store::TokenCacheStore).

pub mod item;
pub mod key;
pub mod lookup;

pub use item::*;
pub use key::*;
pub use lookup::*;
