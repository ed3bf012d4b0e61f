//! Identity-domain identifiers, scope sets, secrets, and signed-in users.

pub mod id;
pub mod scope;
pub mod secret;
pub mod user;

pub use id::*;
pub use scope::*;
pub use secret::*;
pub use user::*;
