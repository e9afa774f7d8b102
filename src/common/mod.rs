//! Miscellaneous common structs used throughout the library.

mod finger_table;
mod id;
mod keystore;
pub mod messages;
mod node;

pub use finger_table::*;
pub use id::*;
pub use keystore::*;
pub use messages::*;
pub use node::*;
