pub mod enums;
pub mod models;
#[cfg(feature = "postgres")]
pub mod schema;

pub use enums::*;
pub use models::*;
