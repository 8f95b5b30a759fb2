pub mod tickets;
pub use self::tickets::*;
