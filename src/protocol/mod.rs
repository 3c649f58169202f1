pub mod envelope;
pub mod frame;

pub use envelope::*;
pub use frame::*;
