pub mod history;
pub mod registry;
pub mod subscriber;
pub mod topic;

pub use registry::*;
pub use topic::*;
