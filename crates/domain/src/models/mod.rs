pub mod handoff;
pub mod node;
pub mod task;

pub use handoff::*;
pub use node::*;
pub use task::*;
