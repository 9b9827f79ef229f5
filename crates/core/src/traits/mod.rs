pub mod executor;
pub mod transport;

pub use executor::*;
pub use transport::*;
