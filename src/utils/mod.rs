mod pool;
mod seq16;

pub use pool::*;
pub use seq16::*;
