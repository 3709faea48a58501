mod status;
pub mod streamers;

pub use status::*;
pub use streamers::*;
