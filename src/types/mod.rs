pub mod bar;
pub mod sector;

pub use bar::*;
pub use sector::*;
