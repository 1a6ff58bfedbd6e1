//! Domain types shared by the checker and the recorder.

mod result;
mod target;

pub use result::*;
pub use target::*;
