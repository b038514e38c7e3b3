pub mod c;

pub use c::{CHeaderGenerator, CHeaderOptions};
