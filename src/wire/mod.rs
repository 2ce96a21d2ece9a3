pub mod frame;
pub mod params;

pub use frame::{read_frame, write_frame};
pub use params::Cell;
