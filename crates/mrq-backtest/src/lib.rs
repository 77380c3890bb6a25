pub mod sim;
pub mod walk_forward;

pub use sim::{simulate, SimConfig};
pub use walk_forward::{run_walk_forward, split_windows};
