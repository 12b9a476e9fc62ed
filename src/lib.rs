pub mod cli_interface;
mod fs;
pub mod info;
pub mod mkfs;
pub mod mount;
pub mod utils;
pub use fs::*;
