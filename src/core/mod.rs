pub mod allocator;
pub mod archive;
pub mod codec;
pub mod config;
pub mod defrag;
pub mod descriptor;
pub mod encryption;
pub mod error;
pub mod header;
pub mod inventory;
pub mod io;
pub mod random;
pub mod range;
pub mod stream;
pub mod usersec;
pub mod wipe;

pub use archive::{Archive, FileWriter};
