//! Process groups: the collectives data-parallel training needs to keep every
//! rank's replica of the model identical.

mod communicator;
mod local;
mod tcp;

pub use communicator::Communicator;
pub use local::LocalGroup;
pub use tcp::TcpGroup;

use std::io;

/// The rank that reduces, broadcasts and owns the shared side effects.
pub const ROOT: usize = 0;

fn length_mismatch<T>(got: usize, expected: usize) -> io::Result<T> {
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("collective buffer length mismatch: got {got}, expected {expected}"),
    ))
}
