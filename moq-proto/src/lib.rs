mod coding;
mod control;
mod error;
mod frame;
mod group;
mod parameters;
mod setup;
mod stream_type;
mod varint;

pub use coding::*;
pub use control::*;
pub use error::*;
pub use frame::*;
pub use group::*;
pub use parameters::*;
pub use setup::*;
pub use stream_type::*;
pub use varint::*;
