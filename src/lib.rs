//! hopwire frame core
//!
//! Re-exports [`hopwire_frame`], which holds the frame, counted buffer and wire
//! serialization types shared by hopwire sockets.

pub use hopwire_frame as frame;

pub use frame::*;
