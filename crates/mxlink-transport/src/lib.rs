//! Hardware seams for the mxlink SPI link.
//!
//! This is the lowest layer of mxlink. It names what the link needs from the
//! board and nothing more:
//! - a full-duplex SPI master ([`SpiBus`])
//! - the chip-select, notify and flow-control lines ([`LinkPins`])
//! - the interrupt side of those lines as level-latched signals ([`LinkSignals`])
//! - network buffers and their allocator ([`NetBuffer`], [`BufferAllocator`])

pub mod buffer;
pub mod error;
pub mod signal;
pub mod traits;

pub use buffer::{BoundedAllocator, BufferAllocator, HeapAllocator, NetBuffer};
pub use error::{Result, TransportError};
pub use signal::{IrqLine, LinkSignals, Signal};
pub use traits::{check_duplex_lengths, LinkPins, SpiBus};
