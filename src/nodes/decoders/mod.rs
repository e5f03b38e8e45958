//! Protocol decoder filters
//!
//! Decoders merge several digital inputs into one event timeline (see
//! [`cursor`]) and emit [`Symbol`]s on a protocol output stream.

pub mod cursor;
pub mod hyperram;
pub mod spi;
pub mod types;

// Re-export common types
pub use types::{CommandAddress, SpiMode, Symbol, SymbolKind};

// Re-export decoders
pub use hyperram::HyperRamDecoder;
pub use spi::SpiDecoder;
