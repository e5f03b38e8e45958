//! Common decoder types and enums

use std::fmt;

/// Kind tag of a decoded protocol symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SymbolKind {
    Select,
    Deselect,
    /// Command/address word; payload is the raw word
    CommandAddress,
    /// Latency cycles between command and data
    Wait,
    Data,
    #[default]
    Error,
}

/// One decoded protocol event occupying one timeline slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Symbol {
    pub kind: SymbolKind,
    /// Meaning depends on `kind`
    pub data: u64,
}

impl Symbol {
    pub fn new(kind: SymbolKind, data: u64) -> Self {
        Self { kind, data }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            SymbolKind::Select => write!(f, "SELECT"),
            SymbolKind::Deselect => write!(f, "DESELECT"),
            SymbolKind::CommandAddress => write!(f, "{}", CommandAddress::decode(self.data)),
            SymbolKind::Wait => write!(f, "WAIT"),
            SymbolKind::Data => write!(f, "{:02x}", self.data),
            SymbolKind::Error => write!(f, "ERROR"),
        }
    }
}

/// Fields of a 48-bit HyperBus command/address word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAddress {
    pub read: bool,
    pub register_space: bool,
    pub linear: bool,
    /// 16-bit word address
    pub address: u32,
}

impl CommandAddress {
    /// Split a CA word.
    ///
    /// Bit 47 is R/W#, bit 46 the address space, bit 45 the burst type.
    /// The word address is the upper column/row bits `[44:16]` followed by
    /// the lower column bits `[2:0]`.
    pub fn decode(word: u64) -> Self {
        let upper = (word >> 16) & 0x1FFF_FFFF;
        let lower = word & 0x7;
        Self {
            read: word & (1 << 47) != 0,
            register_space: word & (1 << 46) != 0,
            linear: word & (1 << 45) != 0,
            address: ((upper << 3) | lower) as u32,
        }
    }
}

impl fmt::Display for CommandAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {:08x} {}",
            if self.read { "Read" } else { "Write" },
            if self.register_space { "reg" } else { "mem" },
            self.address,
            if self.linear { "linear" } else { "wrapped" }
        )
    }
}

/// SPI clock polarity and phase modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0: Clock idle low, sample on rising edge
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1: Clock idle low, sample on falling edge
    Mode1,
    /// CPOL=1, CPHA=0: Clock idle high, sample on falling edge
    Mode2,
    /// CPOL=1, CPHA=1: Clock idle high, sample on rising edge
    Mode3,
}

impl SpiMode {
    pub const ALL: [SpiMode; 4] = [SpiMode::Mode0, SpiMode::Mode1, SpiMode::Mode2, SpiMode::Mode3];

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    /// Whether data is sampled on the rising clock edge
    pub fn samples_on_rising(self) -> bool {
        matches!(self, SpiMode::Mode0 | SpiMode::Mode3)
    }
}

impl fmt::Display for SpiMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mode {}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ca_flags() {
        let ca = CommandAddress::decode(0xA000_0000_0000);
        assert!(ca.read);
        assert!(!ca.register_space);
        assert!(ca.linear);
        assert_eq!(ca.address, 0);

        let ca = CommandAddress::decode(0x4000_0000_0000);
        assert!(!ca.read);
        assert!(ca.register_space);
        assert!(!ca.linear);
    }

    #[test]
    fn test_decode_ca_address() {
        // Upper bits 0x200, lower bits 0x5
        let word = (0x200u64 << 16) | 0x5;
        assert_eq!(CommandAddress::decode(word).address, (0x200 << 3) | 0x5);
    }

    #[test]
    fn test_symbol_labels() {
        assert_eq!(Symbol::new(SymbolKind::Select, 0).to_string(), "SELECT");
        assert_eq!(Symbol::new(SymbolKind::Data, 0xa5).to_string(), "a5");
        assert_eq!(Symbol::new(SymbolKind::Data, 0x7).to_string(), "07");
        let word = (1u64 << 47) | (1 << 45) | (0x200 << 16);
        assert_eq!(
            Symbol::new(SymbolKind::CommandAddress, word).to_string(),
            "Read mem 00001000 linear"
        );
    }

    #[test]
    fn test_spi_mode_codes() {
        assert_eq!(SpiMode::from_code(2), Some(SpiMode::Mode2));
        assert_eq!(SpiMode::from_code(4), None);
        assert_eq!(SpiMode::from_code(-1), None);
        assert!(SpiMode::Mode3.samples_on_rising());
        assert!(!SpiMode::Mode1.samples_on_rising());
        assert_eq!(SpiMode::Mode1.to_string(), "Mode 1");
    }
}
