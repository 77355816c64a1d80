/// Snapshot of the status register.
///
/// ```text
///  bit:   7     6   5   4    3     2     1     0
///       | WPEN | - | - | - | BP1 | BP0 | WEL | WIP |
/// ```
///
/// Each field is decoded independently from a single RDSR response.
/// The snapshot is stale as soon as it is returned; call
/// `Eeprom::read_status()` again rather than holding on to one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Status {
    /// Raw register value as read from the device.
    pub raw: u8,
    /// Write-protect enable: with the WP pin low, the status register is read-only.
    pub wpen: bool,
    /// Block protect bit 1.
    pub bp1: bool,
    /// Block protect bit 0.
    pub bp0: bool,
    /// Write enable latch.
    pub wel: bool,
    /// Write in progress.
    pub wip: bool,
}

impl Status {
    const WPEN: u8 = 0b1000_0000;
    const BP1: u8 = 0b0000_1000;
    const BP0: u8 = 0b0000_0100;
    const WEL: u8 = 0b0000_0010;
    const WIP: u8 = 0b0000_0001;

    /// Decode a raw status register byte.
    pub fn from_byte(raw: u8) -> Self {
        Status {
            raw,
            wpen: raw & Self::WPEN != 0,
            bp1: raw & Self::BP1 != 0,
            bp0: raw & Self::BP0 != 0,
            wel: raw & Self::WEL != 0,
            wip: raw & Self::WIP != 0,
        }
    }

    /// Encode the writable fields back into a register byte.
    ///
    /// WEL and WIP are read-only and always encoded as 0.
    pub fn to_byte(&self) -> u8 {
        ((self.wpen as u8) << 7) | ((self.bp1 as u8) << 3) | ((self.bp0 as u8) << 2)
    }

    /// Get the current block protection setting.
    pub fn block_protect(&self) -> BlockProtect {
        match (self.bp1, self.bp0) {
            (false, false) => BlockProtect::None,
            (false, true) => BlockProtect::UpperQuarter,
            (true, false) => BlockProtect::UpperHalf,
            (true, true) => BlockProtect::All,
        }
    }

    /// Set the block protect bits.
    pub fn set_block_protect(&mut self, bp: BlockProtect) {
        let (bp1, bp0) = bp.bits();
        self.bp1 = bp1;
        self.bp0 = bp0;
    }
}

/// Array protection selected by the BP1:BP0 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockProtect {
    /// No write protection.
    None,
    /// Upper 1/4 of the array (0x18000..=0x1FFFF) is protected.
    UpperQuarter,
    /// Upper 1/2 of the array (0x10000..=0x1FFFF) is protected.
    UpperHalf,
    /// Whole array is protected.
    All,
}

impl BlockProtect {
    /// Returns (BP1, BP0).
    pub fn bits(self) -> (bool, bool) {
        match self {
            BlockProtect::None => (false, false),
            BlockProtect::UpperQuarter => (false, true),
            BlockProtect::UpperHalf => (true, false),
            BlockProtect::All => (true, true),
        }
    }
}

#[test]
fn test_status_decode() {
    let s = Status::from_byte(0b1000_1011);
    assert!(s.wpen);
    assert!(s.bp1);
    assert!(!s.bp0);
    assert!(s.wel);
    assert!(s.wip);
    assert_eq!(s.block_protect(), BlockProtect::UpperHalf);

    let s = Status::from_byte(0b0111_0000);
    assert_eq!(s, Status {
        raw: 0b0111_0000, wpen: false, bp1: false, bp0: false, wel: false, wip: false,
    });
}

#[test]
fn test_status_encode() {
    let mut s = Status::from_byte(0b1000_0011);
    // WEL and WIP never make it into the encoded byte.
    assert_eq!(s.to_byte(), 0b1000_0000);
    s.set_block_protect(BlockProtect::UpperQuarter);
    assert_eq!(s.to_byte(), 0b1000_0100);
    s.set_block_protect(BlockProtect::All);
    s.wpen = false;
    assert_eq!(s.to_byte(), 0b0000_1100);
    assert_eq!(Status::from_byte(s.to_byte()).block_protect(), BlockProtect::All);
}
