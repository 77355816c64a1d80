use core::fmt;

/// Hex dump of memory contents for diagnostics.
///
/// Renders 16 bytes per line, prefixed by the 24-bit address of the
/// first byte and followed by the printable ASCII characters, e.g.:
///
/// ```text
/// 000000: 61 62 63 64 65 66 FF FF FF FF FF FF FF FF FF FF  abcdef..........
/// ```
#[derive(Copy, Clone, Debug)]
pub struct HexDump<'a> {
    pub address: u32,
    pub data: &'a [u8],
}

impl<'a> HexDump<'a> {
    pub fn new(address: u32, data: &'a [u8]) -> Self {
        HexDump { address, data }
    }
}

impl<'a> fmt::Display for HexDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, line) in self.data.chunks(16).enumerate() {
            write!(f, "{:06X}: ", self.address as usize + idx * 16)?;
            for byte in line {
                write!(f, "{:02X} ", byte)?;
            }
            for _ in line.len()..16 {
                f.write_str("   ")?;
            }
            f.write_str(" ")?;
            for &byte in line {
                let c = if (0x20..=0x7E).contains(&byte) { byte as char } else { '.' };
                write!(f, "{}", c)?;
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
#[test]
fn test_hexdump() {
    let mut data = b"abcdef".to_vec();
    data.extend(std::iter::repeat(0xFF).take(10));
    data.extend(&[0x00, 0x41, 0x7F]);
    let dump = HexDump::new(0x01_FF00, &data).to_string();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        "01FF00: 61 62 63 64 65 66 FF FF FF FF FF FF FF FF FF FF  abcdef.........."
    );
    assert_eq!(
        lines[1],
        format!("01FF10: 00 41 7F {} .A.", " ".repeat(39))
    );
    assert_eq!(HexDump::new(0, &[]).to_string(), "");
}
