//! Adapters from `embedded-hal` 1.0 traits to [`Transport`] and [`ChipSelect`].
//!
//! ```ignore
//! let mut bus = HalTransport::new(spi, delay);
//! let mut cs = HalChipSelect::new(cs_pin)?;
//! let mut eeprom = Eeprom::new(&mut bus, &mut cs);
//! ```

use alloc::vec::Vec;
use core::fmt::Debug;
use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::{ChipSelect, Transport, TransportResult};

#[cfg(feature = "std")]
fn hal_error<E: Debug>(context: &'static str, e: E) -> anyhow::Error {
    anyhow::anyhow!("{}: {:?}", context, e)
}
#[cfg(not(feature = "std"))]
fn hal_error<E: Debug>(context: &'static str, e: E) -> crate::Error<()> {
    log::error!("{}: {:?}", context, e);
    crate::Error::Transport(())
}

/// Transport over an `embedded-hal` SPI bus, with a delay provider for sleeping.
///
/// The bus must already be set up for SPI mode 0 or 3.
pub struct HalTransport<SPI, D> {
    spi: SPI,
    delay: D,
}

impl<SPI: SpiBus<u8>, D: DelayNs> HalTransport<SPI, D> {
    pub fn new(spi: SPI, delay: D) -> Self {
        HalTransport { spi, delay }
    }

    /// Release the SPI bus and delay provider.
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }
}

impl<SPI: SpiBus<u8>, D: DelayNs> Transport for HalTransport<SPI, D> {
    fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        self.spi.write(data).map_err(|e| hal_error("SPI write failed", e))?;
        // Bytes must be on the wire before chip select is released.
        self.spi.flush().map_err(|e| hal_error("SPI flush failed", e))?;
        Ok(())
    }

    fn exchange(&mut self, data: &[u8]) -> TransportResult<Vec<u8>> {
        let mut rx = alloc::vec![0u8; data.len()];
        self.spi.transfer(&mut rx, data)
            .map_err(|e| hal_error("SPI transfer failed", e))?;
        self.spi.flush().map_err(|e| hal_error("SPI flush failed", e))?;
        Ok(rx)
    }

    fn sleep(&mut self, dur: Duration) {
        let us = u32::try_from(dur.as_micros()).unwrap_or(u32::MAX);
        self.delay.delay_us(us);
    }
}

/// Chip select driven from an `embedded-hal` output pin.
pub struct HalChipSelect<P> {
    pin: P,
}

impl<P: OutputPin> HalChipSelect<P> {
    /// Wrap `pin`, driving it high so the device starts deselected.
    pub fn new(mut pin: P) -> TransportResult<Self> {
        pin.set_high().map_err(|e| hal_error("Failed to set CS high", e))?;
        Ok(HalChipSelect { pin })
    }

    /// Release the output pin.
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> ChipSelect for HalChipSelect<P> {
    fn assert(&mut self) -> TransportResult<()> {
        self.pin.set_low().map_err(|e| hal_error("Failed to set CS low", e))
    }

    fn deassert(&mut self) -> TransportResult<()> {
        self.pin.set_high().map_err(|e| hal_error("Failed to set CS high", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorKind as PinErrorKind, ErrorType as PinErrorType};
    use embedded_hal::spi::ErrorType as SpiErrorType;

    /// SPI bus which echoes each byte back incremented by one.
    struct EchoBus {
        flushes: usize,
    }

    impl SpiErrorType for EchoBus {
        type Error = Infallible;
    }

    impl SpiBus<u8> for EchoBus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
            words.iter_mut().for_each(|w| *w = 0);
            Ok(())
        }

        fn write(&mut self, _words: &[u8]) -> Result<(), Infallible> {
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
            for (r, w) in read.iter_mut().zip(write) {
                *r = w.wrapping_add(1);
            }
            Ok(())
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
            words.iter_mut().for_each(|w| *w = w.wrapping_add(1));
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Infallible> {
            self.flushes += 1;
            Ok(())
        }
    }

    struct CountingDelay {
        ns: u64,
    }

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.ns += ns as u64;
        }
    }

    struct Pin {
        high: bool,
    }

    impl PinErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            Ok(())
        }
    }

    /// Output pin which refuses to be driven low.
    struct StuckPin;

    impl PinErrorType for StuckPin {
        type Error = PinErrorKind;
    }

    impl OutputPin for StuckPin {
        fn set_low(&mut self) -> Result<(), PinErrorKind> {
            Err(PinErrorKind::Other)
        }

        fn set_high(&mut self) -> Result<(), PinErrorKind> {
            Ok(())
        }
    }

    #[test]
    fn test_hal_transport() {
        let mut bus = HalTransport::new(EchoBus { flushes: 0 }, CountingDelay { ns: 0 });
        assert_eq!(bus.exchange(&[0x05, 0x00]).unwrap(), vec![0x06, 0x01]);
        bus.write(&[0x06]).unwrap();
        bus.sleep(Duration::from_micros(250));
        let (spi, delay) = bus.release();
        assert_eq!(spi.flushes, 2);
        assert_eq!(delay.ns, 250_000);
    }

    #[test]
    fn test_hal_chip_select() {
        let mut cs = HalChipSelect::new(Pin { high: false }).unwrap();
        assert!(cs.pin.high);
        cs.assert().unwrap();
        assert!(!cs.pin.high);
        cs.deassert().unwrap();
        assert!(cs.release().high);
    }

    #[test]
    fn test_hal_pin_error() {
        let mut cs = HalChipSelect::new(StuckPin).unwrap();
        let err = cs.assert().unwrap_err();
        #[cfg(feature = "std")]
        assert!(err.to_string().contains("Failed to set CS low"));
        #[cfg(not(feature = "std"))]
        assert!(matches!(err, crate::Error::Transport(())));
        cs.deassert().unwrap();
    }
}
