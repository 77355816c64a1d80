// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! eeprom-25lc
//!
//! This crate provides a driver for SPI serial EEPROMs in the style of the
//! Microchip 25LC1024: 1 Mbit of byte-addressable memory with 24-bit addresses,
//! 256-byte write pages, 32kB erase sectors, and writes gated by a write enable
//! latch and a write-in-progress status bit.
//!
//! The driver talks to the device through two collaborators: a [`Transport`]
//! which clocks bytes over the bus, and a [`ChipSelect`] line which brackets
//! each command frame.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
use alloc::vec::Vec;

use core::time::Duration;
#[cfg(feature = "std")]
use indicatif::{ProgressBar, ProgressStyle};

pub mod status;
pub mod dump;
mod erase_plan;
#[cfg(feature = "embedded-hal")]
pub mod hal;
#[cfg(test)]
mod mock;

pub use status::{BlockProtect, Status};
pub use dump::HexDump;

use erase_plan::ErasePlan;

/// Size of one write page in bytes.
pub const PAGE_SIZE: usize = 256;

/// Size of one erase sector in bytes.
pub const SECTOR_SIZE: usize = 32 * 1024;

/// Total memory capacity in bytes.
pub const CAPACITY: usize = 128 * 1024;

/// Default limit on status polls, well beyond the 6ms write cycle at any bus speed.
pub const DEFAULT_MAX_POLLS: u32 = 100_000;

/// Electronic signature returned by `release_power_down()` on the 25LC1024.
pub const SIGNATURE: u8 = 0x29;

#[cfg(feature = "std")]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Write of {length} bytes exceeds the 256-byte page size.")]
    InvalidArgument { length: usize },
    #[error("Address out of range for memory: 0x{address:06X}.")]
    InvalidAddress { address: u32 },
    #[error("Device still busy after {polls} status polls.")]
    Timeout { polls: u32 },
    #[error("Mismatch during readback verification.")]
    ReadbackError { address: u32, wrote: u8, read: u8 },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
#[cfg(not(feature = "std"))]
#[derive(Debug)]
pub enum Error<E> {
    InvalidArgument { length: usize },
    InvalidAddress { address: u32 },
    Timeout { polls: u32 },
    ReadbackError { address: u32, wrote: u8, read: u8 },

    Transport(E),
}

#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, Error>;
#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, Error<()>>;

#[cfg(feature = "std")]
pub type TransportResult<T> = anyhow::Result<T>;
#[cfg(not(feature = "std"))]
pub type TransportResult<T> = Result<T>;

/// Trait for the serial bus connected to the EEPROM.
///
/// Providers only need to implement `exchange()`, which writes all the bytes
/// in `data` and returns the same number of received bytes. If it provides a
/// performance optimisation, providers may also implement `write()`, which does
/// not require the received data.
///
/// Chip select is *not* handled by the transport; the driver drives the
/// [`ChipSelect`] line around each call.
pub trait Transport {
    /// Write all bytes in `data` to the bus.
    fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        // Default implementation uses `exchange()` and ignores the result data.
        self.exchange(data)?;
        Ok(())
    }

    /// Write all bytes in `data` while capturing received data.
    ///
    /// Returns the received data, which must be the same length as `data`.
    fn exchange(&mut self, data: &[u8]) -> TransportResult<Vec<u8>>;

    /// Block for `dur`, used between status polls.
    fn sleep(&mut self, dur: Duration);
}

/// Trait for the active-low chip select line of the EEPROM.
pub trait ChipSelect {
    /// Drive chip select low, starting a command frame.
    fn assert(&mut self) -> TransportResult<()>;

    /// Drive chip select high, ending a command frame.
    fn deassert(&mut self) -> TransportResult<()>;
}

/// SPI EEPROM.
///
/// This struct provides methods for interacting with a 25LC1024-style EEPROM.
/// It holds no device state between calls: the write enable latch and
/// write-in-progress flag are always read back from the device.
pub struct Eeprom<'a, T: Transport, C: ChipSelect> {
    transport: &'a mut T,
    cs: &'a mut C,

    /// Time to sleep between status polls while waiting for the device.
    poll_interval: Duration,

    /// Number of status polls after which waiting gives up, if any.
    max_polls: Option<u32>,
}

impl<'a, T: Transport, C: ChipSelect> Eeprom<'a, T, C> {
    #[cfg(feature = "std")]
    const DATA_PROGRESS_TPL: &'static str =
        " {msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}; {eta_precise})";
    #[cfg(feature = "std")]
    const DATA_PROGRESS_CHARS: &'static str = "=> ";

    /// Create a new Eeprom instance using the given transport and chip select line.
    ///
    /// Both must already be configured (SPI mode 0 or 3, clock rate, idle-high CS).
    pub fn new(transport: &'a mut T, cs: &'a mut C) -> Self {
        Eeprom {
            transport,
            cs,
            poll_interval: Duration::from_secs(0),
            max_polls: Some(DEFAULT_MAX_POLLS),
        }
    }

    /// Get the time slept between status polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Set the time slept between status polls.
    ///
    /// By default this is zero, and status is polled in a tight loop.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Get the maximum number of status polls before a wait times out.
    pub fn max_polls(&self) -> Option<u32> {
        self.max_polls
    }

    /// Set the maximum number of status polls before a wait times out.
    ///
    /// `None` waits indefinitely for an unresponsive device.
    /// A limit of zero is treated as one poll.
    pub fn set_max_polls(&mut self, max_polls: Option<u32>) {
        self.max_polls = max_polls;
    }

    /// Read `length` bytes of data from the EEPROM, starting at `address`.
    ///
    /// The address is not checked against the memory capacity; reads past
    /// the end wrap around in the device.
    pub fn read(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        log::trace!("Reading {} bytes from 0x{:06X}", length, address);
        self.exchange(Command::Read, &make_address(address), length)
    }

    /// Write up to one page of `data` starting at `address`.
    ///
    /// This only starts the write cycle. The write enable latch must already be
    /// set with `write_enable()`, and the device stays busy until the cycle
    /// completes; use `wait_while_busy()` before the next access.
    ///
    /// Writes which cross a page boundary wrap around to the start of the page.
    ///
    /// Returns `Error::InvalidArgument` without touching the bus if `data` is
    /// longer than one page.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_payload(data.len())?;
        log::trace!("Writing {} bytes to 0x{:06X}", data.len(), address);
        let mut tx = make_address(address).to_vec();
        tx.extend(data);
        self.send(Command::Write, &tx)
    }

    /// Send the WriteEnable command, setting the WEL in the status register.
    pub fn write_enable(&mut self) -> Result<()> {
        self.command(Command::WriteEnable)
    }

    /// Send the WriteDisable command, clearing the WEL in the status register.
    pub fn write_disable(&mut self) -> Result<()> {
        self.command(Command::WriteDisable)
    }

    /// Read the status register.
    pub fn read_status(&mut self) -> Result<Status> {
        self.exchange(Command::ReadStatus, &[], 1).map(|data| Status::from_byte(data[0]))
    }

    /// Write the WPEN and block protect bits of the status register.
    ///
    /// This method does *not* require you call `write_enable()` first,
    /// but it does not wait for the write cycle to complete.
    pub fn write_status(&mut self, status: Status) -> Result<()> {
        log::debug!("Writing status register: {:02X}", status.to_byte());
        self.write_enable()?;
        self.send(Command::WriteStatus, &[status.to_byte()])
    }

    /// Erase the 256-byte page containing `address`.
    ///
    /// Requires `write_enable()` first and leaves the device busy.
    pub fn page_erase(&mut self, address: u32) -> Result<()> {
        self.send(Command::PageErase, &make_address(address))
    }

    /// Erase the 32kB sector containing `address`.
    ///
    /// Requires `write_enable()` first and leaves the device busy.
    pub fn sector_erase(&mut self, address: u32) -> Result<()> {
        self.send(Command::SectorErase, &make_address(address))
    }

    /// Erase the entire memory array.
    ///
    /// Requires `write_enable()` first and leaves the device busy.
    pub fn chip_erase(&mut self) -> Result<()> {
        self.command(Command::ChipErase)
    }

    /// Wait until the device is idle, then read `length` bytes from `address`.
    pub fn read_blocking(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        self.wait_while_busy()?;
        self.read(address, length)
    }

    /// Wait until the device is idle, set the write enable latch,
    /// then write up to one page of `data` starting at `address`.
    ///
    /// This does *not* wait for the write cycle to finish afterwards:
    /// the next blocking call waits first, or call `wait_while_busy()`
    /// before relying on the data having been stored.
    pub fn write_blocking(&mut self, address: u32, data: &[u8]) -> Result<()> {
        check_payload(data.len())?;
        self.wait_while_busy()?;
        self.write_enable()?;
        self.write(address, data)
    }

    /// Check if the device is currently busy with a write or erase cycle.
    pub fn is_busy(&mut self) -> Result<bool> {
        self.read_status().map(|status| status.wip)
    }

    /// Wait until the device stops being busy.
    ///
    /// Polls the status register until WIP clears, sleeping `poll_interval`
    /// between polls. Returns `Error::Timeout` once `max_polls` polls
    /// have all reported busy.
    pub fn wait_while_busy(&mut self) -> Result<()> {
        let mut polls: u32 = 0;
        loop {
            let status = self.read_status()?;
            polls = polls.saturating_add(1);
            if !status.wip {
                log::trace!("Device idle after {} polls", polls);
                return Ok(());
            }
            if let Some(max_polls) = self.max_polls {
                if polls >= max_polls {
                    log::error!("Device still busy after {} polls, giving up", polls);
                    return Err(Error::Timeout { polls });
                }
            }
            if self.poll_interval > Duration::from_secs(0) {
                self.transport.sleep(self.poll_interval);
            }
        }
    }

    /// Check if any block protect bits are set.
    pub fn is_protected(&mut self) -> Result<bool> {
        log::debug!("Checking if BP bits are set");
        let status = self.read_status()?;
        log::debug!("BP1: {}, BP0: {}", status.bp1, status.bp0);
        Ok(status.block_protect() != BlockProtect::None)
    }

    /// Set block protection bits, keeping WPEN unchanged.
    ///
    /// Returns only after the status register write is complete.
    pub fn protect(&mut self, bp: BlockProtect) -> Result<()> {
        log::debug!("Setting block protection to {:?}", bp);
        self.wait_while_busy()?;
        let mut status = self.read_status()?;
        status.set_block_protect(bp);
        self.write_status(status)?;
        self.wait_while_busy()
    }

    /// Clear any block protection bits that are set.
    pub fn unprotect(&mut self) -> Result<()> {
        log::debug!("Checking if BP bits are set before clearing them");
        self.wait_while_busy()?;
        let mut status = self.read_status()?;
        if status.block_protect() != BlockProtect::None {
            log::debug!("Block protect bits are currently set, clearing.");
            status.set_block_protect(BlockProtect::None);
            self.write_status(status)?;
            self.wait_while_busy()?;
        }
        Ok(())
    }

    /// Enter deep power-down mode.
    ///
    /// Only `release_power_down()` is recognised until the device wakes up.
    pub fn power_down(&mut self) -> Result<()> {
        log::debug!("Sending Deep Power-Down command");
        self.command(Command::DeepPowerDown)
    }

    /// Leave deep power-down mode.
    ///
    /// Returns the electronic signature, `SIGNATURE` for a 25LC1024.
    pub fn release_power_down(&mut self) -> Result<u8> {
        log::debug!("Sending Release Power-Down command");
        let data = self.exchange(Command::ReleasePowerDown, &[0, 0, 0], 1)?;
        Ok(data[0])
    }

    /// Read `length` bytes of data from the EEPROM, starting at `address`.
    ///
    /// This method is similar to `read_blocking()`, except it calls the provided
    /// callback function at regular intervals with the number of bytes read so far.
    ///
    /// While `read()` performs a single long frame, this method performs
    /// up to 128 separate frames to allow progress to be reported.
    pub fn read_cb<F: Fn(usize)>(&mut self, address: u32, length: usize, cb: F)
        -> Result<Vec<u8>>
    {
        let chunk_size = usize::max(1024, length / 128);
        let start = address as usize;
        let end = match start.checked_add(length) {
            Some(end) => end,
            None => {
                log::error!("Read length {} overflows from 0x{:06X}", length, address);
                return Err(Error::InvalidAddress { address: u32::MAX });
            },
        };
        self.wait_while_busy()?;
        let mut data = Vec::new();
        cb(0);
        for addr in (start..end).step_by(chunk_size) {
            let size = usize::min(chunk_size, end - addr);
            data.append(&mut self.read(addr as u32, size)?);
            cb(data.len());
        }
        Ok(data)
    }

    /// Read `length` bytes of data from the EEPROM, starting at `address`.
    ///
    /// This method is similar to `read_cb()`, except it renders a progress
    /// bar to the terminal during the read.
    #[cfg(feature = "std")]
    pub fn read_progress(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        let pb = ProgressBar::new(length as u64).with_style(ProgressStyle::default_bar()
            .template(Self::DATA_PROGRESS_TPL).progress_chars(Self::DATA_PROGRESS_CHARS));
        pb.set_message("Reading");
        let result = self.read_cb(address, length, |n| pb.set_position(n as u64));
        pb.finish();
        result
    }

    /// Program `data` to `address`, automatically split into multiple page writes.
    ///
    /// Returns only after the last write cycle has completed.
    pub fn program_data(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.program_data_cb(address, data, |_| {})
    }

    /// Program `data` to `address`, automatically split into multiple page writes,
    /// and draws a progress bar to the terminal.
    #[cfg(feature = "std")]
    pub fn program_data_progress(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let pb = ProgressBar::new(data.len() as u64).with_style(ProgressStyle::default_bar()
            .template(Self::DATA_PROGRESS_TPL).progress_chars(Self::DATA_PROGRESS_CHARS));
        pb.set_message("Writing");
        self.program_data_cb(address, data, |n| pb.set_position(n as u64))?;
        pb.finish();
        Ok(())
    }

    /// Program `data` to `address`, automatically split into multiple page writes.
    ///
    /// Calls `cb` with the number of bytes programmed so far after each page write.
    pub fn program_data_cb<F: Fn(usize)>(&mut self, address: u32, mut data: &[u8], cb: F)
        -> Result<()>
    {
        check_range(address, data.len())?;
        log::trace!("Programming {} bytes to 0x{:06X}", data.len(), address);

        let mut total_bytes = 0;
        cb(total_bytes);

        // The first write is shortened if the address is not page-aligned,
        // so that no write wraps within its page.
        let mut address = address;
        while !data.is_empty() {
            let room = PAGE_SIZE - (address as usize % PAGE_SIZE);
            let (chunk, rest) = data.split_at(usize::min(room, data.len()));
            self.write_blocking(address, chunk)?;
            address += chunk.len() as u32;
            total_bytes += chunk.len();
            data = rest;
            cb(total_bytes);
        }

        self.wait_while_busy()
    }

    /// Program `data` starting at `address`.
    ///
    /// If `verify` is true, the programmed data is read back, and
    /// a ReadbackError will be returned if it did not match what was written.
    pub fn program(&mut self, address: u32, data: &[u8], verify: bool) -> Result<()> {
        self.program_data(address, data)?;
        if verify {
            let programmed = self.read(address, data.len())?;
            self.verify_readback(address, data, &programmed)?;
        }
        Ok(())
    }

    /// Program `data` starting at `address`.
    ///
    /// This is identical to `program()`, except it also draws progress bars to the terminal.
    #[cfg(feature = "std")]
    pub fn program_progress(&mut self, address: u32, data: &[u8], verify: bool) -> Result<()> {
        self.program_data_progress(address, data)?;
        if verify {
            let programmed = self.read_progress(address, data.len())?;
            self.verify_readback(address, data, &programmed)?;
        }
        Ok(())
    }

    /// Erase the entire memory array.
    ///
    /// Returns only after the erase cycle is complete.
    pub fn erase(&mut self) -> Result<()> {
        self.wait_while_busy()?;
        self.write_enable()?;
        self.chip_erase()?;
        self.wait_while_busy()
    }

    /// Erase every page touched by `address..address+length`.
    ///
    /// Sector erases are used for whole aligned sectors inside the range and
    /// page erases for the rest, so bytes outside the pages of the range are kept.
    /// Returns only after the last erase cycle is complete.
    pub fn erase_range(&mut self, address: u32, length: usize) -> Result<()> {
        self.erase_range_cb(address, length, |_| {})
    }

    /// Erase every page touched by `address..address+length`,
    /// and draws a progress bar to the terminal.
    #[cfg(feature = "std")]
    pub fn erase_range_progress(&mut self, address: u32, length: usize) -> Result<()> {
        let plan = self.make_erase_plan(address, length)?;
        let pb = ProgressBar::new(plan.total_size() as u64).with_style(ProgressStyle::default_bar()
            .template(Self::DATA_PROGRESS_TPL).progress_chars(Self::DATA_PROGRESS_CHARS));
        pb.set_message("Erasing");
        self.run_erase_plan(&plan, |n| pb.set_position(n as u64))?;
        pb.finish();
        Ok(())
    }

    /// Erase every page touched by `address..address+length`.
    ///
    /// Calls `cb` with the number of bytes erased so far after each erase.
    pub fn erase_range_cb<F: Fn(usize)>(&mut self, address: u32, length: usize, cb: F)
        -> Result<()>
    {
        let plan = self.make_erase_plan(address, length)?;
        self.run_erase_plan(&plan, cb)
    }

    /// Writes `command` and `data` to the EEPROM, then returns `nbytes` of response.
    ///
    /// The whole exchange is one chip select frame; the response is clocked
    /// out with zero-valued dummy bytes.
    pub fn exchange<X: Into<u8>>(&mut self, command: X, data: &[u8], nbytes: usize)
        -> Result<Vec<u8>>
    {
        let mut tx = alloc::vec![command.into()];
        tx.extend(data);
        log::trace!("SPI exchange: write {:02X?}, read {} bytes", &tx, nbytes);
        tx.extend(alloc::vec![0u8; nbytes]);
        let rx = self.frame(|transport| transport.exchange(&tx))?;
        if rx.len() != tx.len() {
            log::error!("Transport returned {} bytes for a {} byte exchange", rx.len(), tx.len());
            return Err(short_response(tx.len(), rx.len()));
        }
        let rx = rx[1 + data.len()..].to_vec();
        log::trace!("SPI exchange: read {:02X?}", &rx);
        Ok(rx)
    }

    /// Writes `command` and `data` to the EEPROM, without reading the response.
    pub fn send<X: Into<u8>>(&mut self, command: X, data: &[u8]) -> Result<()> {
        let mut tx = alloc::vec![command.into()];
        tx.extend(data);
        log::trace!("SPI write: {:02X?}", &tx);
        self.frame(|transport| transport.write(&tx))
    }

    /// Convenience method for issuing a single command and not caring about the returned data
    pub fn command<X: Into<u8>>(&mut self, command: X) -> Result<()> {
        self.send(command, &[])
    }

    /// Run `f` on the transport with chip select asserted.
    ///
    /// Chip select is deasserted even if `f` fails, in which case
    /// the transport error is returned.
    fn frame<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> TransportResult<R>,
    {
        self.cs.assert()?;
        let result = f(&mut *self.transport);
        let deassert = self.cs.deassert();
        match result {
            Ok(r) => {
                deassert?;
                Ok(r)
            },
            Err(e) => {
                if deassert.is_err() {
                    log::warn!("Failed to deassert chip select after transport error");
                }
                Err(e.into())
            },
        }
    }

    /// Work out the page and sector erases needed to cover the given range.
    fn make_erase_plan(&self, address: u32, length: usize) -> Result<ErasePlan> {
        check_range(address, length)?;
        log::debug!("Creating erase plan for address={} length={}", address, length);
        let insts: [(usize, u8); 2] = [
            (PAGE_SIZE, Command::PageErase.into()),
            (SECTOR_SIZE, Command::SectorErase.into()),
        ];
        if length == 0 {
            return Ok(ErasePlan(Vec::new()));
        }
        Ok(ErasePlan::new(&insts, address as usize, length))
    }

    /// Execute the sequence of erase operations from `plan`.
    ///
    /// `cb` is called with the number of bytes erased so far.
    fn run_erase_plan<F: Fn(usize)>(&mut self, plan: &ErasePlan, cb: F) -> Result<()> {
        let mut total_erased = 0;
        cb(total_erased);
        self.wait_while_busy()?;
        for (opcode, size, base) in plan.0.iter() {
            log::trace!("Executing erase plan: Erase 0x{:02X} ({} bytes) from 0x{:06X}",
                        opcode, size, base);
            self.write_enable()?;
            self.send(*opcode, &make_address(*base))?;
            self.wait_while_busy()?;
            total_erased += size;
            cb(total_erased);
        }
        Ok(())
    }

    /// Verify programmed data matches new memory contents.
    ///
    /// Returns Err::ReadbackError on mismatch.
    fn verify_readback(&mut self, address: u32, data: &[u8], new_data: &[u8]) -> Result<()> {
        let mismatch = data.iter().zip(new_data).enumerate().find(|(_, (a, b))| a != b);
        match mismatch {
            Some((idx, (a, b))) => {
                let addr = address + idx as u32;
                log::error!("Readback mismatch at 0x{:06X}: Wrote 0x{:02X}, read 0x{:02X}",
                            addr, a, b);
                if self.is_protected()? {
                    log::error!("Block write protection appears to be enabled, try unprotecting.");
                }
                Err(Error::ReadbackError { address: addr, wrote: *a, read: *b })
            },
            None => Ok(()),
        }
    }
}

/// Generate the 3-byte big-endian address, ignoring bits above 23.
fn make_address(addr: u32) -> [u8; 3] {
    let bytes = addr.to_be_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

/// Checks that a single write of `length` bytes fits in one page.
fn check_payload(length: usize) -> Result<()> {
    if length > PAGE_SIZE {
        log::error!("Write of {} bytes exceeds page size of {} bytes", length, PAGE_SIZE);
        Err(Error::InvalidArgument { length })
    } else {
        Ok(())
    }
}

/// Checks that `address..address+length` lies within the memory capacity.
fn check_range(address: u32, length: usize) -> Result<()> {
    log::trace!("Checking address={:06X} length={}", address, length);
    match (address as usize).checked_add(length) {
        Some(end) if end <= CAPACITY => Ok(()),
        Some(end) => {
            log::error!("Operation would exceed memory capacity");
            Err(Error::InvalidAddress { address: u32::try_from(end - 1).unwrap_or(u32::MAX) })
        },
        None => {
            log::error!("Operation length {} overflows from 0x{:06X}", length, address);
            Err(Error::InvalidAddress { address: u32::MAX })
        },
    }
}

#[cfg(feature = "std")]
fn short_response(expected: usize, got: usize) -> Error {
    Error::Transport(anyhow::anyhow!("Transport returned {} bytes, expected {}", got, expected))
}
#[cfg(not(feature = "std"))]
fn short_response(_expected: usize, _got: usize) -> Error<()> {
    Error::Transport(())
}

/// 25LC1024 instruction set.
#[derive(Copy, Clone, Debug, num_enum::IntoPrimitive)]
#[repr(u8)]
enum Command {
    WriteStatus = 0x01,
    Write = 0x02,
    Read = 0x03,
    WriteDisable = 0x04,
    ReadStatus = 0x05,
    WriteEnable = 0x06,
    PageErase = 0x42,
    ReleasePowerDown = 0xAB,
    DeepPowerDown = 0xB9,
    ChipErase = 0xC7,
    SectorErase = 0xD8,
}
