//! Simulated 25LC1024 and bus recorder for tests.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::time::Duration;

use crate::{ChipSelect, Transport, TransportResult, CAPACITY, PAGE_SIZE, SECTOR_SIZE};

/// One observed bus action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Assert,
    Deassert,
    Write(Vec<u8>),
    Exchange(Vec<u8>),
    Sleep(Duration),
}

pub struct SimDevice {
    pub memory: Vec<u8>,
    /// WPEN and BP bits.
    pub status: u8,
    pub wel: bool,
    /// Number of further status reads that report WIP.
    pub busy_polls: u32,
    /// Status reads a write or erase cycle lasts for.
    pub cycle_polls: u32,
    /// Raw status bytes returned before the simulated register is used.
    pub status_script: VecDeque<u8>,
    pub selected: bool,
    pub powered_down: bool,
    /// Fail the next transport call.
    pub fail_transport: bool,
    /// Fail the next chip select assertion.
    pub fail_assert: bool,
    pub events: Vec<Event>,
}

impl SimDevice {
    fn new() -> Self {
        SimDevice {
            memory: alloc::vec![0xFF; CAPACITY],
            status: 0,
            wel: false,
            busy_polls: 0,
            cycle_polls: 2,
            status_script: VecDeque::new(),
            selected: false,
            powered_down: false,
            fail_transport: false,
            fail_assert: false,
            events: Vec::new(),
        }
    }

    /// Lowest address covered by the block protect bits.
    fn protected_from(&self) -> usize {
        match (self.status >> 2) & 0b11 {
            0b00 => CAPACITY,
            0b01 => CAPACITY - CAPACITY / 4,
            0b10 => CAPACITY / 2,
            _ => 0,
        }
    }

    fn start_cycle(&mut self) {
        self.busy_polls = self.cycle_polls;
        if self.busy_polls == 0 {
            self.wel = false;
        }
    }

    fn read_status(&mut self) -> u8 {
        if let Some(raw) = self.status_script.pop_front() {
            return raw;
        }
        let wip = self.busy_polls > 0;
        let raw = self.status | ((self.wel as u8) << 1) | wip as u8;
        if wip {
            self.busy_polls -= 1;
            if self.busy_polls == 0 {
                self.wel = false;
            }
        }
        raw
    }

    /// Process one complete frame, returning the bytes clocked out by the device.
    fn frame(&mut self, tx: &[u8]) -> Vec<u8> {
        let mut rx = alloc::vec![0xFFu8; tx.len()];
        let addr = match tx.get(1..4) {
            Some(a) => (u32::from_be_bytes([0, a[0], a[1], a[2]]) as usize) % CAPACITY,
            None => 0,
        };
        let busy = self.busy_polls > 0;
        let writable = self.wel && !busy;

        if self.powered_down {
            if tx[0] == 0xAB {
                self.powered_down = false;
                if let Some(r) = rx.get_mut(4) {
                    *r = crate::SIGNATURE;
                }
            }
            return rx;
        }

        match tx[0] {
            0x05 => {
                let raw = self.read_status();
                for r in rx[1..].iter_mut() {
                    *r = raw;
                }
            },
            _ if busy => (),
            0x03 => {
                for (i, r) in rx[4..].iter_mut().enumerate() {
                    *r = self.memory[(addr + i) % CAPACITY];
                }
            },
            0x06 => self.wel = true,
            0x04 => self.wel = false,
            0x02 if writable => {
                if addr < self.protected_from() {
                    let base = addr - addr % PAGE_SIZE;
                    for (i, b) in tx[4..].iter().enumerate() {
                        self.memory[base + (addr + i) % PAGE_SIZE] = *b;
                    }
                    self.start_cycle();
                } else {
                    self.wel = false;
                }
            },
            0x01 if writable => {
                self.status = tx[1] & 0b1000_1100;
                self.start_cycle();
            },
            0x42 | 0xD8 if writable => {
                let size = if tx[0] == 0x42 { PAGE_SIZE } else { SECTOR_SIZE };
                let base = addr - addr % size;
                if base < self.protected_from() {
                    self.memory[base..base + size].iter_mut().for_each(|b| *b = 0xFF);
                }
                self.start_cycle();
            },
            0xC7 if writable => {
                if self.protected_from() == CAPACITY {
                    self.memory.iter_mut().for_each(|b| *b = 0xFF);
                }
                self.start_cycle();
            },
            0xB9 => self.powered_down = true,
            0xAB => {
                if let Some(r) = rx.get_mut(4) {
                    *r = crate::SIGNATURE;
                }
            },
            _ => (),
        }
        rx
    }
}

pub type Shared = Rc<RefCell<SimDevice>>;

pub struct SimBus(pub Shared);

pub struct SimCs(pub Shared);

/// Create a simulated device with a transport and chip select attached to it.
pub fn sim() -> (SimBus, SimCs, Shared) {
    let dev = Rc::new(RefCell::new(SimDevice::new()));
    (SimBus(dev.clone()), SimCs(dev.clone()), dev)
}

impl SimBus {
    fn check(&self) -> TransportResult<()> {
        let mut dev = self.0.borrow_mut();
        if dev.fail_transport {
            dev.fail_transport = false;
            anyhow::bail!("Simulated bus failure");
        }
        if !dev.selected {
            anyhow::bail!("Transfer without chip select");
        }
        Ok(())
    }
}

impl Transport for SimBus {
    fn write(&mut self, data: &[u8]) -> TransportResult<()> {
        self.check()?;
        let mut dev = self.0.borrow_mut();
        dev.events.push(Event::Write(data.to_vec()));
        dev.frame(data);
        Ok(())
    }

    fn exchange(&mut self, data: &[u8]) -> TransportResult<Vec<u8>> {
        self.check()?;
        let mut dev = self.0.borrow_mut();
        dev.events.push(Event::Exchange(data.to_vec()));
        Ok(dev.frame(data))
    }

    fn sleep(&mut self, dur: Duration) {
        self.0.borrow_mut().events.push(Event::Sleep(dur));
    }
}

impl ChipSelect for SimCs {
    fn assert(&mut self) -> TransportResult<()> {
        let mut dev = self.0.borrow_mut();
        if dev.fail_assert {
            dev.fail_assert = false;
            anyhow::bail!("Simulated chip select failure");
        }
        if dev.selected {
            anyhow::bail!("Chip select asserted twice");
        }
        dev.selected = true;
        dev.events.push(Event::Assert);
        Ok(())
    }

    fn deassert(&mut self) -> TransportResult<()> {
        let mut dev = self.0.borrow_mut();
        dev.selected = false;
        dev.events.push(Event::Deassert);
        Ok(())
    }
}
