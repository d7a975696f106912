//! A small deterministic machine implementing [`Device`].
//!
//! It has no CPU; every tick it advances a linear congruential generator and
//! scribbles one byte of RAM, and every [`SAMPLE_PERIOD`] ticks it emits an
//! audio sample. That is enough structure for record/replay tests: state
//! depends on the full command history and diffs between nearby states are
//! small.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{Command, Device, DeviceError, Event, EventKind};

/// Ticks between two audio samples.
pub const SAMPLE_PERIOD: u64 = 64;

/// Highest hardware version the toy machine knows.
pub const MAX_VERSION: u8 = 2;

const MAGIC: &[u8; 4] = b"TOY1";
const KEY_BYTES: usize = 16;
const SCREEN_BYTES: usize = 64;

/// Deterministic reference device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToyMachine {
    tick: u64,
    rng: u64,
    version: u8,
    keys: [u8; KEY_BYTES],
    discs: [u64; 2],
    tape: u64,
    ram: Vec<u8>,
    /// Maximum ticks a single `RunUntil` may advance, to model interrupted runs.
    run_limit: Option<u64>,
}

impl ToyMachine {
    /// Create a machine with `ram_size` bytes of RAM, powered on at tick 0.
    #[must_use]
    pub fn new(ram_size: usize) -> Self {
        Self {
            tick: 0,
            rng: seed(0),
            version: 0,
            keys: [0; KEY_BYTES],
            discs: [0; 2],
            tape: 0,
            ram: vec![0; ram_size.max(1)],
            run_limit: None,
        }
    }

    /// Limit how far one `RunUntil` may advance before returning early.
    #[must_use]
    pub const fn with_run_limit(mut self, ticks: u64) -> Self {
        self.run_limit = Some(ticks);
        self
    }

    pub fn set_run_limit(&mut self, ticks: Option<u64>) {
        self.run_limit = ticks;
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn is_key_down(&self, code: u8) -> bool {
        let code = code as usize % (KEY_BYTES * 8);
        self.keys[code / 8] & (1 << (code % 8)) != 0
    }

    fn step(&mut self) -> u64 {
        self.rng = self
            .rng
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let key_mix = u64::from(self.keys.iter().fold(0u8, |acc, k| acc ^ k));
        let value = (self.rng >> 33) ^ key_mix ^ self.discs[0] ^ self.discs[1] ^ self.tape;
        let index = (self.tick as usize) % self.ram.len();
        self.ram[index] = self.ram[index].wrapping_add(value as u8);
        self.tick += 1;
        value
    }

    fn run_until(&mut self, stop_tick: u64) -> Event {
        let target = match self.run_limit {
            Some(limit) => stop_tick.min(self.tick.saturating_add(limit)),
            None => stop_tick,
        };
        let mut samples = Vec::new();
        while self.tick < target {
            let value = self.step();
            if self.tick % SAMPLE_PERIOD == 0 {
                samples.push((value & 0xffff) as u16);
            }
        }
        Event::new(
            self.tick,
            EventKind::RunUntil { stop_tick, samples },
        )
    }

    fn reset(&mut self) {
        self.rng = seed(self.version);
        self.keys = [0; KEY_BYTES];
        self.ram.fill(0);
    }
}

impl Default for ToyMachine {
    fn default() -> Self {
        Self::new(4096)
    }
}

const fn seed(version: u8) -> u64 {
    0x9e37_79b9_7f4a_7c15 ^ (version as u64)
}

fn checksum(bytes: &[u8]) -> u64 {
    // FNV-1a
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl Device for ToyMachine {
    fn apply(&mut self, command: &Command) -> Result<Option<Event>, DeviceError> {
        match command {
            Command::Reset => self.reset(),
            Command::KeyPress { code, down } => {
                let code = *code as usize % (KEY_BYTES * 8);
                let mask = 1 << (code % 8);
                if *down {
                    self.keys[code / 8] |= mask;
                } else {
                    self.keys[code / 8] &= !mask;
                }
            }
            Command::LoadDisc { drive, image } => {
                let slot = self
                    .discs
                    .get_mut(*drive as usize)
                    .ok_or_else(|| DeviceError::Fault(format!("no drive {drive}")))?;
                *slot = if image.is_empty() { 0 } else { checksum(image) };
            }
            Command::LoadTape { image } => {
                self.tape = if image.is_empty() { 0 } else { checksum(image) };
            }
            Command::RunUntil { stop_tick } => return Ok(Some(self.run_until(*stop_tick))),
            Command::SwitchVersion { version } => {
                if *version > MAX_VERSION {
                    return Err(DeviceError::Fault(format!("unknown version {version}")));
                }
                self.version = *version;
                self.reset();
            }
            other => return Err(DeviceError::Unsupported(other.name())),
        }
        Ok(Event::echo(self.tick, command))
    }

    fn tick(&self) -> u64 {
        self.tick
    }

    fn export_state(&self) -> Vec<u8> {
        let ram_len = u32::try_from(self.ram.len()).unwrap_or(u32::MAX);
        let mut out = Vec::with_capacity(self.ram.len() + 64);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.rng.to_le_bytes());
        out.push(self.version);
        out.extend_from_slice(&self.keys);
        out.extend_from_slice(&self.discs[0].to_le_bytes());
        out.extend_from_slice(&self.discs[1].to_le_bytes());
        out.extend_from_slice(&self.tape.to_le_bytes());
        out.extend_from_slice(&ram_len.to_le_bytes());
        out.extend_from_slice(&self.ram);
        out
    }

    fn import_state(&mut self, state: &[u8]) -> Result<(), DeviceError> {
        let invalid = |e: std::io::Error| DeviceError::InvalidState(e.to_string());
        let mut cursor = Cursor::new(state);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(invalid)?;
        if &magic != MAGIC {
            return Err(DeviceError::InvalidState("bad magic".to_owned()));
        }
        let tick = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let rng = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let version = cursor.read_u8().map_err(invalid)?;
        let mut keys = [0u8; KEY_BYTES];
        cursor.read_exact(&mut keys).map_err(invalid)?;
        let disc0 = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let disc1 = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let tape = cursor.read_u64::<LittleEndian>().map_err(invalid)?;
        let ram_len = cursor.read_u32::<LittleEndian>().map_err(invalid)? as usize;
        if ram_len == 0 {
            return Err(DeviceError::InvalidState("empty ram".to_owned()));
        }
        let mut ram = vec![0u8; ram_len];
        cursor.read_exact(&mut ram).map_err(invalid)?;

        self.tick = tick;
        self.rng = rng;
        self.version = version;
        self.keys = keys;
        self.discs = [disc0, disc1];
        self.tape = tape;
        self.ram = ram;
        Ok(())
    }

    fn export_screen(&self) -> Vec<u8> {
        let stride = (self.ram.len() / SCREEN_BYTES).max(1);
        self.ram
            .iter()
            .step_by(stride)
            .take(SCREEN_BYTES)
            .copied()
            .collect()
    }
}
