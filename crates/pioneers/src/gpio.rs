//! Digital I/O: the mission event inputs and the burn-wire output.
//!
//! Pins are driven through the Linux sysfs GPIO interface. The event lines
//! (LO, SOE, SODS) are active-low and read through a debounce vote.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("failed to export gpio{pin}: {source}")]
    Export { pin: u32, source: std::io::Error },

    #[error("gpio{pin} I/O failed: {source}")]
    Io { pin: u32, source: std::io::Error },

    #[error("gpio{pin} returned unexpected value {value:?}")]
    BadValue { pin: u32, value: String },
}

/// A readable digital line. `true` means electrically high.
pub trait InputPin {
    fn read(&mut self) -> Result<bool, GpioError>;
}

/// A writable digital line.
pub trait OutputPin {
    fn write(&mut self, high: bool) -> Result<(), GpioError>;

    /// The level last written.
    fn level(&self) -> bool;
}

impl<P: InputPin + ?Sized> InputPin for Box<P> {
    fn read(&mut self) -> Result<bool, GpioError> {
        (**self).read()
    }
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        (**self).write(high)
    }

    fn level(&self) -> bool {
        (**self).level()
    }
}

/// Sample spacing and count for the debounce vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    pub samples: u32,
    pub spacing: Duration,
}

impl Default for Debounce {
    fn default() -> Self {
        Self {
            samples: 5,
            spacing: Duration::from_micros(200),
        }
    }
}

impl Debounce {
    /// Vote on an active-low line: asserted iff fewer than a majority of the
    /// samples read high.
    pub fn asserted<P, C>(&self, pin: &mut P, clock: &C) -> Result<bool, GpioError>
    where
        P: InputPin + ?Sized,
        C: Clock + ?Sized,
    {
        let mut highs = 0u32;
        for i in 0..self.samples {
            if i > 0 {
                clock.sleep(self.spacing);
            }
            if pin.read()? {
                highs += 1;
            }
        }
        Ok(highs * 2 < self.samples)
    }
}

/// Root of the sysfs GPIO tree, normally `/sys/class/gpio`.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new("/sys/class/gpio")
    }
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&self, pin: u32, direction: &str) -> Result<PathBuf, GpioError> {
        let dir = self.pin_dir(pin);
        let export_err = |source| GpioError::Export { pin, source };
        if !dir.exists() {
            std::fs::write(self.root.join("export"), pin.to_string()).map_err(export_err)?;
            debug!(pin, "exported gpio");
        }
        std::fs::write(dir.join("direction"), direction).map_err(export_err)?;
        Ok(dir.join("value"))
    }

    pub fn input(&self, pin: u32) -> Result<SysfsInput, GpioError> {
        let path = self.export(pin, "in")?;
        let file = File::open(&path).map_err(|source| GpioError::Io { pin, source })?;
        Ok(SysfsInput { pin, file })
    }

    /// Export `pin` as an output driven low.
    pub fn output(&self, pin: u32) -> Result<SysfsOutput, GpioError> {
        let path = self.export(pin, "out")?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| GpioError::Io { pin, source })?;
        let mut output = SysfsOutput {
            pin,
            file,
            level: true,
        };
        output.write(false)?;
        Ok(output)
    }
}

#[derive(Debug)]
pub struct SysfsInput {
    pin: u32,
    file: File,
}

impl InputPin for SysfsInput {
    fn read(&mut self) -> Result<bool, GpioError> {
        let pin = self.pin;
        let mut value = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut value))
            .map_err(|source| GpioError::Io { pin, source })?;
        match value.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(GpioError::BadValue {
                pin,
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug)]
pub struct SysfsOutput {
    pin: u32,
    file: File,
    level: bool,
}

impl OutputPin for SysfsOutput {
    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        let pin = self.pin;
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(if high { b"1" } else { b"0" }))
            .and_then(|()| self.file.flush())
            .map_err(|source| GpioError::Io { pin, source })?;
        self.level = high;
        Ok(())
    }

    fn level(&self) -> bool {
        self.level
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    /// Input whose level the test controls. Scripted samples are consumed
    /// first, then the steady level applies.
    #[derive(Debug, Clone)]
    pub struct MockInput {
        level: Rc<Cell<bool>>,
        script: Rc<RefCell<VecDeque<bool>>>,
    }

    impl MockInput {
        /// A released active-low line (reads high).
        pub fn released() -> Self {
            Self {
                level: Rc::new(Cell::new(true)),
                script: Rc::default(),
            }
        }

        pub fn set_high(&self, high: bool) {
            self.level.set(high);
        }

        /// Pull the active-low line down.
        pub fn assert_line(&self) {
            self.level.set(false);
        }

        pub fn script(&self, samples: &[bool]) {
            self.script.borrow_mut().extend(samples.iter().copied());
        }
    }

    impl InputPin for MockInput {
        fn read(&mut self) -> Result<bool, GpioError> {
            Ok(self
                .script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| self.level.get()))
        }
    }

    /// Output that records every write.
    #[derive(Debug, Clone, Default)]
    pub struct MockOutput {
        level: Rc<Cell<bool>>,
        writes: Rc<RefCell<Vec<bool>>>,
    }

    impl MockOutput {
        pub fn is_high(&self) -> bool {
            self.level.get()
        }

        pub fn writes(&self) -> Vec<bool> {
            self.writes.borrow().clone()
        }
    }

    impl OutputPin for MockOutput {
        fn write(&mut self, high: bool) -> Result<(), GpioError> {
            self.level.set(high);
            self.writes.borrow_mut().push(high);
            Ok(())
        }

        fn level(&self) -> bool {
            self.level.get()
        }
    }
}
