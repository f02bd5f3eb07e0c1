//! Processing mode selection.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Transform applied to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessingMode {
    #[default]
    Raw = 0,
    Grayscale = 1,
    EdgeDetect = 2,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 3] = [Self::Raw, Self::Grayscale, Self::EdgeDetect];

    /// Raw -> Grayscale -> EdgeDetect -> Raw
    pub fn next(self) -> Self {
        match self {
            Self::Raw => Self::Grayscale,
            Self::Grayscale => Self::EdgeDetect,
            Self::EdgeDetect => Self::Raw,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Raw),
            1 => Some(Self::Grayscale),
            2 => Some(Self::EdgeDetect),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Grayscale => "grayscale",
            Self::EdgeDetect => "edge_detect",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "grayscale" | "gray" => Ok(Self::Grayscale),
            "edge_detect" | "edge" | "canny" => Ok(Self::EdgeDetect),
            other => Err(format!("unknown processing mode '{other}'")),
        }
    }
}

/// Lock-free shared mode cell.
///
/// Writers are mode-control commands; the transform engine reads it once per
/// frame.
#[derive(Debug, Default)]
pub struct ModeControl(AtomicU8);

impl ModeControl {
    pub fn new(mode: ProcessingMode) -> Self {
        Self(AtomicU8::new(mode.index()))
    }

    pub fn get(&self) -> ProcessingMode {
        // Only valid indices are ever stored.
        ProcessingMode::from_index(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set(&self, mode: ProcessingMode) {
        self.0.store(mode.index(), Ordering::Release);
        info!("Process mode set to: {}", mode);
    }

    /// Set by numeric index. Out-of-range values are logged and ignored.
    pub fn set_index(&self, index: u8) -> bool {
        match ProcessingMode::from_index(index) {
            Some(mode) => {
                self.set(mode);
                true
            }
            None => {
                error!("Invalid process mode: {}", index);
                false
            }
        }
    }

    /// Advance to the next mode and return it.
    pub fn cycle(&self) -> ProcessingMode {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                let mode = ProcessingMode::from_index(i).unwrap_or_default();
                Some(mode.next().index())
            })
            .unwrap_or_default();
        let mode = ProcessingMode::from_index(prev).unwrap_or_default().next();
        info!("Process mode cycled to: {}", mode);
        mode
    }
}
