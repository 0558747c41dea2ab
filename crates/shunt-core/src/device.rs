use std::fmt;
use std::str::FromStr;

use crate::ShuntError;

/// Memory location of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory
    #[default]
    Cpu,
    /// Accelerator memory on the device with the given ordinal
    Cuda(usize),
}

impl Device {
    /// Whether this is host memory.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Whether this is accelerator memory.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    /// Accelerator ordinal, if applicable.
    pub fn ordinal(&self) -> Option<usize> {
        match self {
            Device::Cuda(idx) => Some(*idx),
            Device::Cpu => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

impl FromStr for Device {
    type Err = ShuntError;

    /// Parses `cpu`, `cuda` (ordinal 0) or `cuda:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            _ => {
                let idx = s
                    .strip_prefix("cuda:")
                    .or_else(|| s.strip_prefix("gpu:"))
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| ShuntError::InvalidDevice(s.clone()))?;
                Ok(Device::Cuda(idx))
            }
        }
    }
}
