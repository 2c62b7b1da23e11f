use std::fmt;

use serde::Serialize;

/// Amount of memory, kept in kilobytes because that is the unit both
/// `/proc/<pid>/status` and `rusage.ru_maxrss` report on Linux.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Memory(u64);

impl Memory {
  pub fn from_kilobytes(kilobytes: u64) -> Self {
    Memory(kilobytes)
  }
}

impl Memory {
  pub fn into_kilobytes(self) -> u64 {
    self.0
  }
}

impl Serialize for Memory {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_u64(self.into_kilobytes())
  }
}

impl fmt::Display for Memory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} KB", self.0)
  }
}
