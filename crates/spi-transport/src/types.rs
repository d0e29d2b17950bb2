use core::fmt;

/// A transport endpoint discovered by a backend.
#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

impl fmt::Display for BusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.name, self.driver)
    }
}

/// Counters a backend keeps about its own traffic.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransferStats {
    pub words: u64,
    pub errors: u64,
    pub delay_us: u64,
}
