use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The resource axis balanced during a cycle. Exactly one per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Memory,
    Disk,
    Cpu,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Memory => write!(f, "memory"),
            Dimension::Disk => write!(f, "disk"),
            Dimension::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Dimension::Memory),
            "disk" => Ok(Dimension::Disk),
            "cpu" => Ok(Dimension::Cpu),
            other => Err(other.to_string()),
        }
    }
}

/// Node-side ledger for one dimension.
///
/// `used` and `free` are signed: a destination can be pushed past its
/// capacity by a relocation, in which case `free` goes negative instead of
/// wrapping. The fields are private so `free` and `free_percent` can only
/// change through [`Resource::add`] / [`Resource::sub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resource {
    capacity: i64,
    used: i64,
    free: i64,
    free_percent: i64,
}

impl Resource {
    pub fn new(capacity: u64, used: u64) -> Self {
        let mut resource = Self {
            capacity: to_signed(capacity),
            used: to_signed(used),
            free: 0,
            free_percent: 0,
        };
        resource.recompute();
        resource
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn used(&self) -> i64 {
        self.used
    }

    pub fn free(&self) -> i64 {
        self.free
    }

    pub fn free_percent(&self) -> i64 {
        self.free_percent
    }

    /// Account `amount` more usage on this node.
    pub fn add(&mut self, amount: u64) {
        self.used = self.used.saturating_add(to_signed(amount));
        self.recompute();
    }

    /// Release `amount` of usage from this node.
    pub fn sub(&mut self, amount: u64) {
        self.used = self.used.saturating_sub(to_signed(amount));
        self.recompute();
    }

    fn recompute(&mut self) {
        self.free = self.capacity - self.used;
        // floor, not truncation: an overcommitted node must rank below an empty one
        self.free_percent = if self.capacity > 0 {
            (self.free.saturating_mul(100)).div_euclid(self.capacity)
        } else {
            0
        };
    }
}

/// VM-side figures for one dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub capacity: u64,
    pub used: u64,
}

impl Usage {
    pub fn new(capacity: u64, used: u64) -> Self {
        Self { capacity, used }
    }
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent(r: &Resource) {
        assert_eq!(r.used() + r.free(), r.capacity());
        assert_eq!(r.free_percent(), (r.free() * 100).div_euclid(r.capacity()));
    }

    #[test]
    fn free_percent_is_floored() {
        let r = Resource::new(3, 1);
        assert_eq!(r.free(), 2);
        // 2/3 = 66.6%
        assert_eq!(r.free_percent(), 66);
        assert_consistent(&r);
    }

    #[test]
    fn mutations_keep_ledger_consistent() {
        let mut r = Resource::new(100, 20);
        r.add(50);
        assert_eq!(r.used(), 70);
        assert_eq!(r.free_percent(), 30);
        assert_consistent(&r);

        r.sub(65);
        assert_eq!(r.used(), 5);
        assert_eq!(r.free_percent(), 95);
        assert_consistent(&r);
    }

    #[test]
    fn overcommit_goes_negative() {
        let mut r = Resource::new(100, 90);
        r.add(15);
        assert_eq!(r.free(), -5);
        assert_eq!(r.free_percent(), -5);
        assert_consistent(&r);

        let mut odd = Resource::new(3, 3);
        odd.add(1);
        // -33.3% floors to -34
        assert_eq!(odd.free_percent(), -34);
    }

    #[test]
    fn zero_capacity_reports_zero_percent() {
        let r = Resource::new(0, 0);
        assert_eq!(r.free_percent(), 0);
    }

    #[test]
    fn dimension_parses_case_insensitively() {
        assert_eq!("Memory".parse::<Dimension>(), Ok(Dimension::Memory));
        assert_eq!(" cpu ".parse::<Dimension>(), Ok(Dimension::Cpu));
        assert_eq!("disk".parse::<Dimension>(), Ok(Dimension::Disk));
        assert_eq!("gpu".parse::<Dimension>(), Err("gpu".to_string()));
    }
}
