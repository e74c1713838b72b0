use std::cmp::Ordering;
use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::ops::{
    Add,
    AddAssign,
    Sub,
};

/// A TCP sequence number, compared by signed wraparound distance.
///
/// Comparisons are only meaningful between numbers less than half the
/// sequence space apart, which every pair of live numbers in a window-bound
/// connection is.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SeqNum(pub u32);

impl SeqNum {
    /// Checks if the number falls within the window [left, left + size).
    pub fn is_in_window(self, left: SeqNum, size: usize) -> bool {
        size != 0 && left <= self && self < (left + size)
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &SeqNum) -> Option<Ordering> {
        (self.0.wrapping_sub(other.0) as i32).partial_cmp(&0)
    }
}

impl Add<usize> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: usize) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs as u32))
    }
}

impl AddAssign<usize> for SeqNum {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

/// Wraparound distance from rhs up to self; callers keep self >= rhs.
impl Sub<SeqNum> for SeqNum {
    type Output = usize;

    fn sub(self, rhs: SeqNum) -> usize {
        self.0.wrapping_sub(rhs.0) as usize
    }
}

impl Display for SeqNum {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.0)
    }
}
