use std::{fmt, num::Wrapping};

/// 16-bit wrapping sequence number as carried in the packet header.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default)]
pub struct Seq16 {
    n: u16,
}

impl Seq16 {
    #[must_use]
    pub fn from_u16(n: u16) -> Self {
        Seq16 { n }
    }

    #[must_use]
    pub fn to_u16(&self) -> u16 {
        self.n
    }

    #[must_use]
    pub fn add_u16(&self, n: u16) -> Self {
        let s = Wrapping(self.n) + Wrapping(n);
        Seq16 { n: s.0 }
    }

    #[must_use]
    pub fn sub_u16(&self, n: u16) -> Self {
        let s = Wrapping(self.n) - Wrapping(n);
        Seq16 { n: s.0 }
    }
}

impl fmt::Display for Seq16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.n.fmt(f)
    }
}
