//! Creation attributes and directive options

use bitflags::bitflags;

bitflags! {
    /// Attributes given when an object is created
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Attributes: u32 {
        /// Object is visible to every node through the global directory
        const GLOBAL = 0x0000_0002;
    }
}

bitflags! {
    /// Options of a blocking directive
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Options: u32 {
        /// Fail with `Unsatisfied` instead of waiting
        const NO_WAIT = 0x0000_0001;
    }
}

impl Attributes {
    pub const LOCAL: Attributes = Attributes::empty();

    #[inline]
    pub const fn is_global(self) -> bool {
        self.contains(Attributes::GLOBAL)
    }
}

impl Options {
    pub const WAIT: Options = Options::empty();
}
