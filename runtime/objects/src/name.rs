//! Object Names
//!
//! Classic objects are named by a single 32-bit word, usually four ASCII
//! characters packed with [`build_name`]. Classes configured with a string
//! name length (the POSIX personality) carry a bounded text name instead.
//! Only word names are shared through the global directory.

use alloc::string::String;
use core::fmt;

/// Name of an object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectName {
    /// 32-bit name, the only kind that travels between nodes
    Word(u32),
    /// Bounded string name
    Text(String),
}

impl ObjectName {
    /// Word name built from four characters
    pub const fn from_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> Self {
        Self::Word(build_name(c1, c2, c3, c4))
    }

    /// The word value, if this is a word name
    pub fn as_word(&self) -> Option<u32> {
        match self {
            Self::Word(word) => Some(*word),
            Self::Text(_) => None,
        }
    }

    /// A zero word or an empty string does not name anything
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Word(word) => *word != 0,
            Self::Text(text) => !text.is_empty(),
        }
    }
}

impl From<u32> for ObjectName {
    fn from(word: u32) -> Self {
        Self::Word(word)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(word) => {
                for byte in word.to_be_bytes() {
                    let c = if byte.is_ascii_graphic() { byte as char } else { '.' };
                    write!(f, "{}", c)?;
                }
                Ok(())
            }
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Pack four characters into a word name, first character most significant
pub const fn build_name(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_build_name() {
        assert_eq!(build_name(b'P', b'T', b'1', b' '), 0x5054_3120);
        assert_eq!(ObjectName::from_chars(b'S', b'E', b'M', b'1').to_string(), "SEM1");
    }

    #[test]
    fn test_validity() {
        assert!(!ObjectName::Word(0).is_valid());
        assert!(!ObjectName::Text(String::new()).is_valid());
        assert!(ObjectName::Text("queue".into()).is_valid());
    }
}
