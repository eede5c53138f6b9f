use std::cmp::Eq;
use std::fmt;
use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq)]
pub enum NodeIDError {
    NotSingleCharacter,
    NotUppercase,
}

impl fmt::Display for NodeIDError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeIDError::NotSingleCharacter => f.write_fmt(format_args!("Not a single character")),
            NodeIDError::NotUppercase => f.write_fmt(format_args!("Not an uppercase character")),
        }
    }
}

// Link-layer address of a node. Addresses are single uppercase letters,
// which keeps frames small and logs readable in the small topologies
// (source, relays, destination) this stack is built for.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "char", into = "char")]
pub struct NodeID(char);

impl NodeID {
    pub const fn new(c: char) -> Self {
        Self(c)
    }
}

impl FromStr for NodeID {
    type Err = NodeIDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(Self::Err::NotSingleCharacter);
        };

        Self::try_from(c)
    }
}

impl TryFrom<char> for NodeID {
    type Error = NodeIDError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        if !value.is_ascii_uppercase() {
            return Err(Self::Error::NotUppercase);
        }

        Ok(Self(value))
    }
}

impl From<NodeID> for char {
    fn from(id: NodeID) -> char {
        id.0
    }
}

impl Deref for NodeID {
    type Target = char;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
