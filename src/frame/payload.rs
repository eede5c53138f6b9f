use std::ops::Index;

use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    // creational
    pub fn new(raw: Vec<u8>) -> Self {
        Self(raw)
    }

    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    //
    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn size_bits(&self) -> usize {
        self.0.len() * 8
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(raw: Vec<u8>) -> Self {
        Self(raw)
    }
}

impl From<&[u8]> for Payload {
    fn from(raw: &[u8]) -> Self {
        Self(raw.to_vec())
    }
}

impl Index<usize> for Payload {
    type Output = u8;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}
