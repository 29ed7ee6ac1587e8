// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::ops::BitOrAssign;

use roaring::RoaringTreemap;

/// Deleted row positions of one data file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeleteVector {
    inner: RoaringTreemap,
}

impl DeleteVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `pos` deleted. Returns `false` if it already was.
    pub fn insert(&mut self, pos: u64) -> bool {
        self.inner.insert(pos)
    }

    pub fn contains(&self, pos: u64) -> bool {
        self.inner.contains(pos)
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Deleted positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.inner.iter()
    }
}

impl BitOrAssign for DeleteVector {
    fn bitor_assign(&mut self, other: Self) {
        self.inner.bitor_assign(&other.inner);
    }
}

impl FromIterator<u64> for DeleteVector {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_spans_high_bits() {
        let high = (1u64 << 32) + 5;
        let mut dv = DeleteVector::from_iter([3, 1]);
        assert!(!dv.insert(3));
        dv |= DeleteVector::from_iter([high, 2]);

        assert_eq!(dv.len(), 4);
        assert!(dv.contains(high));
        assert!(!dv.contains(5));
        assert_eq!(dv.iter().collect::<Vec<_>>(), vec![1, 2, 3, high]);
    }
}
