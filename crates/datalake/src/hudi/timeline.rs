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

//! Which commit instants a scan may apply.

use std::collections::BTreeSet;

use crate::spec::TableOptions;

/// Classifies block instants against the table timeline and the scan's
/// target instant. Instants compare as strings.
#[derive(Debug, Clone, Default)]
pub struct InstantFilter {
    completed: BTreeSet<String>,
    inflight: BTreeSet<String>,
    first_non_savepoint_commit: Option<String>,
    target_instant: Option<String>,
}

impl InstantFilter {
    /// Filter over the timeline of `options`, reading as of `target_instant`.
    pub fn new(options: &TableOptions, target_instant: Option<&str>) -> Self {
        Self {
            completed: options.completed_instants.clone(),
            inflight: options.inflight_instants.clone(),
            first_non_savepoint_commit: options.first_non_savepoint_commit.clone(),
            target_instant: target_instant.map(str::to_string),
        }
    }

    /// Whether `instant` is newer than the instant being read.
    pub fn is_after_target(&self, instant: &str) -> bool {
        self.target_instant
            .as_deref()
            .is_some_and(|target| instant > target)
    }

    /// Whether `instant` belongs to a completed, non-inflight commit.
    ///
    /// Instants before the first non-savepoint commit are archived and count
    /// as completed.
    pub fn is_completed(&self, instant: &str) -> bool {
        if self.inflight.contains(instant) {
            return false;
        }
        self.completed.contains(instant)
            || self
                .first_non_savepoint_commit
                .as_deref()
                .is_some_and(|first| instant < first)
    }
}
