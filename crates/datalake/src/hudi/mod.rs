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

//! Hudi merge-on-read: delta log parsing, log replay into a merge provider
//! and the pipelines merging base files with their logs.
//!
//! A file group is read in one of three ways:
//!
//! - no base file: the merged log state is drained directly;
//! - a base file without logs, or a table without record key: the base file
//!   is read as is;
//! - otherwise every base row is looked up in the merged log state by
//!   [`DeltaLogFilter`].

mod data_block;
mod delete_block;
mod delta_log_filter;
mod log_format;
mod log_reader;
mod merge_provider;
mod merged_log_reader;
mod partition;
mod record_key;
mod task_reader;
mod timeline;

pub use data_block::*;
pub use delete_block::*;
pub use delta_log_filter::*;
pub use log_format::*;
pub use log_reader::*;
pub use merge_provider::*;
pub use merged_log_reader::*;
pub use partition::*;
pub use record_key::*;
pub use task_reader::*;
pub use timeline::*;
