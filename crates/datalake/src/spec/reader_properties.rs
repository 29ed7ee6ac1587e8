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

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

// Helper function to parse a property from a HashMap
// If the property is not found, use the default value
fn parse_property<T: FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T>
where
    <T as FromStr>::Err: Display,
{
    properties.get(key).map_or(Ok(default), |value| {
        value.parse::<T>().map_err(|e| {
            Error::new(
                ErrorKind::ConfigInvalid,
                format!("Invalid value for {key}: {e}"),
            )
        })
    })
}

/// Reader tunables. Every field has a default, so an empty property map is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderProperties {
    /// Total delta-log bytes below which the in-memory hash table merge
    /// provider is used; at or above it the ordered, spilling provider is used.
    pub hash_table_max_log_bytes: u64,
    /// Memory budget of the ordered provider before it spills a sorted run.
    pub spill_memtable_bytes: usize,
    /// Directory for spilled runs; system temp dir if unset.
    pub spill_dir: Option<PathBuf>,
    /// Total position-delete records below which deletes are materialized in
    /// memory; at or above it they are merged as sorted streams.
    pub position_delete_streaming_threshold: u64,
    /// Window size used when scanning a log file for the next block marker.
    pub log_scan_buffer_bytes: usize,
    /// Whether merge-on-read emits log rows that matched no base row.
    pub emit_log_only_rows: bool,
}

impl ReaderProperties {
    /// Property key for [`ReaderProperties::hash_table_max_log_bytes`].
    pub const PROPERTY_HASH_TABLE_MAX_LOG_BYTES: &str = "read.merge.hash-table.max-log-bytes";
    /// Default for [`ReaderProperties::hash_table_max_log_bytes`], 256 MiB.
    pub const PROPERTY_HASH_TABLE_MAX_LOG_BYTES_DEFAULT: u64 = 256 * 1024 * 1024;

    /// Property key for [`ReaderProperties::spill_memtable_bytes`].
    pub const PROPERTY_SPILL_MEMTABLE_BYTES: &str = "read.merge.spill.memtable-bytes";
    /// Default for [`ReaderProperties::spill_memtable_bytes`], 64 MiB.
    pub const PROPERTY_SPILL_MEMTABLE_BYTES_DEFAULT: usize = 64 * 1024 * 1024;

    /// Property key for [`ReaderProperties::spill_dir`].
    pub const PROPERTY_SPILL_DIR: &str = "read.merge.spill.dir";

    /// Property key for [`ReaderProperties::position_delete_streaming_threshold`].
    pub const PROPERTY_POSITION_DELETE_STREAMING_THRESHOLD: &str =
        "read.position-deletes.streaming-threshold";
    /// Default for [`ReaderProperties::position_delete_streaming_threshold`].
    pub const PROPERTY_POSITION_DELETE_STREAMING_THRESHOLD_DEFAULT: u64 = 1_000_000;

    /// Property key for [`ReaderProperties::log_scan_buffer_bytes`].
    pub const PROPERTY_LOG_SCAN_BUFFER_BYTES: &str = "read.log.scan-buffer-bytes";
    /// Default for [`ReaderProperties::log_scan_buffer_bytes`], 1 MiB.
    pub const PROPERTY_LOG_SCAN_BUFFER_BYTES_DEFAULT: usize = 1024 * 1024;

    /// Property key for [`ReaderProperties::emit_log_only_rows`].
    pub const PROPERTY_EMIT_LOG_ONLY_ROWS: &str = "read.merge.emit-log-only-rows";
    /// Default for [`ReaderProperties::emit_log_only_rows`].
    pub const PROPERTY_EMIT_LOG_ONLY_ROWS_DEFAULT: bool = true;
}

impl Default for ReaderProperties {
    fn default() -> Self {
        Self {
            hash_table_max_log_bytes: Self::PROPERTY_HASH_TABLE_MAX_LOG_BYTES_DEFAULT,
            spill_memtable_bytes: Self::PROPERTY_SPILL_MEMTABLE_BYTES_DEFAULT,
            spill_dir: None,
            position_delete_streaming_threshold:
                Self::PROPERTY_POSITION_DELETE_STREAMING_THRESHOLD_DEFAULT,
            log_scan_buffer_bytes: Self::PROPERTY_LOG_SCAN_BUFFER_BYTES_DEFAULT,
            emit_log_only_rows: Self::PROPERTY_EMIT_LOG_ONLY_ROWS_DEFAULT,
        }
    }
}

impl TryFrom<&HashMap<String, String>> for ReaderProperties {
    type Error = Error;

    fn try_from(props: &HashMap<String, String>) -> Result<Self> {
        let log_scan_buffer_bytes = parse_property(
            props,
            Self::PROPERTY_LOG_SCAN_BUFFER_BYTES,
            Self::PROPERTY_LOG_SCAN_BUFFER_BYTES_DEFAULT,
        )?;
        if log_scan_buffer_bytes <= crate::hudi::MAGIC.len() {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                format!(
                    "{} must be larger than the block marker, got {log_scan_buffer_bytes}",
                    Self::PROPERTY_LOG_SCAN_BUFFER_BYTES
                ),
            ));
        }

        Ok(ReaderProperties {
            hash_table_max_log_bytes: parse_property(
                props,
                Self::PROPERTY_HASH_TABLE_MAX_LOG_BYTES,
                Self::PROPERTY_HASH_TABLE_MAX_LOG_BYTES_DEFAULT,
            )?,
            spill_memtable_bytes: parse_property(
                props,
                Self::PROPERTY_SPILL_MEMTABLE_BYTES,
                Self::PROPERTY_SPILL_MEMTABLE_BYTES_DEFAULT,
            )?,
            spill_dir: props.get(Self::PROPERTY_SPILL_DIR).map(PathBuf::from),
            position_delete_streaming_threshold: parse_property(
                props,
                Self::PROPERTY_POSITION_DELETE_STREAMING_THRESHOLD,
                Self::PROPERTY_POSITION_DELETE_STREAMING_THRESHOLD_DEFAULT,
            )?,
            log_scan_buffer_bytes,
            emit_log_only_rows: parse_property(
                props,
                Self::PROPERTY_EMIT_LOG_ONLY_ROWS,
                Self::PROPERTY_EMIT_LOG_ONLY_ROWS_DEFAULT,
            )?,
        })
    }
}
