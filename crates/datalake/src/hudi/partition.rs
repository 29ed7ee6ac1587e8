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

//! Partition values encoded in file paths.

use crate::spec::{Datum, Projection, Schema, TableOptions};
use crate::{Error, ErrorKind, Result};

/// Value hive writes for a null partition.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Parses the partition values of `file_path` into `(column index, value)`
/// constants for every used partition column.
///
/// Returns no constants when the table doesn't take partition values from
/// paths. Null partitions produce no constant.
pub fn partition_constants(
    schema: &Schema,
    options: &TableOptions,
    projection: &Projection,
    file_path: &str,
) -> Result<Vec<(usize, Datum)>> {
    if !options.partition_values_from_path() {
        return Ok(vec![]);
    }

    let raw = if options.hive_style_partitioning {
        hive_segments(&options.partition_fields, file_path)?
    } else {
        positional_segments(&options.partition_fields, file_path)?
    };

    let indices = schema.field_indices(options.partition_fields.as_slice())?;
    let mut constants = Vec::with_capacity(indices.len());
    for ((name, idx), raw) in options.partition_fields.iter().zip(indices).zip(raw) {
        if !projection.is_used(idx) || raw == HIVE_DEFAULT_PARTITION {
            continue;
        }
        let value = unescape_path_name(raw);
        let ty = schema.fields()[idx].field_type;
        let datum = Datum::parse(ty, &value).map_err(|e| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Partition value {value:?} of {name} doesn't match column type {ty}"),
            )
            .with_context("file", file_path)
            .with_source(e)
        })?;
        constants.push((idx, datum));
    }
    Ok(constants)
}

/// Directory segments of a path, without scheme and file name.
fn directories(file_path: &str) -> Vec<&str> {
    let path = file_path
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(file_path);
    let mut segments = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
    segments.pop();
    segments
}

fn hive_segments<'a>(fields: &[String], file_path: &'a str) -> Result<Vec<&'a str>> {
    let dirs = directories(file_path);
    fields
        .iter()
        .map(|field| {
            dirs.iter()
                .rev()
                .filter_map(|dir| dir.split_once('='))
                .find(|(key, _)| key == field)
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::DataInvalid,
                        format!("No {field}=<value> segment in partition path"),
                    )
                    .with_context("file", file_path)
                })
        })
        .collect()
}

fn positional_segments<'a>(fields: &[String], file_path: &'a str) -> Result<Vec<&'a str>> {
    let dirs = directories(file_path);
    if dirs.len() < fields.len() {
        return Err(Error::new(
            ErrorKind::DataInvalid,
            format!(
                "Path has {} directories, fewer than the {} partition fields",
                dirs.len(),
                fields.len()
            ),
        )
        .with_context("file", file_path));
    }
    Ok(dirs[dirs.len() - fields.len()..].to_vec())
}

/// Reverses the `%XX` escaping writers apply to partition path names.
/// Invalid escapes are kept as they are.
fn unescape_path_name(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = |b: u8| (b as char).to_digit(16).unwrap_or_default() as u8;
            out.push(hex(bytes[i + 1]) << 4 | hex(bytes[i + 2]));
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
