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

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

use itertools::Itertools;

/// Result type returned by every fallible reader operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a reader failure.
///
/// Every error surfaced by the crate carries exactly one kind. Callers branch
/// on the kind; the message and context are for humans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An internal invariant broke. Not caused by input data or configuration.
    Unexpected,
    /// Opening, seeking or reading a file through the transport failed.
    ///
    /// Fatal to the current task, never retried by the reader.
    TransportFailed,
    /// File content is invalid.
    ///
    /// Returned when a fixed-width field runs past the end of a file, or a
    /// payload could not be decoded.
    DataInvalid,
    /// A block, file or delete-content kind is not supported.
    FeatureUnsupported,
    /// A record key inside a delete block could not be parsed.
    MalformedDeleteKey,
    /// A header or footer metadata section of a log block could not be parsed.
    MalformedMetadata,
    /// Table or reader configuration is missing or invalid for the requested pipeline.
    ConfigInvalid,
    /// The cancellation hook fired while a blocking operation was in flight.
    OperationCancelled,
}

impl ErrorKind {
    /// Stable name of the kind, as printed in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::TransportFailed => "TransportFailed",
            ErrorKind::DataInvalid => "DataInvalid",
            ErrorKind::FeatureUnsupported => "FeatureUnsupported",
            ErrorKind::MalformedDeleteKey => "MalformedDeleteKey",
            ErrorKind::MalformedMetadata => "MalformedMetadata",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::OperationCancelled => "OperationCancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by all reader operations.
///
/// `Display` prints one line:
///
/// ```shell
/// MalformedMetadata, context: { file: /t/.f1.log.1, offset: 42 } => unknown metadata kind 17
/// ```
///
/// `Debug` prints the context, the source and a captured backtrace on
/// separate lines. `{:#?}` falls back to the derived struct layout.
pub struct Error {
    kind: ErrorKind,
    message: String,
    // Ordered: file first, then position inside it.
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
    backtrace: Backtrace,
}

impl Error {
    /// Creates an error of `kind`. A backtrace is captured when
    /// `RUST_BACKTRACE` is set.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: vec![],
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// Appends a `key: value` context entry, typically `file` or `offset`.
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Attaches the underlying cause. Must be called at most once.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "error source already set");
        self.source = Some(source.into());
        self
    }

    #[cfg(test)]
    fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// Kind of the failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable message, without context.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Value of the first context entry named `key`.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find_map(|(k, v)| (*k == key).then_some(v.as_str()))
    }

    /// Backtrace captured at construction, possibly disabled.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.context.is_empty() {
            let entries = self
                .context
                .iter()
                .format_with(", ", |(k, v), g| g(&format_args!("{k}: {v}")));
            write!(f, ", context: {{ {entries} }}")?;
        }
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        match &self.source {
            Some(source) => write!(f, ", source: {source}"),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .field("context", &self.context)
                .field("source", &self.source)
                .field("backtrace", &self.backtrace)
                .finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;
        if !self.context.is_empty() {
            writeln!(f, "\nContext:")?;
            for (k, v) in &self.context {
                writeln!(f, "   {k}: {v}")?;
            }
        }
        if let Some(source) = &self.source {
            writeln!(f, "\nSource: {source:#}")?;
        }
        if self.backtrace.status() == BacktraceStatus::Captured {
            writeln!(f, "\nBacktrace:\n{}", self.backtrace)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|source| source.as_ref())
    }
}

/// Maps foreign errors onto a kind and a fixed message, keeping them as source.
macro_rules! impl_from_source {
    ($($source:ty => $kind:ident, $message:literal;)+) => {
        $(
            impl From<$source> for Error {
                fn from(err: $source) -> Self {
                    Error::new(ErrorKind::$kind, $message).with_source(err)
                }
            }
        )+
    };
}

impl_from_source! {
    std::str::Utf8Error => DataInvalid, "Invalid utf-8 bytes";
    std::string::FromUtf8Error => DataInvalid, "Invalid utf-8 bytes";
    std::num::ParseIntError => DataInvalid, "Failed to parse integer";
    std::num::ParseFloatError => DataInvalid, "Failed to parse float";
    std::num::TryFromIntError => DataInvalid, "Integer out of range";
    apache_avro::Error => DataInvalid, "Failed to decode avro";
    parquet::errors::ParquetError => DataInvalid, "Failed to read a Parquet file";
    serde_json::Error => DataInvalid, "Failed to parse json";
    std::io::Error => TransportFailed, "IO operation failed";
}

/// Returns a [`ErrorKind::DataInvalid`] error from the enclosing function
/// unless `$cond` holds.
///
/// ```ignore
/// ensure_data_valid!(len >= 4, "block of {} bytes has no version", len);
/// ```
#[macro_export]
macro_rules! ensure_data_valid {
    ($cond: expr, $fmt: literal, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::Error::new(
                $crate::error::ErrorKind::DataInvalid,
                format!($fmt, $($arg)*),
            ));
        }
    };
}
