// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type for acknowledgment tracking and RTT estimation.

use strum_macros::EnumIter;

/// Errors reported by the acknowledgment and RTT machinery.
///
/// None of them is fatal to a connection. The worst outcome of any failure
/// path is that a given acknowledgment does not improve the recovery state.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// There is no more work to do.
    #[default]
    Done,

    /// A new SACK range could not be allocated. The received range was not
    /// recorded, but the existing ranges are still valid.
    AllocationFailure,

    /// The provided buffer is too short.
    BufferTooShort,

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// The operation on the connection is invalid, e.g. it refers to an
    /// unknown path.
    InvalidOperation(String),

    /// The configuration is invalid.
    InvalidConfig(String),

    /// I/O error.
    IoError(String),
}

impl Error {
    /// Return whether the error leaves the caller free to retry later, for
    /// instance on the next duplicate arrival of the same packet numbers.
    pub fn is_soft(&self) -> bool {
        matches!(self, Error::Done | Error::AllocationFailure)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn soft_errors() {
        for err in Error::iter() {
            match err {
                Error::Done | Error::AllocationFailure => assert!(err.is_soft()),
                _ => assert!(!err.is_soft()),
            }
        }
    }

    #[test]
    fn io_error() {
        use std::error::Error;
        let e = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let e = super::Error::from(e);

        assert_eq!(format!("{}", e), "IoError(\"unexpected end of file\")");
        assert!(e.source().is_none());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Error::AllocationFailure), "AllocationFailure");
        assert_eq!(
            format!("{}", Error::InvalidOperation("unknown path 3".into())),
            "InvalidOperation(\"unknown path 3\")"
        );
    }
}
