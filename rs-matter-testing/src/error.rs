/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

use core::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorCode {
    /// A bounded wait elapsed without its condition being satisfied
    Timeout,
    /// A report arrived out of the expected order
    SequenceMismatch,
    /// A report arrived while none was expected
    UnexpectedReport,
    InvalidArgument,
    InvalidState,
    InvalidData,
    /// Failure reported by the interaction-model transport; passed through as is
    Transport,
    NamespaceUnavailable,
    CommandFailed,
    /// A supervised subprocess exited while it was still needed
    ProcessExited,
    NotFound,
    StdIoError,
    RwLock,
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

pub struct Error {
    code: ErrorCode,
    context: Option<String>,
    inner: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub const fn new(code: ErrorCode) -> Self {
        Self {
            code,
            context: None,
            inner: None,
        }
    }

    /// Create an error carrying a diagnostic message, e.g. the values seen
    /// before a wait timed out.
    pub fn new_with_context(code: ErrorCode, context: impl Into<String>) -> Self {
        Self {
            code,
            context: Some(context.into()),
            inner: None,
        }
    }

    pub fn new_with_details(
        code: ErrorCode,
        detailed_err: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            code,
            context: None,
            inner: Some(detailed_err),
        }
    }

    /// Wrap an error coming from the interaction-model layer.
    pub fn transport(detailed_err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new_with_details(ErrorCode::Transport, Box::new(detailed_err))
    }

    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn details(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.inner.as_ref().map(|err| err.as_ref())
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    /// Attach (or prepend to) the diagnostic message.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();

        self.context = Some(match self.context.take() {
            Some(existing) => format!("{context}: {existing}"),
            None => context,
        });

        self
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new_with_details(ErrorCode::StdIoError, Box::new(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_e: std::sync::PoisonError<T>) -> Self {
        Self::new(ErrorCode::RwLock)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Self::new_with_details(ErrorCode::StdIoError, Box::new(e))
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Self::new_with_details(ErrorCode::InvalidArgument, Box::new(e))
    }
}

impl From<core::num::ParseIntError> for Error {
    fn from(e: core::num::ParseIntError) -> Self {
        Self::new_with_details(ErrorCode::InvalidData, Box::new(e))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error::{}", self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code())?;

        if let Some(context) = &self.context {
            write!(f, ": {context}")?;
        }

        if let Some(inner) = &self.inner {
            write!(f, " ({inner})")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .as_ref()
            .map(|err| err.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_prepended() {
        let err = Error::new_with_context(ErrorCode::Timeout, "saw [1, 2]")
            .with_context("waiting for OnOff");

        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.is_timeout());
        assert_eq!(err.context(), Some("waiting for OnOff: saw [1, 2]"));
        assert_eq!(err.to_string(), "Timeout: waiting for OnOff: saw [1, 2]");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "no ip").into();

        assert_eq!(err.code(), ErrorCode::StdIoError);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("no ip"));
    }
}
