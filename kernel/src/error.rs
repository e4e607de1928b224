// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(dead_code)]
use core::num::TryFromIntError;

pub mod code {
    pub const EOK: super::Error = super::Error(0);
    pub const ETIME: super::Error = super::Error(-libc::ETIME);
    pub const ETIMEDOUT: super::Error = super::Error(-libc::ETIMEDOUT);
    pub const ENOMEM: super::Error = super::Error(-libc::ENOMEM);
    pub const ENOSYS: super::Error = super::Error(-libc::ENOSYS);
    pub const EBUSY: super::Error = super::Error(-libc::EBUSY);
    pub const EINVAL: super::Error = super::Error(-libc::EINVAL);
    pub const ENOENT: super::Error = super::Error(-libc::ENOENT);
    pub const EAGAIN: super::Error = super::Error(-libc::EAGAIN);
    pub const EOVERFLOW: super::Error = super::Error(-libc::EOVERFLOW);
    pub const ECANCELED: super::Error = super::Error(-libc::ECANCELED);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Error(i32);

impl Error {
    pub fn from_errno(errno: i32) -> Error {
        Error(errno)
    }

    pub fn to_errno(self) -> i32 {
        self.0
    }

    pub fn name(&self) -> &'static str {
        match *self {
            code::EOK => "OK",
            code::ETIME => "Timer expired",
            code::ETIMEDOUT => "Timed out",
            code::ENOMEM => "Cannot allocate memory",
            code::ENOSYS => "Function not implemented",
            code::EBUSY => "Device or resource busy",
            code::EINVAL => "Invalid argument",
            code::ENOENT => "No such entry",
            code::EAGAIN => "Try again",
            code::EOVERFLOW => "Value too large",
            code::ECANCELED => "Operation canceled",
            _ => "EUNKNOWN",
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Error {
        code::EINVAL
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Error({}): {}", self.0, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        assert_eq!(Error::from_errno(-libc::EBUSY), code::EBUSY);
        assert_eq!(code::EINVAL.to_errno(), -libc::EINVAL);
    }

    #[test]
    fn display_names_known_codes() {
        assert_eq!(code::ENOSYS.name(), "Function not implemented");
        assert_eq!(Error::from_errno(-12345).name(), "EUNKNOWN");
    }
}
