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

use core::fmt;

#[macro_export]
macro_rules! kprint {
    ($fmt:expr) => ({
        use core::fmt::Write;
        let mut writer = $crate::console::Console {};
        writer.write_fmt(format_args!($fmt)).unwrap();
    });
    ($fmt:expr, $($arg:tt)*) => ({
        use core::fmt::Write;
        let mut writer = $crate::console::Console {};
        writer.write_fmt(format_args!($fmt, $($arg)*)).unwrap();
    });
}

#[macro_export]
macro_rules! kprintln {
    ($fmt:expr) => ({
        use core::fmt::Write;
        let mut writer = $crate::console::Console {};
        writer.write_fmt(format_args!(concat!($fmt, "\n"))).unwrap();
    });
    ($fmt:expr, $($arg:tt)*) => ({
        use core::fmt::Write;
        let mut writer = $crate::console::Console {};
        writer.write_fmt(format_args!(concat!($fmt, "\n"), $($arg)*)).unwrap();
    });
}

pub struct Console;

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        isle_arch::console_write(s);
        Ok(())
    }
}
