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

use core::sync::atomic::{AtomicI32, AtomicI64, Ordering};

macro_rules! atomic_counter {
    ($name:ident, $atomic:ty, $int:ty) => {
        /// Sequentially consistent counter; the building block of the
        /// ticket locks.
        #[derive(Debug)]
        #[repr(transparent)]
        pub struct $name($atomic);

        impl $name {
            pub const fn new(value: $int) -> Self {
                Self(<$atomic>::new(value))
            }

            #[inline]
            pub fn read(&self) -> $int {
                self.0.load(Ordering::SeqCst)
            }

            #[inline]
            pub fn set(&self, value: $int) {
                self.0.store(value, Ordering::SeqCst)
            }

            /// Add one and return the new value.
            #[inline]
            pub fn inc(&self) -> $int {
                self.0.fetch_add(1, Ordering::SeqCst) + 1
            }

            #[inline]
            pub fn add(&self, value: $int) -> $int {
                self.0.fetch_add(value, Ordering::SeqCst) + value
            }

            /// Install `new` if the current value is `expected`; returns
            /// the value observed before the exchange.
            #[inline]
            pub fn cmpxchg(&self, expected: $int, new: $int) -> $int {
                match self
                    .0
                    .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(prev) => prev,
                    Err(prev) => prev,
                }
            }
        }
    };
}

atomic_counter!(AtomicCounter32, AtomicI32, i32);
atomic_counter!(AtomicCounter64, AtomicI64, i64);
