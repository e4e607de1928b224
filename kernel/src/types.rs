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

/// Index into the static task table.
pub type Tid = u32;
/// Task priority, 0 (idle) to MAX_PRIO - 1.
pub type Prio = u8;
pub type CoreId = u32;

/// Sentinel for "no task", also the free-owner marker of the ticket locks.
pub const NO_TASK: Tid = Tid::MAX;
pub const NO_CORE: CoreId = CoreId::MAX;

/// A value protected only by alignment: pads `T` to a cache line so
/// per-core slots never share one.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

impl<T> CacheAligned<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> core::ops::Deref for CacheAligned<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> core::ops::DerefMut for CacheAligned<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
