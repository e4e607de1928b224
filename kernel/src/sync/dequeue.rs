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

use crate::{
    error::{code, Error},
    sync::{ring::Ring, SpinlockIrqSave},
};

/// Bounded multi-producer multi-consumer queue.
///
/// Both ends are non-blocking: a full queue rejects the push with
/// `EOVERFLOW`, an empty queue rejects the pop with `ENOENT`, and a failed
/// call leaves the queue untouched. Safe to use from interrupt handlers.
pub struct Dequeue<T, const N: usize> {
    inner: SpinlockIrqSave<Ring<T, N>>,
}

impl<T, const N: usize> Dequeue<T, N> {
    pub const fn new() -> Self {
        Self {
            inner: SpinlockIrqSave::new(Ring::new()),
        }
    }

    pub fn push(&self, value: T) -> Result<(), Error> {
        self.inner.lock().push(value).map_err(|_| code::EOVERFLOW)
    }

    pub fn pop(&self) -> Result<T, Error> {
        self.inner.lock().pop().ok_or(code::ENOENT)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<T, const N: usize> Default for Dequeue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
