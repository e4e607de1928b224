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

use core::mem::MaybeUninit;

/// Unlocked fixed ring holding up to `N - 1` elements.
///
/// `front == back` is empty; advancing `back` onto `front` would be full.
/// Callers provide their own locking.
pub struct Ring<T, const N: usize> {
    front: usize,
    back: usize,
    buffer: [MaybeUninit<T>; N],
}

impl<T, const N: usize> Ring<T, N> {
    pub const fn new() -> Self {
        Self {
            front: 0,
            back: 0,
            buffer: [const { MaybeUninit::uninit() }; N],
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front == self.back
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        (self.back + 1) % N == self.front
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.back + N - self.front) % N
    }

    /// Returns the element when the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.buffer[self.back].write(value);
        self.back = (self.back + 1) % N;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = unsafe { self.buffer[self.front].assume_init_read() };
        self.front = (self.front + 1) % N;
        Some(value)
    }

    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        Some(unsafe { self.buffer[self.front].assume_init_ref() })
    }
}

impl<T, const N: usize> Drop for Ring<T, N> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_n_minus_one() {
        let mut r: Ring<u32, 4> = Ring::new();
        assert!(r.push(1).is_ok());
        assert!(r.push(2).is_ok());
        assert!(r.push(3).is_ok());
        assert!(r.is_full());
        assert_eq!(r.push(4), Err(4));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn push_pop_keeps_order_across_wrap() {
        let mut r: Ring<u32, 4> = Ring::new();
        for round in 0..10u32 {
            r.push(round * 2).unwrap();
            r.push(round * 2 + 1).unwrap();
            assert_eq!(r.pop(), Some(round * 2));
            assert_eq!(r.pop(), Some(round * 2 + 1));
        }
        assert!(r.is_empty());
        assert_eq!(r.pop(), None);
    }

    #[test]
    fn drop_releases_unconsumed_elements() {
        use std::rc::Rc;
        let probe = Rc::new(());
        {
            let mut r: Ring<Rc<()>, 8> = Ring::new();
            r.push(probe.clone()).unwrap();
            r.push(probe.clone()).unwrap();
        }
        assert_eq!(Rc::strong_count(&probe), 1);
    }
}
