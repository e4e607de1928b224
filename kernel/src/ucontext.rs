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

//! User-level execution contexts in the System V ucontext style.
//!
//! `make_context` lays out the register image and argument spill area for
//! a fresh context. Switching between prepared contexts is not wired up
//! yet; `swap_context` reports ENOSYS so callers can fall back to task
//! spawning instead of silently corrupting state.

use crate::error::{code, Error};
use log::warn;

/// Callee view of a paused context. Field order is the unwind order of
/// the switch path, do not reorder.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct MachineContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rsp: u64,
    pub rip: u64,
    pub mxcsr: u32,
}

/// Stack area backing a context. `base` is the lowest address.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct ContextStack {
    pub base: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct UContext {
    pub mctx: MachineContext,
    pub stack: ContextStack,
    /// Context resumed when this one returns, or null.
    pub link: *mut UContext,
}

impl Default for UContext {
    fn default() -> Self {
        Self {
            mctx: MachineContext::default(),
            stack: ContextStack::default(),
            link: core::ptr::null_mut(),
        }
    }
}

/// Number of arguments passed in registers before spilling to the stack.
const REG_ARGS: usize = 6;

/// Lands here when a context's entry function returns. Never reached
/// while swapping is unimplemented.
extern "C" fn start_context() -> ! {
    panic!("returned from a context that cannot be resumed");
}

/// Prepare `ucp` so that a switch to it enters `func(args...)`.
///
/// The first six arguments travel in rdi, rsi, rdx, rcx, r8 and r9;
/// the rest are spilled above the return slot. The stack pointer ends
/// up 16-byte aligned minus the 8 bytes the entry call consumes, which
/// is what the SysV ABI expects at function entry.
pub fn make_context(ucp: &mut UContext, func: usize, args: &[usize]) -> Result<(), Error> {
    if ucp.stack.base == 0 || ucp.stack.size < 64 + args.len() * 8 {
        return Err(code::EINVAL);
    }

    let spilled = args.len().saturating_sub(REG_ARGS);
    let slots = spilled + 1;

    let mut sp = ucp.stack.base + ucp.stack.size;
    sp -= slots * core::mem::size_of::<usize>();
    sp = (sp & !0xf) - core::mem::size_of::<usize>();

    // sp[0] catches the entry function's return, sp[slots] holds the
    // linked context so the catcher can find it.
    let stack = sp as *mut usize;
    unsafe {
        stack.write(start_context as usize);
        stack.add(slots).write(ucp.link as usize);
        for (i, &arg) in args.iter().enumerate().skip(REG_ARGS) {
            stack.add(i - REG_ARGS + 1).write(arg);
        }
    }

    let mctx = &mut ucp.mctx;
    *mctx = MachineContext {
        rip: func as u64,
        rsp: sp as u64,
        // The return catcher needs the context base in a callee-saved
        // register to locate uc_link.
        rbx: unsafe { stack.add(slots) } as u64,
        mxcsr: 0x1f80,
        ..MachineContext::default()
    };

    let regs = [
        &mut mctx.rdi,
        &mut mctx.rsi,
        &mut mctx.rdx,
        &mut mctx.rcx,
        &mut mctx.r8,
        &mut mctx.r9,
    ];
    for (slot, &arg) in regs.into_iter().zip(args.iter()) {
        *slot = arg as u64;
    }

    Ok(())
}

/// Save the current context into `oucp` and resume `ucp`.
///
/// Not implemented. Restoring a full machine context has to cooperate
/// with the scheduler's own switch path and nothing needs it yet.
pub fn swap_context(_oucp: &mut UContext, _ucp: &UContext) -> Result<(), Error> {
    warn!("swap_context is not implemented");
    Err(code::ENOSYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_stack(stack: &mut [u8]) -> UContext {
        UContext {
            stack: ContextStack {
                base: stack.as_mut_ptr() as usize,
                size: stack.len(),
            },
            ..UContext::default()
        }
    }

    #[test]
    fn register_arguments_land_in_abi_order() {
        let mut stack = vec![0u8; 4096];
        let mut ucp = context_with_stack(&mut stack);
        make_context(&mut ucp, 0x1000, &[10, 11, 12, 13, 14, 15]).unwrap();
        assert_eq!(ucp.mctx.rip, 0x1000);
        assert_eq!(
            [
                ucp.mctx.rdi,
                ucp.mctx.rsi,
                ucp.mctx.rdx,
                ucp.mctx.rcx,
                ucp.mctx.r8,
                ucp.mctx.r9
            ],
            [10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn extra_arguments_spill_above_the_return_slot() {
        let mut stack = vec![0u8; 4096];
        let mut ucp = context_with_stack(&mut stack);
        make_context(&mut ucp, 0x1000, &[0, 1, 2, 3, 4, 5, 66, 77]).unwrap();
        let sp = ucp.mctx.rsp as *const usize;
        unsafe {
            assert_eq!(sp.read(), start_context as usize);
            assert_eq!(sp.add(1).read(), 66);
            assert_eq!(sp.add(2).read(), 77);
        }
    }

    #[test]
    fn entry_stack_alignment_matches_the_abi() {
        let mut stack = vec![0u8; 4096];
        let mut ucp = context_with_stack(&mut stack);
        make_context(&mut ucp, 0x1000, &[]).unwrap();
        // 16-byte aligned before the call-style return push.
        assert_eq!((ucp.mctx.rsp + 8) % 16, 0);
    }

    #[test]
    fn link_is_reachable_from_rbx() {
        let mut stack = vec![0u8; 4096];
        let mut other = UContext::default();
        let mut ucp = context_with_stack(&mut stack);
        ucp.link = &mut other;
        make_context(&mut ucp, 0x1000, &[1, 2]).unwrap();
        let link_slot = ucp.mctx.rbx as *const usize;
        assert_eq!(unsafe { link_slot.read() }, &mut other as *mut UContext as usize);
    }

    #[test]
    fn swapping_is_reported_unimplemented() {
        let mut a = UContext::default();
        let b = UContext::default();
        assert_eq!(swap_context(&mut a, &b), Err(code::ENOSYS));
    }

    #[test]
    fn tiny_stacks_are_rejected() {
        let mut stack = vec![0u8; 32];
        let mut ucp = context_with_stack(&mut stack);
        assert_eq!(make_context(&mut ucp, 0x1000, &[]), Err(code::EINVAL));
    }
}
