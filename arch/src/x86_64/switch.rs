// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) vivo

use core::arch::global_asm;

// Saves the full integer state on the outgoing stack, parks the stack
// pointer in *rdi, and resumes from the frame found at rsi. Setting CR0.TS
// makes the next FPU touch trap so the scheduler can migrate the FPU state
// lazily.
global_asm!(
    r#"
    .global task_switch
task_switch:
    pushfq
    push rax
    push rcx
    push rdx
    push rbx
    push rbp
    push rsi
    push rdi
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15
    rdfsbase rax
    push rax
    mov [rdi], rsp
    mov rsp, rsi
    mov rax, cr0
    or rax, 8
    mov cr0, rax
    pop rax
    wrfsbase rax
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rdi
    pop rsi
    pop rbp
    pop rbx
    pop rdx
    pop rcx
    pop rax
    popfq
    ret
"#
);

extern "C" {
    fn task_switch(old_sp: *mut usize, new_sp: usize);
}

/// # Safety
///
/// `old_sp` must point to the saved-stack-pointer cell of the running task
/// and `new_sp` must hold a frame produced by this routine or by
/// `init_task_stack`.
pub unsafe fn switch_context(old_sp: *mut usize, new_sp: usize) {
    unsafe { task_switch(old_sp, new_sp) };
}
