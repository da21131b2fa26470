//! 256-entry Interrupt Descriptor Table (C6, spec §4.5).
//!
//! Entries 0-31 route to CPU exception handlers (page-fault decodes CR2 and
//! the error-code bits). Entries 32-127 route to a shared trampoline per
//! vector that calls the common dispatcher in [`crate::irq`], which looks up
//! `routines[vector-32]`. Vector 0x80 (`int 0x80`) is the syscall gate and is
//! wired directly to [`crate::syscall::dispatch_from_gate`], not through the
//! IRQ routine table, matching spec's "syscall (0x80 software int, not
//! through IOAPIC)".

use lazy_static::lazy_static;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

/// First vector routed through the common IRQ dispatcher.
const IRQ_BASE: u8 = 32;
/// Last vector routed through the common IRQ dispatcher (inclusive).
const IRQ_LAST: u8 = 127;

macro_rules! irq_trampoline {
    ($name:ident, $vector:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
            crate::irq::dispatch($vector);
        }
    };
}

// Generate one distinct extern "x86-interrupt" function per routed vector;
// the x86-interrupt ABI carries no vector number of its own, so each vector
// needs its own monomorphized trampoline.
type Trampoline = extern "x86-interrupt" fn(InterruptStackFrame);

irq_trampoline!(irq_trampoline_32, 32);
irq_trampoline!(irq_trampoline_33, 33);
irq_trampoline!(irq_trampoline_34, 34);
irq_trampoline!(irq_trampoline_35, 35);
irq_trampoline!(irq_trampoline_36, 36);
irq_trampoline!(irq_trampoline_37, 37);
irq_trampoline!(irq_trampoline_38, 38);
irq_trampoline!(irq_trampoline_39, 39);
irq_trampoline!(irq_trampoline_40, 40);
irq_trampoline!(irq_trampoline_41, 41);
irq_trampoline!(irq_trampoline_42, 42);
irq_trampoline!(irq_trampoline_43, 43);
irq_trampoline!(irq_trampoline_44, 44);
irq_trampoline!(irq_trampoline_45, 45);
irq_trampoline!(irq_trampoline_46, 46);
irq_trampoline!(irq_trampoline_47, 47);
irq_trampoline!(irq_trampoline_48, 48);
irq_trampoline!(irq_trampoline_49, 49);
irq_trampoline!(irq_trampoline_50, 50);
irq_trampoline!(irq_trampoline_51, 51);
irq_trampoline!(irq_trampoline_52, 52);
irq_trampoline!(irq_trampoline_53, 53);
irq_trampoline!(irq_trampoline_54, 54);
irq_trampoline!(irq_trampoline_55, 55);
irq_trampoline!(irq_trampoline_56, 56);
irq_trampoline!(irq_trampoline_57, 57);
irq_trampoline!(irq_trampoline_58, 58);
irq_trampoline!(irq_trampoline_59, 59);
irq_trampoline!(irq_trampoline_60, 60);
irq_trampoline!(irq_trampoline_61, 61);
irq_trampoline!(irq_trampoline_62, 62);
irq_trampoline!(irq_trampoline_63, 63);
irq_trampoline!(irq_trampoline_64, 64);
irq_trampoline!(irq_trampoline_65, 65);
irq_trampoline!(irq_trampoline_66, 66);
irq_trampoline!(irq_trampoline_67, 67);
irq_trampoline!(irq_trampoline_68, 68);
irq_trampoline!(irq_trampoline_69, 69);
irq_trampoline!(irq_trampoline_70, 70);
irq_trampoline!(irq_trampoline_71, 71);
irq_trampoline!(irq_trampoline_72, 72);
irq_trampoline!(irq_trampoline_73, 73);
irq_trampoline!(irq_trampoline_74, 74);
irq_trampoline!(irq_trampoline_75, 75);
irq_trampoline!(irq_trampoline_76, 76);
irq_trampoline!(irq_trampoline_77, 77);
irq_trampoline!(irq_trampoline_78, 78);
irq_trampoline!(irq_trampoline_79, 79);
irq_trampoline!(irq_trampoline_80, 80);
irq_trampoline!(irq_trampoline_81, 81);
irq_trampoline!(irq_trampoline_82, 82);
irq_trampoline!(irq_trampoline_83, 83);
irq_trampoline!(irq_trampoline_84, 84);
irq_trampoline!(irq_trampoline_85, 85);
irq_trampoline!(irq_trampoline_86, 86);
irq_trampoline!(irq_trampoline_87, 87);
irq_trampoline!(irq_trampoline_88, 88);
irq_trampoline!(irq_trampoline_89, 89);
irq_trampoline!(irq_trampoline_90, 90);
irq_trampoline!(irq_trampoline_91, 91);
irq_trampoline!(irq_trampoline_92, 92);
irq_trampoline!(irq_trampoline_93, 93);
irq_trampoline!(irq_trampoline_94, 94);
irq_trampoline!(irq_trampoline_95, 95);
irq_trampoline!(irq_trampoline_96, 96);
irq_trampoline!(irq_trampoline_97, 97);
irq_trampoline!(irq_trampoline_98, 98);
irq_trampoline!(irq_trampoline_99, 99);
irq_trampoline!(irq_trampoline_100, 100);
irq_trampoline!(irq_trampoline_101, 101);
irq_trampoline!(irq_trampoline_102, 102);
irq_trampoline!(irq_trampoline_103, 103);
irq_trampoline!(irq_trampoline_104, 104);
irq_trampoline!(irq_trampoline_105, 105);
irq_trampoline!(irq_trampoline_106, 106);
irq_trampoline!(irq_trampoline_107, 107);
irq_trampoline!(irq_trampoline_108, 108);
irq_trampoline!(irq_trampoline_109, 109);
irq_trampoline!(irq_trampoline_110, 110);
irq_trampoline!(irq_trampoline_111, 111);
irq_trampoline!(irq_trampoline_112, 112);
irq_trampoline!(irq_trampoline_113, 113);
irq_trampoline!(irq_trampoline_114, 114);
irq_trampoline!(irq_trampoline_115, 115);
irq_trampoline!(irq_trampoline_116, 116);
irq_trampoline!(irq_trampoline_117, 117);
irq_trampoline!(irq_trampoline_118, 118);
irq_trampoline!(irq_trampoline_119, 119);
irq_trampoline!(irq_trampoline_120, 120);
irq_trampoline!(irq_trampoline_121, 121);
irq_trampoline!(irq_trampoline_122, 122);
irq_trampoline!(irq_trampoline_123, 123);
irq_trampoline!(irq_trampoline_124, 124);
irq_trampoline!(irq_trampoline_125, 125);
irq_trampoline!(irq_trampoline_126, 126);
irq_trampoline!(irq_trampoline_127, 127);

const TRAMPOLINES: [Trampoline; 96] = [
    irq_trampoline_32,
    irq_trampoline_33,
    irq_trampoline_34,
    irq_trampoline_35,
    irq_trampoline_36,
    irq_trampoline_37,
    irq_trampoline_38,
    irq_trampoline_39,
    irq_trampoline_40,
    irq_trampoline_41,
    irq_trampoline_42,
    irq_trampoline_43,
    irq_trampoline_44,
    irq_trampoline_45,
    irq_trampoline_46,
    irq_trampoline_47,
    irq_trampoline_48,
    irq_trampoline_49,
    irq_trampoline_50,
    irq_trampoline_51,
    irq_trampoline_52,
    irq_trampoline_53,
    irq_trampoline_54,
    irq_trampoline_55,
    irq_trampoline_56,
    irq_trampoline_57,
    irq_trampoline_58,
    irq_trampoline_59,
    irq_trampoline_60,
    irq_trampoline_61,
    irq_trampoline_62,
    irq_trampoline_63,
    irq_trampoline_64,
    irq_trampoline_65,
    irq_trampoline_66,
    irq_trampoline_67,
    irq_trampoline_68,
    irq_trampoline_69,
    irq_trampoline_70,
    irq_trampoline_71,
    irq_trampoline_72,
    irq_trampoline_73,
    irq_trampoline_74,
    irq_trampoline_75,
    irq_trampoline_76,
    irq_trampoline_77,
    irq_trampoline_78,
    irq_trampoline_79,
    irq_trampoline_80,
    irq_trampoline_81,
    irq_trampoline_82,
    irq_trampoline_83,
    irq_trampoline_84,
    irq_trampoline_85,
    irq_trampoline_86,
    irq_trampoline_87,
    irq_trampoline_88,
    irq_trampoline_89,
    irq_trampoline_90,
    irq_trampoline_91,
    irq_trampoline_92,
    irq_trampoline_93,
    irq_trampoline_94,
    irq_trampoline_95,
    irq_trampoline_96,
    irq_trampoline_97,
    irq_trampoline_98,
    irq_trampoline_99,
    irq_trampoline_100,
    irq_trampoline_101,
    irq_trampoline_102,
    irq_trampoline_103,
    irq_trampoline_104,
    irq_trampoline_105,
    irq_trampoline_106,
    irq_trampoline_107,
    irq_trampoline_108,
    irq_trampoline_109,
    irq_trampoline_110,
    irq_trampoline_111,
    irq_trampoline_112,
    irq_trampoline_113,
    irq_trampoline_114,
    irq_trampoline_115,
    irq_trampoline_116,
    irq_trampoline_117,
    irq_trampoline_118,
    irq_trampoline_119,
    irq_trampoline_120,
    irq_trampoline_121,
    irq_trampoline_122,
    irq_trampoline_123,
    irq_trampoline_124,
    irq_trampoline_125,
    irq_trampoline_126,
    irq_trampoline_127,
];


/// Software-interrupt syscall gate (`int 0x80`). Unlike every other vector
/// here, the syscall ABI (spec §6: call number in `rax`, arguments in `rbx`,
/// `rcx`, `rdx`, `rsi`, `rdi`) needs the raw general-purpose registers, which
/// `extern "x86-interrupt"` has no way to expose -- so this one is naked
/// asm instead of a generated trampoline.
///
/// Saves all 14 callee/caller registers `iretq` doesn't already cover,
/// reshuffles the syscall arguments into the System V argument registers for
/// [`crate::syscall::dispatch_from_gate`], and restores them before
/// returning. The CPU pushes a 40-byte interrupt frame (no error code) onto
/// a stack the SDM guarantees was 16-byte aligned beforehand, so the 14
/// pushes below (112 bytes, itself 16-byte aligned) leave `rsp` 8 bytes off
/// the System V call boundary; `sub rsp, 8` / `add rsp, 8` around the call
/// corrects it. `rax` is deliberately never saved/restored, so the Rust
/// handler's return value is still sitting in `rax` at `iretq`, exactly
/// where the syscall ABI expects its result.
#[naked]
extern "C" fn syscall_gate() {
    unsafe {
        core::arch::asm!(
            "push rbp",
            "push rdi",
            "push rsi",
            "push rdx",
            "push rcx",
            "push rbx",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov r10, rax",
            "mov r11, rbx",
            "mov r12, rcx",
            "mov r13, rdx",
            "mov r14, rsi",
            "mov r15, rdi",
            "mov rdi, r10",
            "mov rsi, r11",
            "mov rdx, r12",
            "mov rcx, r13",
            "mov r8, r14",
            "mov r9, r15",
            "sub rsp, 8",
            "call {handler}",
            "add rsp, 8",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rbx",
            "pop rcx",
            "pop rdx",
            "pop rsi",
            "pop rdi",
            "pop rbp",
            "iretq",
            handler = sym crate::syscall::dispatch_from_gate,
            options(noreturn),
        );
    }
}

extern "x86-interrupt" fn divide_error_handler(frame: InterruptStackFrame) {
    fault("DIVIDE ERROR", &frame, None);
}

extern "x86-interrupt" fn debug_handler(frame: InterruptStackFrame) {
    fault("DEBUG", &frame, None);
}

extern "x86-interrupt" fn nmi_handler(frame: InterruptStackFrame) {
    fault("NON-MASKABLE INTERRUPT", &frame, None);
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    println!("[IDT] breakpoint\n{:#?}", frame);
}

extern "x86-interrupt" fn overflow_handler(frame: InterruptStackFrame) {
    fault("OVERFLOW", &frame, None);
}

extern "x86-interrupt" fn bound_range_handler(frame: InterruptStackFrame) {
    fault("BOUND RANGE EXCEEDED", &frame, None);
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    fault("INVALID OPCODE", &frame, None);
}

extern "x86-interrupt" fn device_not_available_handler(frame: InterruptStackFrame) {
    fault("DEVICE NOT AVAILABLE", &frame, None);
}

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, _error_code: u64) -> ! {
    panic!("DOUBLE FAULT\n{:#?}", frame);
}

extern "x86-interrupt" fn invalid_tss_handler(frame: InterruptStackFrame, error_code: u64) {
    fault("INVALID TSS", &frame, Some(error_code));
}

extern "x86-interrupt" fn segment_not_present_handler(frame: InterruptStackFrame, error_code: u64) {
    fault("SEGMENT NOT PRESENT", &frame, Some(error_code));
}

extern "x86-interrupt" fn stack_segment_fault_handler(frame: InterruptStackFrame, error_code: u64) {
    fault("STACK SEGMENT FAULT", &frame, Some(error_code));
}

extern "x86-interrupt" fn general_protection_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    fault("GENERAL PROTECTION FAULT", &frame, Some(error_code));
}

/// Decode CR2 and the error-code bits, then either terminate the offending
/// ring-3 thread or halt the CPU (spec §7).
extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let addr = Cr2::read();
    let from_user = frame.code_segment.rpl() == x86_64::PrivilegeLevel::Ring3;
    println!(
        "[IDT] PAGE FAULT at {:?}, code={:?}, user={}",
        addr, error_code, from_user
    );
    if from_user {
        crate::process::thread::terminate_current("page fault on unmapped memory");
    } else {
        panic!("page fault in ring 0 at {:?}: {:?}", addr, error_code);
    }
}

extern "x86-interrupt" fn x87_fp_handler(frame: InterruptStackFrame) {
    fault("X87 FLOATING POINT", &frame, None);
}

extern "x86-interrupt" fn alignment_check_handler(frame: InterruptStackFrame, error_code: u64) {
    fault("ALIGNMENT CHECK", &frame, Some(error_code));
}

extern "x86-interrupt" fn machine_check_handler(frame: InterruptStackFrame) -> ! {
    panic!("MACHINE CHECK\n{:#?}", frame);
}

extern "x86-interrupt" fn simd_fp_handler(frame: InterruptStackFrame) {
    fault("SIMD FLOATING POINT", &frame, None);
}

fn fault(name: &str, frame: &InterruptStackFrame, error_code: Option<u64>) {
    match error_code {
        Some(code) => println!("[IDT] {} (error={:#x})\n{:#?}", name, code, frame),
        None => println!("[IDT] {}\n{:#?}", name, frame),
    }
    panic!("unhandled CPU exception: {}", name);
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available
            .set_handler_fn(device_not_available_handler);
        // SAFETY: the double-fault IST index names a stack set up by
        // `gdt::init`, dedicated to double faults so a stack-overflow fault
        // still has room to run this handler.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present
            .set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault
            .set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_fp_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_fp_handler);

        for (i, trampoline) in TRAMPOLINES.iter().enumerate() {
            idt[IRQ_BASE as usize + i].set_handler_fn(*trampoline);
        }
        // `syscall_gate` is naked `extern "C"`, not the `x86-interrupt` ABI
        // `set_handler_fn` expects, so it's installed by raw address instead.
        unsafe {
            idt[crate::arch::x86_64::apic::VECTOR_SYSCALL as usize]
                .set_handler_addr(x86_64::VirtAddr::new(syscall_gate as u64));
        }

        idt
    };
}

pub fn init() {
    IDT.load();
}
