//! Remote-call stub generation.
//!
//! The stub is a single contiguous blob of x64 code plus inline string
//! data. Executed as a remote thread's entry point it loads (or finds)
//! the agent module, resolves the entry point, calls it with the
//! marshalled arguments, optionally unloads the module again and finally
//! frees its own allocation before exiting the thread.
//!
//! Register roles follow the Microsoft x64 convention: arguments travel
//! in rcx/rdx/r8/r9, the module handle is parked in r12 and the last
//! return value in rsi (both non-volatile), and rdi points at the
//! stack-resident exit trampoline.

use crate::asm::{Assembler, Reg};
use crate::error::{InjectError, InjectResult};

/// Size of the remote allocation backing one stub, code plus inline data.
pub const STUB_REGION_SIZE: usize = 0x2000;

/// Upper bound on entry-point arguments (first-four-registers convention).
pub const MAX_ARGS: usize = 4;

const ARG_REGS: [Reg; MAX_ARGS] = [Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9];

// Win32 constants baked into the generated code. Spelled out locally so
// the emitter stays host-independent.
const PAGE_EXECUTE_READWRITE: u64 = 0x40;
const MEM_RELEASE: u64 = 0x8000;
const TRAMPOLINE_BYTES: u64 = 32;

/// One argument for the remote entry point.
///
/// Integral values are passed in a register; byte and wide strings are
/// copied into the stub's data section and passed by remote address, with
/// a terminator of their own width appended.
#[derive(Debug, Clone)]
pub enum RemoteArg {
    Int(u64),
    Bytes(Vec<u8>),
    Wide(Vec<u16>),
}

/// Addresses of the kernel32 exports the stub calls.
///
/// Kernel32 is mapped at one base per boot session, so addresses resolved
/// in the controller are valid inside the target as well. Tests substitute
/// sentinel values.
#[derive(Debug, Clone, Copy)]
pub struct RemoteImports {
    pub get_module_handle: u64,
    pub load_library: u64,
    pub get_proc_address: u64,
    pub get_last_error: u64,
    pub free_library: u64,
    pub exit_thread: u64,
    pub virtual_protect: u64,
    pub virtual_free: u64,
}

#[cfg(windows)]
impl RemoteImports {
    /// Reads the export addresses out of the live kernel32 module.
    pub fn resolve() -> InjectResult<Self> {
        use windows::core::{s, w, PCSTR};
        use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

        let kernel32 = unsafe { GetModuleHandleW(w!("kernel32.dll")) }
            .map_err(|e| recc_common::Win32Error::api("GetModuleHandleW", e))?;
        let export = |name: PCSTR, tag: &'static str| -> InjectResult<u64> {
            unsafe { GetProcAddress(kernel32, name) }
                .map(|f| f as usize as u64)
                .ok_or(InjectError::MissingImport(tag))
        };

        Ok(Self {
            get_module_handle: export(s!("GetModuleHandleW"), "GetModuleHandleW")?,
            load_library: export(s!("LoadLibraryW"), "LoadLibraryW")?,
            get_proc_address: export(s!("GetProcAddress"), "GetProcAddress")?,
            get_last_error: export(s!("GetLastError"), "GetLastError")?,
            free_library: export(s!("FreeLibrary"), "FreeLibrary")?,
            exit_thread: export(s!("ExitThread"), "ExitThread")?,
            virtual_protect: export(s!("VirtualProtect"), "VirtualProtect")?,
            virtual_free: export(s!("VirtualFree"), "VirtualFree")?,
        })
    }
}

/// Emits the complete stub for a load-call-free round trip.
///
/// `base` is the remote address the blob will live at; it only appears in
/// the final self-free sequence, everything else is rip-relative. The
/// thread's exit code is the entry point's return value, or the value of
/// `GetLastError` when loading or resolving failed.
pub fn emit_agent_call(
    base: u64,
    imports: &RemoteImports,
    unload_after: bool,
    agent_path: &[u16],
    entry_point: &[u8],
    args: &[RemoteArg],
) -> InjectResult<Vec<u8>> {
    if args.len() > MAX_ARGS {
        return Err(InjectError::TooManyArgs(args.len()));
    }

    let mut asm = Assembler::new();
    let path_data = asm.new_label();
    let entry_data = asm.new_label();
    let arg_data: Vec<_> = args.iter().map(|_| asm.new_label()).collect();
    let find_entry = asm.new_label();
    let fail = asm.new_label();
    let exit = asm.new_label();

    // A remote thread entry gets a return-address-misaligned stack;
    // realign and reserve the four-register shadow area.
    asm.and_rsp(-16);
    asm.sub_rsp(32);

    // GetModuleHandleW(path): reuse an already-loaded agent.
    asm.lea_label(Reg::Rcx, path_data);
    asm.mov_imm(Reg::Rax, imports.get_module_handle);
    asm.call_reg(Reg::Rax);
    asm.test_reg(Reg::Rax, Reg::Rax);
    asm.jnz(find_entry);

    // LoadLibraryW(path)
    asm.lea_label(Reg::Rcx, path_data);
    asm.mov_imm(Reg::Rax, imports.load_library);
    asm.call_reg(Reg::Rax);
    asm.test_reg(Reg::Rax, Reg::Rax);
    asm.jz(fail);

    // GetProcAddress(module, entry); the module handle survives in r12.
    asm.bind(find_entry);
    asm.mov_reg(Reg::R12, Reg::Rax);
    asm.mov_reg(Reg::Rcx, Reg::Rax);
    asm.lea_label(Reg::Rdx, entry_data);
    asm.mov_imm(Reg::Rax, imports.get_proc_address);
    asm.call_reg(Reg::Rax);
    asm.test_reg(Reg::Rax, Reg::Rax);
    asm.jz(fail);

    // Entry-point call with up to four marshalled arguments.
    for (i, arg) in args.iter().enumerate() {
        match arg {
            RemoteArg::Int(value) => asm.mov_imm(ARG_REGS[i], *value),
            RemoteArg::Bytes(_) | RemoteArg::Wide(_) => asm.lea_label(ARG_REGS[i], arg_data[i]),
        }
    }
    asm.call_reg(Reg::Rax);
    asm.jmp(exit);

    // Failure tail: the exit code becomes GetLastError's value instead of
    // a half-meaningful entry-point result.
    asm.bind(fail);
    asm.mov_imm(Reg::Rax, imports.get_last_error);
    asm.call_reg(Reg::Rax);

    asm.bind(exit);
    asm.mov_reg(Reg::Rsi, Reg::Rax);

    if unload_after {
        asm.mov_reg(Reg::Rcx, Reg::R12);
        asm.mov_imm(Reg::Rax, imports.free_library);
        asm.call_reg(Reg::Rax);
    }

    // Stage `mov rcx, rsi; mov rax, <ExitThread>; jmp rax` in the shadow
    // area. The stack outlives the code region, so the thread can exit
    // from there after the region is gone.
    asm.store_rsp_u8(0, 0x48);
    asm.store_rsp_u8(1, 0x89);
    asm.store_rsp_u8(2, 0xF1);
    asm.store_rsp_u8(3, 0x48);
    asm.store_rsp_u8(4, 0xB8);
    asm.mov_imm(Reg::Rax, imports.exit_thread);
    asm.store_rsp(5, Reg::Rax);
    asm.store_rsp_u8(13, 0xFF);
    asm.store_rsp_u8(14, 0xE0);
    asm.mov_reg(Reg::Rdi, Reg::Rsp);
    asm.sub_rsp(32);

    // VirtualProtect(trampoline, 32, PAGE_EXECUTE_READWRITE, &scratch)
    asm.mov_reg(Reg::Rcx, Reg::Rdi);
    asm.mov_imm(Reg::Rdx, TRAMPOLINE_BYTES);
    asm.mov_imm(Reg::R8, PAGE_EXECUTE_READWRITE);
    asm.lea_rsp(Reg::R9, 16);
    asm.mov_imm(Reg::Rax, imports.virtual_protect);
    asm.call_reg(Reg::Rax);

    // VirtualFree(base, 0, MEM_RELEASE), entered by jump with the
    // trampoline address pushed as the "return address": the free call
    // returns onto the executable stack, never onto the freed region.
    asm.mov_imm(Reg::Rcx, base);
    asm.mov_imm(Reg::Rdx, 0);
    asm.mov_imm(Reg::R8, MEM_RELEASE);
    asm.mov_imm(Reg::Rax, imports.virtual_free);
    asm.push(Reg::Rdi);
    asm.jmp_reg(Reg::Rax);

    // Inline data: the agent path, the entry-point name and every
    // string argument, each terminated at its own width.
    asm.bind(path_data);
    asm.embed_wide(agent_path);
    asm.embed_wide(&[0]);

    asm.bind(entry_data);
    asm.embed(entry_point);
    asm.embed(&[0]);

    for (arg, label) in args.iter().zip(&arg_data) {
        match arg {
            RemoteArg::Int(_) => {}
            RemoteArg::Bytes(bytes) => {
                asm.bind(*label);
                asm.embed(bytes);
                asm.embed(&[0]);
            }
            RemoteArg::Wide(units) => {
                asm.bind(*label);
                asm.embed_wide(units);
                asm.embed_wide(&[0]);
            }
        }
    }

    let code = asm.finalize()?;
    if code.len() > STUB_REGION_SIZE {
        return Err(InjectError::StubTooLarge(code.len()));
    }
    Ok(code)
}
