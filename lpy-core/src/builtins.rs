//! Host imports shared by the wasm backend and the runtime.
//!
//! Lowered modules import exactly these functions, in table order, so a
//! host function's wasm index is its position in [`HOST_IMPORTS`]. The
//! runtime links one closure per entry.

use wasm_encoder::ValType;

/// Module name under which every host function is imported.
pub const HOST_MODULE: &str = "env";

/// Name of the language-level function lowered to the print imports.
pub const PRINT: &str = "print";

/// Kind tag used to pick a lowering or a host implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// Writes a signed 64-bit integer to the output sink.
    PrintInt,
    /// Writes `len` bytes of UTF-8 starting at `ptr` in linear memory.
    PrintStr,
    /// Reads a global binding by name.
    GlobalGet,
    /// Writes a global binding by name.
    GlobalSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostImport {
    pub name: &'static str,
    pub kind: HostKind,
    pub params: &'static [ValType],
    pub results: &'static [ValType],
}

pub const HOST_IMPORTS: &[HostImport] = &[
    HostImport {
        name: "print_int",
        kind: HostKind::PrintInt,
        params: &[ValType::I64],
        results: &[],
    },
    HostImport {
        name: "print_str",
        kind: HostKind::PrintStr,
        params: &[ValType::I32, ValType::I32],
        results: &[],
    },
    HostImport {
        name: "global_get",
        kind: HostKind::GlobalGet,
        params: &[ValType::I32, ValType::I32],
        results: &[ValType::I64],
    },
    HostImport {
        name: "global_set",
        kind: HostKind::GlobalSet,
        params: &[ValType::I32, ValType::I32, ValType::I64],
        results: &[],
    },
];

/// Wasm function index of the import with the given kind.
pub fn import_index(kind: HostKind) -> u32 {
    HOST_IMPORTS
        .iter()
        .position(|import| import.kind == kind)
        .map_or(0, |index| index as u32)
}

/// Number of imported functions; user functions are numbered after them.
pub fn import_count() -> u32 {
    HOST_IMPORTS.len() as u32
}
