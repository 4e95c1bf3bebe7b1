//! WASM backend: lowers a finalized syntax tree with `wasm-encoder`.
//!
//! Every value is an `i64`. The generated module imports the host
//! functions of [`crate::builtins::HOST_IMPORTS`], defines one function per
//! `def` and exports `run`, which holds the top-level statements, together
//! with the linear memory `memory` holding every string the program needs.
//!
//! Top-level names are globals owned by the host; inside a function,
//! parameters and assigned names are wasm locals and every other name is
//! a global. Function names are resolved statically through the nesting
//! of definitions.

use std::collections::HashMap;

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection,
    Function, FunctionSection, ImportSection, Instruction, MemorySection, MemoryType,
    Module as WasmModule, TypeSection, ValType,
};

use crate::ast::{BinOp, Call, CmpOp, Expr, ExprKind, FunctionDef, Module, Stmt, StmtKind, UnaryOp};
use crate::builtins::{self, HOST_IMPORTS, HOST_MODULE, HostKind};
use crate::error::CoreError;
use crate::locations::first_unlocated;
use crate::span::Location;

const PAGE_SIZE: u64 = 65536;
const MODULE_SCOPE: usize = 0;

/// A lowered program, ready to be executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmUnit {
    pub source_name: String,
    pub wasm: Vec<u8>,
}

/// Lower `module` to a wasm binary. `source_name` prefixes every
/// compilation error.
pub fn lower_module(module: &Module, source_name: &str) -> Result<WasmUnit, CoreError> {
    if let Some(node) = first_unlocated(module) {
        return Err(CoreError::MissingLocation { node });
    }

    let mut layout = Layout::new(source_name);
    layout.collect(&module.body, MODULE_SCOPE, true)?;

    let mut strings = StringTable::default();
    let mut bodies = Vec::with_capacity(layout.functions.len() + 1);
    for info in &layout.functions {
        bodies.push(emit_function(&layout, &mut strings, info)?);
    }
    let mut top = Emitter::new(&layout, &mut strings, MODULE_SCOPE, false, 0);
    top.block(&module.body)?;
    top.push(Instruction::End);
    bodies.push(top.finish());

    let wasm = assemble(&layout, &strings, &bodies);
    log::debug!(
        "lowered {source_name}: {} functions, {} bytes of string data, {} bytes of wasm",
        layout.functions.len(),
        strings.bytes.len(),
        wasm.len()
    );
    Ok(WasmUnit {
        source_name: source_name.to_string(),
        wasm,
    })
}

struct FunctionInfo<'m> {
    def: &'m FunctionDef,
    /// Scope holding the function's own nested definitions.
    scope: usize,
}

struct Scope<'m> {
    parent: Option<usize>,
    functions: HashMap<&'m str, u32>,
}

/// Function table and scope tree of one module.
struct Layout<'m> {
    source_name: &'m str,
    scopes: Vec<Scope<'m>>,
    functions: Vec<FunctionInfo<'m>>,
}

impl<'m> Layout<'m> {
    fn new(source_name: &'m str) -> Self {
        Layout {
            source_name,
            scopes: vec![Scope {
                parent: None,
                functions: HashMap::new(),
            }],
            functions: Vec::new(),
        }
    }

    fn collect(
        &mut self,
        body: &'m [Stmt],
        scope: usize,
        defs_allowed: bool,
    ) -> Result<(), CoreError> {
        for stmt in body {
            match &stmt.kind {
                StmtKind::FunctionDef(def) => {
                    if !defs_allowed {
                        return Err(self.error(
                            stmt.loc,
                            format!(
                                "function '{}' must be defined at module level or directly in a function body",
                                def.name
                            ),
                        ));
                    }
                    if self.scopes[scope].functions.contains_key(def.name.as_str()) {
                        return Err(self.error(
                            stmt.loc,
                            format!("function '{}' is already defined in this scope", def.name),
                        ));
                    }
                    if def.body.is_empty() {
                        return Err(
                            self.error(stmt.loc, format!("function '{}' has an empty body", def.name))
                        );
                    }
                    for (index, param) in def.params.iter().enumerate() {
                        if def.params[..index].iter().any(|p| p.name == param.name) {
                            return Err(self.error(
                                param.loc,
                                format!(
                                    "duplicate parameter '{}' in function '{}'",
                                    param.name, def.name
                                ),
                            ));
                        }
                    }

                    let id = self.functions.len() as u32;
                    self.scopes[scope].functions.insert(&def.name, id);
                    let inner = self.scopes.len();
                    self.scopes.push(Scope {
                        parent: Some(scope),
                        functions: HashMap::new(),
                    });
                    self.functions.push(FunctionInfo { def, scope: inner });
                    self.collect(&def.body, inner, true)?;
                }
                StmtKind::If { body, orelse, .. } => {
                    self.collect(body, scope, false)?;
                    self.collect(orelse, scope, false)?;
                }
                StmtKind::While { body, .. } => self.collect(body, scope, false)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Function id visible under `name` from `scope`, innermost first.
    fn resolve(&self, mut scope: usize, name: &str) -> Option<u32> {
        loop {
            if let Some(&id) = self.scopes[scope].functions.get(name) {
                return Some(id);
            }
            scope = self.scopes[scope].parent?;
        }
    }

    fn wasm_index(&self, id: u32) -> u32 {
        builtins::import_count() + id
    }

    fn run_index(&self) -> u32 {
        builtins::import_count() + self.functions.len() as u32
    }

    fn error(&self, loc: Option<Location>, message: impl Into<String>) -> CoreError {
        let loc = loc.unwrap_or(Location::ROOT);
        CoreError::Compilation {
            source_name: self.source_name.to_string(),
            line: loc.line,
            col: loc.col,
            message: message.into(),
        }
    }
}

/// Interned string data placed at offset 0 of linear memory.
#[derive(Default)]
struct StringTable {
    bytes: Vec<u8>,
    offsets: HashMap<String, (u32, u32)>,
}

impl StringTable {
    fn intern(&mut self, text: &str) -> (u32, u32) {
        if let Some(&entry) = self.offsets.get(text) {
            return entry;
        }
        let entry = (self.bytes.len() as u32, text.len() as u32);
        self.bytes.extend_from_slice(text.as_bytes());
        self.offsets.insert(text.to_string(), entry);
        entry
    }
}

fn emit_function(
    layout: &Layout<'_>,
    strings: &mut StringTable,
    info: &FunctionInfo<'_>,
) -> Result<Function, CoreError> {
    let def = info.def;
    let arity = def.params.len() as u32;
    let mut emitter = Emitter::new(layout, strings, info.scope, true, arity);
    for (index, param) in def.params.iter().enumerate() {
        emitter.locals.insert(param.name.clone(), index as u32);
    }
    let mut assigned = Vec::new();
    assigned_names(&def.body, &mut assigned);
    for name in assigned {
        if !emitter.locals.contains_key(name) {
            let index = emitter.alloc_local();
            emitter.locals.insert(name.to_string(), index);
        }
    }

    emitter.block(&def.body)?;
    emitter.push(Instruction::I64Const(0));
    emitter.push(Instruction::End);
    Ok(emitter.finish())
}

/// Names assigned in `body`, excluding nested definitions.
fn assigned_names<'m>(body: &'m [Stmt], out: &mut Vec<&'m str>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { target, .. } => out.push(target),
            StmtKind::If { body, orelse, .. } => {
                assigned_names(body, out);
                assigned_names(orelse, out);
            }
            StmtKind::While { body, .. } => assigned_names(body, out),
            _ => {}
        }
    }
}

/// Instruction emitter for one function body.
struct Emitter<'a, 'm> {
    layout: &'a Layout<'m>,
    strings: &'a mut StringTable,
    scope: usize,
    in_function: bool,
    params: u32,
    next_local: u32,
    locals: HashMap<String, u32>,
    instructions: Vec<Instruction<'static>>,
}

impl<'a, 'm> Emitter<'a, 'm> {
    fn new(
        layout: &'a Layout<'m>,
        strings: &'a mut StringTable,
        scope: usize,
        in_function: bool,
        params: u32,
    ) -> Self {
        Emitter {
            layout,
            strings,
            scope,
            in_function,
            params,
            next_local: params,
            locals: HashMap::new(),
            instructions: Vec::new(),
        }
    }

    fn finish(self) -> Function {
        let extra = self.next_local - self.params;
        let locals = if extra > 0 {
            vec![(extra, ValType::I64)]
        } else {
            Vec::new()
        };
        let mut function = Function::new(locals);
        for instruction in &self.instructions {
            function.instruction(instruction);
        }
        function
    }

    fn push(&mut self, instruction: Instruction<'static>) {
        self.instructions.push(instruction);
    }

    fn alloc_local(&mut self) -> u32 {
        let index = self.next_local;
        self.next_local += 1;
        index
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), CoreError> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn nonempty_block(&mut self, body: &[Stmt], loc: Option<Location>) -> Result<(), CoreError> {
        if body.is_empty() {
            return Err(self.layout.error(loc, "block has an empty body"));
        }
        self.block(body)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        match &stmt.kind {
            // Lowered separately; see `emit_function`.
            StmtKind::FunctionDef(_) => {}
            StmtKind::Return(value) => {
                if !self.in_function {
                    return Err(self.layout.error(stmt.loc, "'return' outside function"));
                }
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.push(Instruction::I64Const(0)),
                }
                self.push(Instruction::Return);
            }
            StmtKind::Assign { target, value } => match self.locals.get(target).copied() {
                Some(index) => {
                    self.expr(value)?;
                    self.push(Instruction::LocalSet(index));
                }
                None => {
                    self.global_name(target);
                    self.expr(value)?;
                    self.push(Instruction::Call(builtins::import_index(HostKind::GlobalSet)));
                }
            },
            StmtKind::Expr(expr) => {
                self.expr(expr)?;
                self.push(Instruction::Drop);
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                self.push(Instruction::I64Const(0));
                self.push(Instruction::I64Ne);
                self.push(Instruction::If(BlockType::Empty));
                self.nonempty_block(body, stmt.loc)?;
                if !orelse.is_empty() {
                    self.push(Instruction::Else);
                    self.block(orelse)?;
                }
                self.push(Instruction::End);
            }
            StmtKind::While { test, body } => {
                self.push(Instruction::Block(BlockType::Empty));
                self.push(Instruction::Loop(BlockType::Empty));
                self.expr(test)?;
                self.push(Instruction::I64Eqz);
                self.push(Instruction::BrIf(1));
                self.nonempty_block(body, stmt.loc)?;
                self.push(Instruction::Br(0));
                self.push(Instruction::End);
                self.push(Instruction::End);
            }
            StmtKind::Pass => {}
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), CoreError> {
        match &expr.kind {
            ExprKind::Num(value) => self.push(Instruction::I64Const(*value)),
            ExprKind::Str(_) => {
                return Err(self.layout.error(
                    expr.loc,
                    "string literals are only supported as print arguments",
                ));
            }
            ExprKind::Name(name) => self.name(name, expr.loc)?,
            ExprKind::Attribute { attr, .. } => {
                return Err(self
                    .layout
                    .error(expr.loc, format!("attribute access '.{attr}' is not supported")));
            }
            ExprKind::Call(call) => self.call(call, expr.loc)?,
            ExprKind::BinOp { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.push(match op {
                    BinOp::Add => Instruction::I64Add,
                    BinOp::Sub => Instruction::I64Sub,
                    BinOp::Mul => Instruction::I64Mul,
                    BinOp::Div => Instruction::I64DivS,
                    BinOp::Mod => Instruction::I64RemS,
                });
            }
            ExprKind::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => {
                self.push(Instruction::I64Const(0));
                self.expr(operand)?;
                self.push(Instruction::I64Sub);
            }
            ExprKind::Compare { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.push(match op {
                    CmpOp::Eq => Instruction::I64Eq,
                    CmpOp::NotEq => Instruction::I64Ne,
                    CmpOp::Lt => Instruction::I64LtS,
                    CmpOp::LtE => Instruction::I64LeS,
                    CmpOp::Gt => Instruction::I64GtS,
                    CmpOp::GtE => Instruction::I64GeS,
                });
                self.push(Instruction::I64ExtendI32U);
            }
        }
        Ok(())
    }

    fn name(&mut self, name: &str, loc: Option<Location>) -> Result<(), CoreError> {
        if let Some(&index) = self.locals.get(name) {
            self.push(Instruction::LocalGet(index));
            return Ok(());
        }
        if self.layout.resolve(self.scope, name).is_some() {
            return Err(self
                .layout
                .error(loc, format!("function '{name}' cannot be used as a value")));
        }
        self.global_name(name);
        self.push(Instruction::Call(builtins::import_index(HostKind::GlobalGet)));
        Ok(())
    }

    fn global_name(&mut self, name: &str) {
        let (ptr, len) = self.strings.intern(name);
        self.push(Instruction::I32Const(ptr as i32));
        self.push(Instruction::I32Const(len as i32));
    }

    fn call(&mut self, call: &Call, loc: Option<Location>) -> Result<(), CoreError> {
        let name = match &call.func.kind {
            ExprKind::Name(name) => name,
            ExprKind::Attribute { .. } => {
                return Err(self.layout.error(loc, "method calls are not supported"));
            }
            _ => {
                return Err(self
                    .layout
                    .error(loc, "only calls to named functions are supported"));
            }
        };
        if let Some(id) = self.layout.resolve(self.scope, name) {
            return self.user_call(id, name, call, loc);
        }
        if name == builtins::PRINT {
            return self.print(call);
        }
        Err(self.layout.error(loc, format!("unknown function '{name}'")))
    }

    /// Arguments are evaluated in source order and passed in parameter
    /// order.
    fn user_call(
        &mut self,
        id: u32,
        name: &str,
        call: &Call,
        loc: Option<Location>,
    ) -> Result<(), CoreError> {
        let layout = self.layout;
        let params = &layout.functions[id as usize].def.params;
        let arity = params.len();
        if call.args.len() > arity {
            return Err(self.layout.error(
                loc,
                format!(
                    "{name}() takes {arity} positional argument(s) but {} were given",
                    call.args.len()
                ),
            ));
        }

        let mut bound: Vec<Option<&Expr>> = vec![None; arity];
        for (slot, arg) in bound.iter_mut().zip(&call.args) {
            *slot = Some(arg);
        }
        let mut order = Vec::with_capacity(call.args.len() + call.keywords.len());
        order.extend(0..call.args.len());
        for keyword in &call.keywords {
            let Some(position) = params.iter().position(|param| param.name == keyword.arg) else {
                return Err(self.layout.error(
                    keyword.loc,
                    format!("{name}() got an unexpected keyword argument '{}'", keyword.arg),
                ));
            };
            if bound[position].is_some() {
                return Err(self.layout.error(
                    keyword.loc,
                    format!("{name}() got multiple values for argument '{}'", keyword.arg),
                ));
            }
            bound[position] = Some(&keyword.value);
            order.push(position);
        }
        if let Some(missing) = bound.iter().position(Option::is_none) {
            return Err(self.layout.error(
                loc,
                format!("{name}() missing argument '{}'", params[missing].name),
            ));
        }

        if call.keywords.is_empty() {
            for arg in &call.args {
                self.expr(arg)?;
            }
        } else {
            let mut temps = vec![0; arity];
            for position in order {
                if let Some(arg) = bound[position] {
                    self.expr(arg)?;
                }
                let temp = self.alloc_local();
                self.push(Instruction::LocalSet(temp));
                temps[position] = temp;
            }
            for temp in temps {
                self.push(Instruction::LocalGet(temp));
            }
        }
        self.push(Instruction::Call(self.layout.wasm_index(id)));
        Ok(())
    }

    /// `print(*args, sep=' ', end='\n')`, evaluating every argument
    /// before writing anything.
    fn print(&mut self, call: &Call) -> Result<(), CoreError> {
        let mut sep = " ";
        let mut end = "\n";
        for keyword in &call.keywords {
            let ExprKind::Str(text) = &keyword.value.kind else {
                return Err(self.layout.error(
                    keyword.loc,
                    format!("print() argument '{}' must be a string literal", keyword.arg),
                ));
            };
            match keyword.arg.as_str() {
                "sep" => sep = text.as_str(),
                "end" => end = text.as_str(),
                other => {
                    return Err(self.layout.error(
                        keyword.loc,
                        format!("print() got an unexpected keyword argument '{other}'"),
                    ));
                }
            }
        }

        let mut values = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let value = match &arg.kind {
                ExprKind::Str(text) => PrintValue::Text(text),
                _ => {
                    self.expr(arg)?;
                    let temp = self.alloc_local();
                    self.push(Instruction::LocalSet(temp));
                    PrintValue::Local(temp)
                }
            };
            values.push(value);
        }

        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                self.print_text(sep);
            }
            match value {
                PrintValue::Text(text) => self.print_text(text),
                PrintValue::Local(temp) => {
                    self.push(Instruction::LocalGet(temp));
                    self.push(Instruction::Call(builtins::import_index(HostKind::PrintInt)));
                }
            }
        }
        self.print_text(end);
        self.push(Instruction::I64Const(0));
        Ok(())
    }

    fn print_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let (ptr, len) = self.strings.intern(text);
        self.push(Instruction::I32Const(ptr as i32));
        self.push(Instruction::I32Const(len as i32));
        self.push(Instruction::Call(builtins::import_index(HostKind::PrintStr)));
    }
}

enum PrintValue<'c> {
    Text(&'c str),
    Local(u32),
}

fn assemble(layout: &Layout<'_>, strings: &StringTable, bodies: &[Function]) -> Vec<u8> {
    let mut module = WasmModule::new();

    // Host import types first, so import `i` uses type `i`.
    let mut types = TypeSection::new();
    for import in HOST_IMPORTS {
        types.ty().function(
            import.params.iter().copied(),
            import.results.iter().copied(),
        );
    }
    let mut arity_types: HashMap<usize, u32> = HashMap::new();
    let mut function_types = Vec::with_capacity(layout.functions.len());
    for info in &layout.functions {
        let arity = info.def.params.len();
        let type_index = match arity_types.get(&arity) {
            Some(&index) => index,
            None => {
                let index = types.len();
                types.ty().function(vec![ValType::I64; arity], [ValType::I64]);
                arity_types.insert(arity, index);
                index
            }
        };
        function_types.push(type_index);
    }
    let run_type = types.len();
    types
        .ty()
        .function(Vec::<ValType>::new(), Vec::<ValType>::new());
    module.section(&types);

    let mut imports = ImportSection::new();
    for (index, import) in HOST_IMPORTS.iter().enumerate() {
        imports.import(HOST_MODULE, import.name, EntityType::Function(index as u32));
    }
    module.section(&imports);

    let mut functions = FunctionSection::new();
    for type_index in function_types {
        functions.function(type_index);
    }
    functions.function(run_type);
    module.section(&functions);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: (strings.bytes.len() as u64).div_ceil(PAGE_SIZE).max(1),
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);

    let mut exports = ExportSection::new();
    exports.export("run", ExportKind::Func, layout.run_index());
    exports.export("memory", ExportKind::Memory, 0);
    module.section(&exports);

    let mut code = CodeSection::new();
    for body in bodies {
        code.function(body);
    }
    module.section(&code);

    if !strings.bytes.is_empty() {
        let mut data = DataSection::new();
        data.active(0, &ConstExpr::i32_const(0), strings.bytes.iter().copied());
        module.section(&data);
    }

    module.finish()
}
