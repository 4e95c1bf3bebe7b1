//! Execution environment for lowered units, backed by `wasmi`.
//!
//! One [`Environment`] owns the engine, the linker with the host imports
//! and the store. The store's [`HostState`] keeps the global bindings, so
//! every unit executed in the same environment sees the globals left by
//! the previous ones.

use std::collections::HashMap;
use std::io::Write;

use wasmi::{Caller, Engine, Extern, Linker, Module, Store};

use crate::builtins::{HOST_IMPORTS, HOST_MODULE, HostKind};
use crate::codegen_wasm::WasmUnit;
use crate::error::CoreError;

/// Where program output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    Stdout,
    Captured(String),
}

impl Output {
    fn write(&mut self, text: &str) -> Result<(), wasmi::Error> {
        match self {
            Output::Stdout => {
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|()| stdout.flush())
                    .map_err(|err| wasmi::Error::new(format!("failed to write output: {err}")))
            }
            Output::Captured(buffer) => {
                buffer.push_str(text);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct HostState {
    pub globals: HashMap<String, i64>,
    pub output: Output,
}

pub struct Environment {
    engine: Engine,
    linker: Linker<HostState>,
    store: Store<HostState>,
}

impl Environment {
    /// Environment writing program output to stdout.
    pub fn new() -> Result<Self, CoreError> {
        Self::with_output(Output::Stdout)
    }

    /// Environment collecting program output in memory.
    pub fn captured() -> Result<Self, CoreError> {
        Self::with_output(Output::Captured(String::new()))
    }

    pub fn with_output(output: Output) -> Result<Self, CoreError> {
        let engine = Engine::default();
        let mut linker = Linker::new(&engine);
        for import in HOST_IMPORTS {
            link(&mut linker, import.name, import.kind)
                .map_err(|err| CoreError::Instantiation(err.into()))?;
        }
        let store = Store::new(
            &engine,
            HostState {
                globals: HashMap::new(),
                output,
            },
        );
        Ok(Environment {
            engine,
            linker,
            store,
        })
    }

    /// Instantiate `unit` and call its `run` export.
    pub fn execute(&mut self, unit: &WasmUnit) -> Result<(), CoreError> {
        log::debug!("executing {}", unit.source_name);
        let module = Module::new(&self.engine, &unit.wasm).map_err(CoreError::Instantiation)?;
        let instance = self
            .linker
            .instantiate_and_start(&mut self.store, &module)
            .map_err(CoreError::Instantiation)?;
        let run = instance
            .get_typed_func::<(), ()>(&self.store, "run")
            .map_err(CoreError::Instantiation)?;
        run.call(&mut self.store, ()).map_err(CoreError::Execution)
    }

    pub fn global(&self, name: &str) -> Option<i64> {
        self.store.data().globals.get(name).copied()
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: i64) {
        self.store.data_mut().globals.insert(name.into(), value);
    }

    /// Drains captured output; empty when writing to stdout.
    pub fn take_output(&mut self) -> String {
        match &mut self.store.data_mut().output {
            Output::Captured(buffer) => std::mem::take(buffer),
            Output::Stdout => String::new(),
        }
    }
}

fn link(
    linker: &mut Linker<HostState>,
    name: &'static str,
    kind: HostKind,
) -> Result<(), wasmi::errors::LinkerError> {
    match kind {
        HostKind::PrintInt => {
            linker.func_wrap(
                HOST_MODULE,
                name,
                |mut caller: Caller<'_, HostState>, value: i64| -> Result<(), wasmi::Error> {
                    caller.data_mut().output.write(&value.to_string())
                },
            )?;
        }
        HostKind::PrintStr => {
            linker.func_wrap(
                HOST_MODULE,
                name,
                |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> Result<(), wasmi::Error> {
                    let text = read_str(&caller, ptr, len)?;
                    caller.data_mut().output.write(&text)
                },
            )?;
        }
        HostKind::GlobalGet => {
            linker.func_wrap(
                HOST_MODULE,
                name,
                |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> Result<i64, wasmi::Error> {
                    let name = read_str(&caller, ptr, len)?;
                    caller
                        .data()
                        .globals
                        .get(&name)
                        .copied()
                        .ok_or_else(|| wasmi::Error::new(format!("name '{name}' is not defined")))
                },
            )?;
        }
        HostKind::GlobalSet => {
            linker.func_wrap(
                HOST_MODULE,
                name,
                |mut caller: Caller<'_, HostState>,
                 ptr: i32,
                 len: i32,
                 value: i64|
                 -> Result<(), wasmi::Error> {
                    let name = read_str(&caller, ptr, len)?;
                    caller.data_mut().globals.insert(name, value);
                    Ok(())
                },
            )?;
        }
    }
    Ok(())
}

fn read_str(caller: &Caller<'_, HostState>, ptr: i32, len: i32) -> Result<String, wasmi::Error> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmi::Error::new("module does not export its memory"))?;
    let start = ptr as u32 as usize;
    let end = start + len as u32 as usize;
    let bytes = memory
        .data(caller)
        .get(start..end)
        .ok_or_else(|| wasmi::Error::new("string data out of bounds"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| wasmi::Error::new("string data is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen_wasm::lower_module;
    use crate::parser::parse;

    fn unit(source: &str) -> WasmUnit {
        lower_module(&parse(source).expect("parse"), "<test>").expect("lower")
    }

    fn run(source: &str) -> String {
        let mut env = Environment::captured().expect("environment");
        env.execute(&unit(source)).expect("execute");
        env.take_output()
    }

    #[test]
    fn prints_integers_and_strings() {
        assert_eq!(run("print('a', 1, -2)\n"), "a 1 -2\n");
        assert_eq!(run("print(1, 2, sep=', ', end='!')\n"), "1, 2!");
        assert_eq!(run("print()\n"), "\n");
    }

    #[test]
    fn evaluates_arithmetic_and_comparisons() {
        assert_eq!(
            run("print(7 / 2, -7 / 2, 7 % 3, -7 % 3, 2 * 3 + 1)\n"),
            "3 -3 1 -1 7\n"
        );
        assert_eq!(run("print(1 < 2, 2 <= 1, 3 == 3, 3 != 3)\n"), "1 0 1 0\n");
    }

    #[test]
    fn runs_functions_and_loops() {
        let source = "def fact(n):\n    acc = 1\n    while n > 1:\n        acc = acc * n\n        n = n - 1\n    return acc\nprint(fact(5))\n";
        assert_eq!(run(source), "120\n");
    }

    #[test]
    fn recursion_and_keyword_arguments() {
        let source = "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n=n - 2)\nprint(fib(10))\n";
        assert_eq!(run(source), "55\n");
    }

    #[test]
    fn keyword_arguments_evaluate_in_source_order() {
        let source = "def sub(a, b):\n    return a - b\ndef show(x):\n    print(x)\n    return x\nprint(sub(b=show(1), a=show(2)))\n";
        assert_eq!(run(source), "1\n2\n1\n");
    }

    #[test]
    fn print_evaluates_arguments_before_writing() {
        let source = "def loud(x):\n    print(x)\n    return x\nprint(loud(1), loud(2))\n";
        assert_eq!(run(source), "1\n2\n1 2\n");
    }

    #[test]
    fn functions_without_return_yield_zero() {
        assert_eq!(run("def f():\n    x = 1\nprint(f())\n"), "0\n");
        assert_eq!(run("print(print('x'))\n"), "x\n0\n");
    }

    #[test]
    fn functions_read_and_write_globals() {
        let source = "base = 10\ndef add(x):\n    return base + x\ntotal = add(5)\n";
        let mut env = Environment::captured().expect("environment");
        env.execute(&unit(source)).expect("execute");
        assert_eq!(env.global("total"), Some(15));
        assert_eq!(env.global("x"), None);
    }

    #[test]
    fn globals_persist_across_units() {
        let mut env = Environment::captured().expect("environment");
        env.execute(&unit("counter = 41\n")).expect("first");
        env.execute(&unit("counter = counter + 1\nprint(counter)\n"))
            .expect("second");
        assert_eq!(env.take_output(), "42\n");
        assert_eq!(env.global("counter"), Some(42));
    }

    #[test]
    fn reports_undefined_global_as_execution_fault() {
        let mut env = Environment::captured().expect("environment");
        env.set_global("x", 1);
        let err = env.execute(&unit("print(x)\nprint(y)\n")).unwrap_err();
        assert!(err.is_execution_fault());
        assert!(err.to_string().contains("name 'y' is not defined"));
        assert_eq!(env.take_output(), "1\n");
    }

    #[test]
    fn division_by_zero_traps() {
        let mut env = Environment::captured().expect("environment");
        let err = env.execute(&unit("zero = 0\nx = 1 / zero\n")).unwrap_err();
        assert!(matches!(err, CoreError::Execution(_)));
    }

    #[test]
    fn rejects_invalid_wasm() {
        let mut env = Environment::captured().expect("environment");
        let bogus = WasmUnit {
            source_name: "<bogus>".into(),
            wasm: vec![0, 1, 2, 3],
        };
        let err = env.execute(&bogus).unwrap_err();
        assert!(matches!(err, CoreError::Instantiation(_)));
    }
}
