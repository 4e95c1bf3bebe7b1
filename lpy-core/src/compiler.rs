use crate::ast::Module;
use crate::codegen_wasm::{WasmUnit, lower_module};
use crate::error::CoreError;
use crate::locations::fix_missing_locations;
use crate::parser::parse;
use crate::rewrite::{DEFAULT_STAMP_FORMAT, StampRewriter, Stamper, TimestampPolicy};
use crate::runtime::Environment;
use crate::span::Location;
use crate::transform::{RewriteStats, transform_module};
use crate::visit::Visitor;

/// Lowers finalized trees to an executable unit and runs it.
pub trait Backend {
    type Unit;
    type Env;

    fn lower(&self, module: &Module, source_name: &str) -> Result<Self::Unit, CoreError>;

    /// Runs `unit` in `env`. Runtime faults are returned unmodified.
    fn execute(&self, unit: &Self::Unit, env: &mut Self::Env) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WasmBackend;

impl Backend for WasmBackend {
    type Unit = WasmUnit;
    type Env = Environment;

    fn lower(&self, module: &Module, source_name: &str) -> Result<WasmUnit, CoreError> {
        lower_module(module, source_name)
    }

    fn execute(&self, unit: &WasmUnit, env: &mut Environment) -> Result<(), CoreError> {
        env.execute(unit)
    }
}

/// A numeric literal seen by [`NumberCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub value: i64,
    pub loc: Option<Location>,
}

/// Reports every numeric literal in source order.
#[derive(Debug, Default)]
pub struct NumberCollector {
    pub observations: Vec<Observation>,
}

impl Visitor for NumberCollector {
    fn visit_num(&mut self, value: i64, loc: Option<Location>) {
        self.observations.push(Observation { value, loc });
    }
}

pub fn observe_numbers(module: &Module) -> Vec<Observation> {
    let mut collector = NumberCollector::default();
    collector.visit_module(module);
    collector.observations
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Callee name whose calls get the timestamp prefix.
    pub target: String,
    pub timestamp: TimestampPolicy,
    /// chrono strftime pattern, rendered in UTC.
    pub stamp_format: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            target: crate::builtins::PRINT.to_string(),
            timestamp: TimestampPolicy::default(),
            stamp_format: DEFAULT_STAMP_FORMAT.to_string(),
        }
    }
}

/// A parsed source and the numeric literals it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub module: Module,
    pub observations: Vec<Observation>,
}

/// Result of the front half of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub observations: Vec<Observation>,
    /// Rewritten tree with every location filled in.
    pub module: Module,
    pub stats: RewriteStats,
    pub repaired: usize,
}

#[derive(Debug)]
pub struct CompilationArtifact<U> {
    pub source_name: String,
    pub transformed: Transformed,
    pub unit: U,
}

/// parse -> observe -> rewrite -> repair -> lower -> execute.
///
/// [`Pipeline::observe`], [`Pipeline::rewrite`] and [`Pipeline::lower`]
/// run the stages one at a time; [`Pipeline::compile`] chains them.
///
/// Every stage runs to completion before the next starts and the first
/// error stops the pipeline.
pub struct Pipeline<B: Backend = WasmBackend> {
    backend: B,
    rewriter: StampRewriter,
}

impl Pipeline<WasmBackend> {
    pub fn wasm(options: PipelineOptions) -> Result<Self, CoreError> {
        Pipeline::new(WasmBackend, options)
    }
}

impl<B: Backend> Pipeline<B> {
    pub fn new(backend: B, options: PipelineOptions) -> Result<Self, CoreError> {
        let stamper = Stamper::new(options.timestamp, options.stamp_format)?;
        Ok(Pipeline {
            backend,
            rewriter: StampRewriter::new(options.target, stamper),
        })
    }

    /// Parse `source` and collect its numeric literals. Nothing is
    /// rewritten yet, so callers can report observations before any
    /// later stage fails.
    pub fn observe(&self, source: &str) -> Result<Observed, CoreError> {
        let module = parse(source)?;
        let observations = observe_numbers(&module);
        log::debug!("observed {} numeric literals", observations.len());
        Ok(Observed {
            module,
            observations,
        })
    }

    /// Apply the rewrite rules and repair locations.
    pub fn rewrite(&mut self, observed: Observed) -> Result<Transformed, CoreError> {
        let Observed {
            module,
            observations,
        } = observed;
        let (mut module, stats) = transform_module(module, &mut self.rewriter)?;
        let repaired = fix_missing_locations(&mut module);
        Ok(Transformed {
            observations,
            module,
            stats,
            repaired,
        })
    }

    pub fn transform(&mut self, source: &str) -> Result<Transformed, CoreError> {
        let observed = self.observe(source)?;
        self.rewrite(observed)
    }

    pub fn lower(
        &self,
        transformed: Transformed,
        source_name: &str,
    ) -> Result<CompilationArtifact<B::Unit>, CoreError> {
        let unit = self.backend.lower(&transformed.module, source_name)?;
        Ok(CompilationArtifact {
            source_name: source_name.to_string(),
            transformed,
            unit,
        })
    }

    pub fn compile(
        &mut self,
        source: &str,
        source_name: &str,
    ) -> Result<CompilationArtifact<B::Unit>, CoreError> {
        let transformed = self.transform(source)?;
        self.lower(transformed, source_name)
    }

    pub fn execute(
        &self,
        artifact: &CompilationArtifact<B::Unit>,
        env: &mut B::Env,
    ) -> Result<(), CoreError> {
        self.backend.execute(&artifact.unit, env)
    }

    /// Compile and execute `source` in `env`.
    pub fn run(
        &mut self,
        source: &str,
        source_name: &str,
        env: &mut B::Env,
    ) -> Result<CompilationArtifact<B::Unit>, CoreError> {
        let artifact = self.compile(source, source_name)?;
        self.execute(&artifact, env)?;
        Ok(artifact)
    }
}

/// Compile `source` with default options.
pub fn compile_wasm(
    source: &str,
    source_name: &str,
) -> Result<CompilationArtifact<WasmUnit>, CoreError> {
    Pipeline::wasm(PipelineOptions::default())?.compile(source, source_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::all_located;
    use crate::unparse::unparse;
    use pretty_assertions::assert_eq;
    use wasmparser::Validator;

    fn fixed(stamp: &str) -> PipelineOptions {
        PipelineOptions {
            timestamp: TimestampPolicy::Fixed(stamp.to_string()),
            ..PipelineOptions::default()
        }
    }

    fn run_fixed(source: &str) -> String {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let mut env = Environment::captured().expect("environment");
        pipeline.run(source, "<test>", &mut env).expect("run");
        env.take_output()
    }

    fn values(observations: &[Observation]) -> Vec<i64> {
        observations.iter().map(|o| o.value).collect()
    }

    #[test]
    fn trailing_expression_becomes_return() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let out = pipeline.transform("def f(): 1 + 1").expect("transform");
        assert_eq!(values(&out.observations), [1, 1]);
        assert_eq!(unparse(&out.module), "def f():\n    return 1 + 1\n");
        assert_eq!(out.stats.replaced, 1);
        assert_eq!(out.repaired, 1);
        assert!(all_located(&out.module));
    }

    #[test]
    fn top_level_print_gets_stamp() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let out = pipeline.transform("print(5)").expect("transform");
        assert_eq!(values(&out.observations), [5]);
        assert_eq!(unparse(&out.module), "print('T', 5)\n");
        assert_eq!(out.stats.replaced, 1);
        assert_eq!(run_fixed("print(5)"), "T 5\n");
    }

    #[test]
    fn function_ending_in_assignment_is_untouched() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let out = pipeline.transform("def g(): x = 1").expect("transform");
        assert_eq!(unparse(&out.module), "def g():\n    x = 1\n");
        assert!(!out.stats.changed());
        assert_eq!(out.repaired, 0);
    }

    #[test]
    fn observations_follow_source_order() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let out = pipeline
            .transform("x = 3\ndef f(a):\n    return a + 4\nprint(f(x) * 5, 7 - 6)\n")
            .expect("transform");
        assert_eq!(values(&out.observations), [3, 4, 5, 7, 6]);
        let lines: Vec<u32> = out
            .observations
            .iter()
            .map(|o| o.loc.expect("parsed location").line)
            .collect();
        assert_eq!(lines, [1, 3, 4, 4, 4]);
    }

    #[test]
    fn implicit_return_value_reaches_caller() {
        assert_eq!(
            run_fixed("def double(x): x * 2\nprint(double(21))\n"),
            "T 42\n"
        );
    }

    #[test]
    fn stamped_print_inside_function_returns_none() {
        assert_eq!(
            run_fixed("def show(x):\n    print(x)\nprint(show(3))\n"),
            "T 3\nT 0\n"
        );
    }

    #[test]
    fn default_stamp_renders_current_time() {
        let mut pipeline = Pipeline::wasm(PipelineOptions::default()).expect("pipeline");
        let mut env = Environment::captured().expect("environment");
        pipeline.run("print(5)\n", "<test>", &mut env).expect("run");
        let output = env.take_output();
        assert!(output.starts_with("print at "), "{output}");
        assert!(output.ends_with(": -->  5\n"), "{output}");
    }

    #[test]
    fn compiled_units_validate() {
        let artifact = compile_wasm(
            "def f(n):\n    while n > 0:\n        print(n)\n        n = n - 1\nf(3)\n",
            "<test>",
        )
        .expect("compile");
        assert_eq!(artifact.source_name, "<test>");
        Validator::new()
            .validate_all(&artifact.unit.wasm)
            .expect("valid wasm");
    }

    #[test]
    fn globals_persist_between_runs() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let mut env = Environment::captured().expect("environment");
        pipeline.run("n = 20\n", "first", &mut env).expect("first");
        pipeline
            .run("print(n + 22)\n", "second", &mut env)
            .expect("second");
        assert_eq!(env.take_output(), "T 42\n");
    }

    #[test]
    fn parse_error_stops_before_execution() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let mut env = Environment::captured().expect("environment");
        let err = pipeline
            .run("print(1)\ndef (:\n", "<test>", &mut env)
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
        assert_eq!(env.take_output(), "");
    }

    #[test]
    fn compilation_error_names_the_source() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let mut env = Environment::captured().expect("environment");
        let err = pipeline
            .run("print(1)\nx = obj.field\n", "prog.py", &mut env)
            .unwrap_err();
        assert!(err.to_string().starts_with("prog.py:2:4: compilation error"));
        assert_eq!(env.take_output(), "");
    }

    #[test]
    fn runtime_faults_are_propagated() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let mut env = Environment::captured().expect("environment");
        let err = pipeline
            .run("print(1)\nprint(missing)\n", "<test>", &mut env)
            .unwrap_err();
        assert!(err.is_execution_fault());
        assert!(err.to_string().contains("name 'missing' is not defined"));
        assert_eq!(env.take_output(), "T 1\n");
    }

    #[test]
    fn observations_survive_a_failing_lowering() {
        let mut pipeline = Pipeline::wasm(fixed("T")).expect("pipeline");
        let observed = pipeline.observe("x = 1\nreturn x\n").expect("observe");
        assert_eq!(values(&observed.observations), [1]);

        let transformed = pipeline.rewrite(observed).expect("rewrite");
        let err = pipeline.lower(transformed, "<test>").unwrap_err();
        assert!(err.to_string().contains("'return' outside function"));
    }

    #[test]
    fn rejects_invalid_stamp_format() {
        let options = PipelineOptions {
            stamp_format: "%Q".into(),
            ..PipelineOptions::default()
        };
        assert!(matches!(
            Pipeline::wasm(options),
            Err(CoreError::InvalidStampFormat(_))
        ));
    }

    #[test]
    fn pipeline_works_with_any_backend() {
        /// Renders the finalized tree instead of compiling it.
        struct SourceBackend;

        impl Backend for SourceBackend {
            type Unit = String;
            type Env = Vec<String>;

            fn lower(&self, module: &Module, source_name: &str) -> Result<String, CoreError> {
                if !all_located(module) {
                    return Err(CoreError::MissingLocation { node: "?" });
                }
                Ok(format!("# {source_name}\n{}", unparse(module)))
            }

            fn execute(&self, unit: &String, env: &mut Vec<String>) -> Result<(), CoreError> {
                env.push(unit.clone());
                Ok(())
            }
        }

        let mut pipeline = Pipeline::new(SourceBackend, fixed("T")).expect("pipeline");
        let mut env = Vec::new();
        pipeline
            .run("def f(): print(1)", "a.py", &mut env)
            .expect("run");
        assert_eq!(env, ["# a.py\ndef f():\n    return print('T', 1)\n"]);
    }
}
