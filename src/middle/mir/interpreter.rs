//! Reference interpreter for MIR. Programs run on a word-addressed heap with
//! an explicit frame stack, so deep recursion is bounded by
//! [`InterpreterOptions::max_call_depth`] instead of the host stack.

use hashbrown::HashMap;
use thiserror::Error;

use crate::middle::{
    hir::{Builtin, ENTRY_FUNCTION_NAME},
    mir::{Expression, Function, Sources, Statement},
};

const WORD_SIZE: i64 = 8;
/// Functions live at addresses no heap allocation reaches in practice
const CODE_BASE: i64 = 1 << 48;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpreterError {
    #[error("{0}")]
    Panic(String),
    #[error("call depth exceeded {0} frames")]
    StackOverflow(usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("`{0}` is not defined")]
    UndefinedName(String),
    #[error("label `{label}` is not defined in `{function}`")]
    UndefinedLabel { function: String, label: String },
    #[error("{0} is not the address of a function")]
    NotAFunction(i64),
    #[error("`{function}` expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid memory access at {0}")]
    InvalidAddress(i64),
    #[error("`{0}` runs past its last statement")]
    MissingReturn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterOptions {
    pub max_call_depth: usize,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Callee<'a> {
    Function(&'a Function),
    Builtin(Builtin),
}

struct Frame<'a> {
    function: &'a Function,
    temporaries: HashMap<&'a str, i64>,
    program_counter: usize,
    /// Caller temporary receiving the returned value
    return_collector: Option<&'a str>,
}

struct Interpreter<'a> {
    options: InterpreterOptions,
    heap: Vec<i64>,
    globals: HashMap<&'a str, i64>,
    callees: HashMap<i64, Callee<'a>>,
    labels: HashMap<&'a str, HashMap<String, usize>>,
    printed: String,
}

impl<'a> Interpreter<'a> {
    fn new(sources: &'a Sources, options: InterpreterOptions) -> Self {
        let mut interpreter = Interpreter {
            options,
            // Word 0 stays reserved so no allocation is ever null
            heap: vec![0],
            globals: HashMap::new(),
            callees: HashMap::new(),
            labels: HashMap::new(),
            printed: String::new(),
        };

        for global in &sources.global_variables {
            let address = interpreter.store_string(&global.content) - WORD_SIZE;
            interpreter.globals.insert(global.name.as_str(), address);
        }

        let callees = sources
            .functions
            .iter()
            .map(Callee::Function)
            .chain(Builtin::ALL.into_iter().map(Callee::Builtin));
        for (index, callee) in callees.enumerate() {
            let address = CODE_BASE + WORD_SIZE * index as i64;
            match callee {
                Callee::Function(function) => {
                    interpreter.globals.insert(function.name.as_str(), address);
                    let labels = function
                        .body
                        .iter()
                        .enumerate()
                        .filter_map(|(index, statement)| match statement {
                            Statement::Label(label) => Some((label.clone(), index)),
                            _ => None,
                        })
                        .collect();
                    interpreter.labels.insert(function.name.as_str(), labels);
                }
                Callee::Builtin(builtin) => {
                    interpreter.globals.insert(builtin.into(), address);
                }
            }
            interpreter.callees.insert(address, callee);
        }

        interpreter
    }

    fn allocate(&mut self, bytes: i64) -> i64 {
        let address = self.heap.len() as i64 * WORD_SIZE;
        let words = (bytes.max(0) + WORD_SIZE - 1) / WORD_SIZE;
        self.heap.extend(std::iter::repeat_n(0, words.max(1) as usize));
        address
    }

    fn slot(&self, address: i64) -> Result<usize, InterpreterError> {
        if address <= 0 || address % WORD_SIZE != 0 || address / WORD_SIZE >= self.heap.len() as i64
        {
            return Err(InterpreterError::InvalidAddress(address));
        }
        Ok((address / WORD_SIZE) as usize)
    }

    fn jump(&self, frame: &mut Frame<'_>, label: &str) -> Result<(), InterpreterError> {
        frame.program_counter = self
            .labels
            .get(frame.function.name.as_str())
            .and_then(|labels| labels.get(label))
            .copied()
            .ok_or_else(|| InterpreterError::UndefinedLabel {
                function: frame.function.name.clone(),
                label: label.to_string(),
            })?;
        Ok(())
    }

    fn load(&self, address: i64) -> Result<i64, InterpreterError> {
        Ok(self.heap[self.slot(address)?])
    }

    fn store(&mut self, address: i64, value: i64) -> Result<(), InterpreterError> {
        let slot = self.slot(address)?;
        self.heap[slot] = value;
        Ok(())
    }

    /// Stores a length word followed by one word per character and returns
    /// the address of the first character
    fn store_string(&mut self, content: &str) -> i64 {
        let characters = content.chars().collect::<Vec<_>>();
        let base = self.allocate(WORD_SIZE * (characters.len() as i64 + 1));
        let slot = (base / WORD_SIZE) as usize;
        self.heap[slot] = characters.len() as i64;
        for (offset, character) in characters.into_iter().enumerate() {
            self.heap[slot + 1 + offset] = character as i64;
        }
        base + WORD_SIZE
    }

    fn read_string(&self, pointer: i64) -> Result<String, InterpreterError> {
        let length = self.load(pointer - WORD_SIZE)?;
        (0..length)
            .map(|index| {
                let code = self.load(pointer + WORD_SIZE * index)?;
                Ok(u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER))
            })
            .collect()
    }

    fn evaluate(&self, frame: &Frame<'_>, expression: &Expression) -> Result<i64, InterpreterError> {
        match expression {
            Expression::Constant(value) => Ok(*value),
            Expression::Name(name) => self
                .globals
                .get(name.as_str())
                .copied()
                .ok_or_else(|| InterpreterError::UndefinedName(name.clone())),
            Expression::Temporary(name) => {
                Ok(frame.temporaries.get(name.as_str()).copied().unwrap_or(0))
            }
            Expression::Mem(address) => self.load(self.evaluate(frame, address)?),
            Expression::Binary { operator, e1, e2 } => {
                let v1 = self.evaluate(frame, e1)?;
                let v2 = self.evaluate(frame, e2)?;
                operator
                    .apply(v1, v2)
                    .ok_or(InterpreterError::DivisionByZero)
            }
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, arguments: &[i64]) -> Result<i64, InterpreterError> {
        let argument = |index: usize| arguments.get(index).copied().unwrap_or(0);
        match builtin {
            Builtin::Println => {
                let line = self.read_string(argument(0))?;
                self.printed.push_str(&line);
                self.printed.push('\n');
                Ok(0)
            }
            Builtin::IntToString => Ok(self.store_string(&argument(0).to_string())),
            Builtin::StringToInt => {
                let content = self.read_string(argument(0))?;
                content
                    .parse::<i64>()
                    .map_err(|_| InterpreterError::Panic(format!("Cannot convert `{content}` to int.")))
            }
            Builtin::StringConcat => {
                let mut content = self.read_string(argument(0))?;
                content.push_str(&self.read_string(argument(1))?);
                Ok(self.store_string(&content))
            }
            Builtin::Throw => Err(InterpreterError::Panic(self.read_string(argument(0))?)),
            Builtin::Malloc => Ok(self.allocate(argument(0))),
        }
    }

    fn frame(
        &self,
        function: &'a Function,
        arguments: Vec<i64>,
        return_collector: Option<&'a str>,
    ) -> Result<Frame<'a>, InterpreterError> {
        if function.arguments.len() != arguments.len() {
            return Err(InterpreterError::ArityMismatch {
                function: function.name.clone(),
                expected: function.arguments.len(),
                actual: arguments.len(),
            });
        }

        Ok(Frame {
            function,
            temporaries: function
                .arguments
                .iter()
                .map(String::as_str)
                .zip(arguments)
                .collect(),
            program_counter: 0,
            return_collector,
        })
    }

    fn run(&mut self, entry: &'a Function) -> Result<i64, InterpreterError> {
        let mut stack = vec![self.frame(entry, Vec::new(), None)?];

        loop {
            let Some(frame) = stack.last_mut() else {
                return Ok(0);
            };
            let function = frame.function;
            let statement = function
                .body
                .get(frame.program_counter)
                .ok_or_else(|| InterpreterError::MissingReturn(function.name.clone()))?;
            frame.program_counter += 1;

            match statement {
                Statement::MoveTemp { temporary, source } => {
                    let value = self.evaluate(frame, source)?;
                    frame.temporaries.insert(temporary.as_str(), value);
                }
                Statement::MoveMem { target, source } => {
                    let address = self.evaluate(frame, target)?;
                    let value = self.evaluate(frame, source)?;
                    self.store(address, value)?;
                }
                Statement::Call {
                    function: callee,
                    arguments,
                    return_collector,
                } => {
                    let address = self.evaluate(frame, callee)?;
                    let arguments = arguments
                        .iter()
                        .map(|argument| self.evaluate(frame, argument))
                        .collect::<Result<Vec<_>, _>>()?;

                    match self.callees.get(&address).copied() {
                        Some(Callee::Builtin(builtin)) => {
                            let value = self.call_builtin(builtin, &arguments)?;
                            if let Some(collector) = return_collector {
                                frame.temporaries.insert(collector.as_str(), value);
                            }
                        }
                        Some(Callee::Function(callee)) => {
                            if stack.len() >= self.options.max_call_depth {
                                return Err(InterpreterError::StackOverflow(
                                    self.options.max_call_depth,
                                ));
                            }
                            let callee = self.frame(callee, arguments, return_collector.as_deref())?;
                            stack.push(callee);
                        }
                        None => return Err(InterpreterError::NotAFunction(address)),
                    }
                }
                Statement::Jump(label) => self.jump(frame, label)?,
                Statement::Label(_) => {}
                Statement::ConditionalJumpFallThrough { condition, label } => {
                    if self.evaluate(frame, condition)? != 0 {
                        self.jump(frame, label)?;
                    }
                }
                Statement::Return(value) => {
                    let value = self.evaluate(frame, value)?;
                    let collector = frame.return_collector;
                    stack.pop();
                    match stack.last_mut() {
                        None => return Ok(value),
                        Some(caller) => {
                            if let Some(collector) = collector {
                                caller.temporaries.insert(collector, value);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Runs the program from its entry function and returns everything it
/// printed
pub fn interpret_sources(
    sources: &Sources,
    options: InterpreterOptions,
) -> Result<String, InterpreterError> {
    let entry = sources
        .function(ENTRY_FUNCTION_NAME)
        .ok_or_else(|| InterpreterError::UndefinedName(ENTRY_FUNCTION_NAME.to_string()))?;

    let mut interpreter = Interpreter::new(sources, options);
    interpreter.run(entry)?;
    Ok(interpreter.printed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::{allocator::GlobalVariable, hir::Operator};

    fn temp(name: &str) -> Expression {
        Expression::temporary(name)
    }

    fn call(function: &str, arguments: Vec<Expression>, collector: Option<&str>) -> Statement {
        Statement::Call {
            function: Expression::Name(function.into()),
            arguments,
            return_collector: collector.map(String::from),
        }
    }

    fn main(body: Vec<Statement>) -> Function {
        Function {
            name: ENTRY_FUNCTION_NAME.into(),
            arguments: vec![],
            body,
        }
    }

    fn hello() -> GlobalVariable {
        GlobalVariable {
            name: "GLOBAL_STRING_0".into(),
            content: "Hello".into(),
        }
    }

    fn hello_pointer() -> Expression {
        Expression::binary(
            Operator::Add,
            Expression::Name("GLOBAL_STRING_0".into()),
            Expression::Constant(8),
        )
    }

    #[test]
    fn prints_global_strings_and_concatenations() {
        let sources = Sources {
            global_variables: vec![hello()],
            functions: vec![main(vec![
                call("_builtin_println", vec![hello_pointer()], None),
                call("_builtin_intToString", vec![Expression::Constant(42)], Some("s")),
                call("_builtin_stringConcat", vec![hello_pointer(), temp("s")], Some("t")),
                call("_builtin_println", vec![temp("t")], None),
                Statement::Return(Expression::ZERO),
            ])],
        };

        assert_eq!(
            interpret_sources(&sources, InterpreterOptions::default()),
            Ok("Hello\nHello42\n".to_string())
        );
    }

    fn countdown(depth: i64) -> Sources {
        let countdown = Function {
            name: "countdown".into(),
            arguments: vec!["n".into()],
            body: vec![
                Statement::ConditionalJumpFallThrough {
                    condition: Expression::binary(Operator::Eq, temp("n"), Expression::ZERO),
                    label: "done".into(),
                },
                call(
                    "countdown",
                    vec![Expression::binary(Operator::Add, temp("n"), Expression::Constant(-1))],
                    Some("r"),
                ),
                Statement::Return(temp("r")),
                Statement::Label("done".into()),
                Statement::Return(Expression::Constant(7)),
            ],
        };

        Sources {
            global_variables: vec![],
            functions: vec![
                main(vec![
                    call("countdown", vec![Expression::Constant(depth)], Some("v")),
                    call("_builtin_intToString", vec![temp("v")], Some("s")),
                    call("_builtin_println", vec![temp("s")], None),
                    Statement::Return(Expression::ZERO),
                ]),
                countdown,
            ],
        }
    }

    #[test]
    fn call_depth_is_bounded() {
        let options = InterpreterOptions { max_call_depth: 50 };
        assert_eq!(interpret_sources(&countdown(10), options), Ok("7\n".to_string()));
        assert_eq!(
            interpret_sources(&countdown(100), options),
            Err(InterpreterError::StackOverflow(50))
        );
    }

    #[test]
    fn heap_records_round_trip_through_closures() {
        let sources = Sources {
            global_variables: vec![],
            functions: vec![
                main(vec![
                    call("_builtin_malloc", vec![Expression::Constant(16)], Some("c")),
                    Statement::MoveMem {
                        target: temp("c"),
                        source: Expression::Name("add_context".into()),
                    },
                    Statement::MoveMem {
                        target: Expression::binary(Operator::Add, temp("c"), Expression::Constant(8)),
                        source: Expression::Constant(40),
                    },
                    Statement::move_temp("f", Expression::mem(temp("c"))),
                    Statement::move_temp(
                        "x",
                        Expression::mem(Expression::binary(
                            Operator::Add,
                            temp("c"),
                            Expression::Constant(8),
                        )),
                    ),
                    Statement::Call {
                        function: temp("f"),
                        arguments: vec![temp("x"), Expression::Constant(2)],
                        return_collector: Some("r".into()),
                    },
                    call("_builtin_intToString", vec![temp("r")], Some("s")),
                    call("_builtin_println", vec![temp("s")], None),
                    Statement::Return(Expression::ZERO),
                ]),
                Function {
                    name: "add_context".into(),
                    arguments: vec!["_context".into(), "y".into()],
                    body: vec![Statement::Return(Expression::binary(
                        Operator::Add,
                        temp("_context"),
                        temp("y"),
                    ))],
                },
            ],
        };

        assert_eq!(
            interpret_sources(&sources, InterpreterOptions::default()),
            Ok("42\n".to_string())
        );
    }

    #[test]
    fn runtime_failures_are_errors() {
        let division = Sources {
            global_variables: vec![],
            functions: vec![main(vec![
                Statement::move_temp("z", Expression::ZERO),
                Statement::Return(Expression::binary(Operator::Div, Expression::ONE, temp("z"))),
            ])],
        };
        assert_eq!(
            interpret_sources(&division, InterpreterOptions::default()),
            Err(InterpreterError::DivisionByZero)
        );

        let thrown = Sources {
            global_variables: vec![hello()],
            functions: vec![main(vec![
                call("_builtin_throw", vec![hello_pointer()], None),
                Statement::Return(Expression::ZERO),
            ])],
        };
        assert_eq!(
            interpret_sources(&thrown, InterpreterOptions::default()),
            Err(InterpreterError::Panic("Hello".into()))
        );
    }
}
