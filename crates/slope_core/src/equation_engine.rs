use crate::traits::{Derivative, Scalar};
use anyhow::{anyhow, bail, Context, Result};
use std::cell::RefCell;
use std::collections::HashMap;

/// Elementary functions callable from an equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Exp,
    Ln,
    Log10,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "exp" => Function::Exp,
            "log" | "ln" => Function::Ln,
            "log10" => Function::Log10,
            "sqrt" => Function::Sqrt,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            _ => return None,
        };
        Some(func)
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Exp => a.exp(),
            Function::Ln => a.ln(),
            Function::Log10 => a.log10(),
            Function::Sqrt => a.sqrt(),
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Sinh => a.sinh(),
            Function::Cosh => a.cosh(),
        }
    }
}

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f64 or Complex64).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a real constant onto the stack.
    LoadConst(f64),
    /// Pushes the imaginary constant `v*i` onto the stack.
    LoadImag(f64),
    /// Pushes the value of a variable (by index) onto the stack.
    /// Indices correspond to the order variables were defined (e.g., 0=x, 1=y).
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes func(a).
    Call(Function),
    /// Pops top two values (b, a), pushes (a + b*i).
    MakeComplex,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: Current variable values (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    /// Executes the bytecode and returns the value left on the stack.
    ///
    /// # Type Parameters
    /// * `T`: The scalar domain (`f64` or `Complex64`).
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], stack: &mut Vec<T>) -> Result<T> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_real(val)),
                OpCode::LoadImag(val) => {
                    let value = T::from_parts(0.0, val)
                        .ok_or_else(|| anyhow!("Imaginary constant in a real-valued equation"))?;
                    stack.push(value);
                }
                OpCode::LoadVar(idx) => {
                    let value = vars
                        .get(idx)
                        .copied()
                        .ok_or_else(|| anyhow!("Variable slot {} is not bound", idx))?;
                    stack.push(value);
                }
                OpCode::Add => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a / b);
                }
                OpCode::Pow => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a.pow(b));
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack)?;
                    stack.push(func.apply(a));
                }
                OpCode::MakeComplex => {
                    let (a, b) = pop_pair(stack)?;
                    let unit = T::from_parts(0.0, 1.0)
                        .ok_or_else(|| anyhow!("complex() is not available for real values"))?;
                    stack.push(a + unit * b);
                }
            }
        }

        let result = pop(stack)?;
        if !stack.is_empty() {
            bail!("Malformed bytecode: {} values left on the stack", stack.len());
        }
        Ok(result)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T> {
    stack.pop().ok_or_else(|| anyhow!("Stack underflow"))
}

fn pop_pair<T>(stack: &mut Vec<T>) -> Result<(T, T)> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Imaginary literal such as `2j`.
    Imaginary(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // -
    Call(String, Vec<Expr>),            // functions like sin(x), complex(a, b)
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable names to indices and named constants to values.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    /// Whether `i`, `j`, imaginary literals and `complex(..)` are accepted.
    pub allow_imaginary: bool,
}

impl Compiler {
    pub fn new(var_names: &[&str], allow_imaginary: bool) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self {
            var_map,
            allow_imaginary,
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Imaginary(n) => {
                self.require_imaginary("Imaginary literal")?;
                ops.push(OpCode::LoadImag(*n));
            }
            Expr::Variable(name) => {
                // Variables shadow the named constants.
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else {
                    match name.as_str() {
                        "pi" => ops.push(OpCode::LoadConst(std::f64::consts::PI)),
                        "e" => ops.push(OpCode::LoadConst(std::f64::consts::E)),
                        "i" | "j" => {
                            self.require_imaginary("Imaginary unit")?;
                            ops.push(OpCode::LoadImag(1.0));
                        }
                        _ => bail!("Unknown variable: {}", name),
                    }
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                match op {
                    '+' => ops.push(OpCode::Add),
                    '-' => ops.push(OpCode::Sub),
                    '*' => ops.push(OpCode::Mul),
                    '/' => ops.push(OpCode::Div),
                    '^' => ops.push(OpCode::Pow),
                    _ => bail!("Unknown binary operator: {}", op),
                }
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => bail!("Unknown unary operator: {}", op),
                }
            }
            Expr::Call(func, args) => {
                if func == "complex" {
                    self.require_imaginary("complex()")?;
                    if args.len() != 2 {
                        bail!("complex() takes 2 arguments, got {}", args.len());
                    }
                    self.compile_recursive(&args[0], ops)?;
                    self.compile_recursive(&args[1], ops)?;
                    ops.push(OpCode::MakeComplex);
                    return Ok(());
                }

                let function =
                    Function::from_name(func).ok_or_else(|| anyhow!("Unknown function: {}", func))?;
                if args.len() != 1 {
                    bail!("{}() takes 1 argument, got {}", func, args.len());
                }
                self.compile_recursive(&args[0], ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }

    fn require_imaginary(&self, what: &str) -> Result<()> {
        if !self.allow_imaginary {
            bail!("{} requires a complex-valued equation", what);
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
///
/// Grammar, loosest binding first:
/// `+ -`, then `* /`, then unary `-`/`+`, then right-associative `^` (or `**`).
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        bail!("Empty expression");
    }
    if tokens.len() > MAX_TOKENS {
        bail!("Expression too long ({} tokens, limit {})", tokens.len(), MAX_TOKENS);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected {:?} at token {}", token, parser.pos);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Imaginary(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

/// Module names accepted (and dropped) in front of a function or constant.
const MODULE_PREFIXES: [&str; 3] = ["np", "numpy", "cmath"];

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    // Exponent, optionally signed: 1e-3, 2.5E+4
                    num_str.push(d);
                    chars.next();
                    if let Some(&(_, sign)) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value: f64 = num_str
                .parse()
                .with_context(|| format!("Invalid number '{}' at position {}", num_str, pos))?;
            if let Some(&(_, 'j')) | Some(&(_, 'J')) = chars.peek() {
                chars.next();
                tokens.push(Token::Imaginary(value));
            } else {
                tokens.push(Token::Number(value));
            }
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // Module prefixes from NumPy/cmath style equations: np.exp(x), cmath.sqrt(y)
            if MODULE_PREFIXES.contains(&ident.as_str()) {
                if let Some(&(_, '.')) = chars.peek() {
                    chars.next();
                    ident.clear();
                    while let Some(&(_, d)) = chars.peek() {
                        if d.is_alphanumeric() || d == '_' {
                            ident.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if ident.is_empty() {
                        bail!("Expected a name after the module prefix at position {}", pos);
                    }
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => {
                    if let Some(&(_, '*')) = chars.peek() {
                        chars.next();
                        Token::Caret
                    } else {
                        Token::Star
                    }
                }
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                _ => bail!("Unexpected character '{}' at position {}", c, pos),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// Deepest nesting of parentheses, signs and exponents the parser accepts.
pub const MAX_NESTING: usize = 256;

/// Longest accepted equation, in tokens. Bounds the depth of left-leaning
/// operator chains such as `y + y + ... + y`.
pub const MAX_TOKENS: usize = 1024;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            Some(other) => bail!("Expected ')' but found {:?} at token {}", other, self.pos - 1),
            None => bail!("Expected ')' but reached end of input"),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        // Every nested operand passes through here: parentheses, call
        // arguments, exponents and runs of signs.
        self.depth += 1;
        if self.depth > MAX_NESTING {
            bail!("Expression nested too deeply (limit {})", MAX_NESTING);
        }
        let expr = self.parse_signed();
        self.depth -= 1;
        expr
    }

    fn parse_signed(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary('-', Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // Right associative; the exponent may carry its own sign (2^-x).
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Imaginary(n)) => Ok(Expr::Imaginary(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let mut args = vec![self.parse_expression()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.consume();
                        args.push(self.parse_expression()?);
                    }
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(other) => bail!("Unexpected {:?} at token {}", other, self.pos - 1),
            None => bail!("Unexpected end of input"),
        }
    }
}

// --- CompiledDerivative ---

/// Names bound when compiling a right-hand side, in slot order.
pub const DERIVATIVE_VARS: [&str; 2] = ["x", "y"];

/// A user-entered right-hand side `f(x, y)` compiled for the VM.
pub struct CompiledDerivative<T: Scalar> {
    pub source: String,
    pub bytecode: Bytecode,
    // Interior mutability for VM stack to avoid allocation in evaluate.
    // Note: This makes the derivative !Sync.
    stack: RefCell<Vec<T>>,
}

impl<T: Scalar> CompiledDerivative<T> {
    /// Parses and compiles `source` in the domain of `T`.
    ///
    /// Imaginary constants are rejected when `T` is real.
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parse(source).with_context(|| format!("Invalid equation '{}'", source))?;
        let compiler = Compiler::new(&DERIVATIVE_VARS, T::from_parts(0.0, 1.0).is_some());
        let bytecode = compiler
            .compile(&expr)
            .with_context(|| format!("Invalid equation '{}'", source))?;
        Ok(Self {
            source: source.to_string(),
            bytecode,
            stack: RefCell::new(Vec::with_capacity(64)),
        })
    }
}

impl<T: Scalar> Derivative<T> for CompiledDerivative<T> {
    fn evaluate(&self, x: f64, y: T) -> Result<T> {
        let mut stack = self.stack.borrow_mut();
        VM::execute(&self.bytecode, &[T::from_real(x), y], &mut stack)
    }
}

/// Evaluates a constant expression such as `1+2j` or `-pi/2` in the domain of `T`.
pub fn parse_value<T: Scalar>(text: &str) -> Result<T> {
    let expr = parse(text).with_context(|| format!("Invalid value '{}'", text))?;
    let compiler = Compiler::new(&[], T::from_parts(0.0, 1.0).is_some());
    let bytecode = compiler
        .compile(&expr)
        .with_context(|| format!("Invalid value '{}'", text))?;
    let mut stack = Vec::new();
    let value = VM::execute::<T>(&bytecode, &[], &mut stack)?;
    if !value.is_finite() {
        bail!("Value '{}' is not finite", text);
    }
    Ok(value)
}
