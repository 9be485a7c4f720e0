//! Tree-walking evaluator with a fuel budget and a call-depth limit.
//!
//! Globals live in one map; function calls get a fresh local frame seeded with the closure's
//! captured bindings, so values never share mutable state.

use super::parser::Expr;
use super::value::{Closure, Value};
use super::InterpretError;
use std::collections::{BTreeMap, HashMap};

/// Default evaluation step budget per call
pub const DEFAULT_FUEL: u64 = 1_000_000;

/// Maximum nesting of evaluation
pub const MAX_DEPTH: usize = 128;

type Frame = Vec<(String, Value)>;

pub struct Interpreter {
    globals: HashMap<String, Value>,
    fuel: u64,
    depth: usize,
}

impl Interpreter {
    pub fn new(fuel: u64) -> Self {
        Self {
            globals: HashMap::new(),
            fuel,
            depth: 0,
        }
    }

    pub fn fuel(&self) -> u64 {
        self.fuel
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Evaluate a top-level form
    pub fn eval_top(&mut self, expr: &Expr) -> Result<Value, InterpretError> {
        let mut frames: Vec<Frame> = Vec::new();
        self.eval(expr, &mut frames)
    }

    /// Call a global function by name
    pub fn call_global(&mut self, name: &str, args: Vec<Value>) -> Result<Value, InterpretError> {
        match self.globals.get(name).cloned() {
            Some(Value::Lambda(closure)) => self.apply(&closure, args),
            Some(other) => Err(InterpretError::Type(format!(
                "{} is a {}, not a function",
                name,
                other.type_name()
            ))),
            None => Err(InterpretError::MissingFunction(name.to_string())),
        }
    }

    fn eval(&mut self, expr: &Expr, frames: &mut Vec<Frame>) -> Result<Value, InterpretError> {
        if self.fuel == 0 {
            return Err(InterpretError::OutOfFuel);
        }
        self.fuel -= 1;
        if self.depth >= MAX_DEPTH {
            return Err(InterpretError::DepthExceeded(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.eval_inner(expr, frames);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr, frames: &mut Vec<Frame>) -> Result<Value, InterpretError> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Quote(inner) => Ok(quote(inner)),
            Expr::Symbol(name) => self.lookup(name, frames),
            Expr::List(items) => {
                let Some((head, rest)) = items.split_first() else {
                    return Ok(Value::Nil);
                };
                if let Some(name) = head.as_symbol() {
                    if let Some(value) = self.special_form(name, rest, frames)? {
                        return Ok(value);
                    }
                }
                let args = rest
                    .iter()
                    .map(|arg| self.eval(arg, frames))
                    .collect::<Result<Vec<_>, _>>()?;
                match head {
                    Expr::Symbol(name) if !self.is_bound(name, frames) => builtin(name, args),
                    _ => match self.eval(head, frames)? {
                        Value::Lambda(closure) => self.apply(&closure, args),
                        other => Err(InterpretError::Type(format!(
                            "cannot call a {}",
                            other.type_name()
                        ))),
                    },
                }
            }
        }
    }

    fn is_bound(&self, name: &str, frames: &[Frame]) -> bool {
        frames
            .last()
            .is_some_and(|frame| frame.iter().any(|(n, _)| n == name))
            || self.globals.contains_key(name)
    }

    fn lookup(&self, name: &str, frames: &[Frame]) -> Result<Value, InterpretError> {
        if let Some(frame) = frames.last() {
            if let Some((_, value)) = frame.iter().rev().find(|(n, _)| n == name) {
                return Ok(value.clone());
            }
        }
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| InterpretError::Unbound(name.to_string()))
    }

    fn assign(&mut self, name: &str, value: Value, frames: &mut [Frame]) -> Result<(), InterpretError> {
        if let Some(frame) = frames.last_mut() {
            if let Some(slot) = frame.iter_mut().rev().find(|(n, _)| n == name) {
                slot.1 = value;
                return Ok(());
            }
        }
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(InterpretError::Unbound(name.to_string())),
        }
    }

    fn apply(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, InterpretError> {
        if closure.params.len() != args.len() {
            return Err(InterpretError::Arity {
                name: "lambda".into(),
                expected: closure.params.len(),
                got: args.len(),
            });
        }
        let mut frame = closure.captured.clone();
        frame.extend(closure.params.iter().cloned().zip(args));
        let mut frames = vec![frame];
        self.body(&closure.body, &mut frames)
    }

    fn body(&mut self, forms: &[Expr], frames: &mut Vec<Frame>) -> Result<Value, InterpretError> {
        let mut last = Value::Nil;
        for form in forms {
            last = self.eval(form, frames)?;
        }
        Ok(last)
    }

    fn lambda(&self, params: &Expr, body: &[Expr], frames: &[Frame]) -> Result<Value, InterpretError> {
        let Expr::List(params) = params else {
            return Err(InterpretError::Type("lambda parameters must be a list".into()));
        };
        let params = params
            .iter()
            .map(|p| {
                p.as_symbol()
                    .map(str::to_string)
                    .ok_or_else(|| InterpretError::Type("parameter must be a symbol".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        // a closure holds its captured values, so it nests like a container
        Value::Lambda(Box::new(Closure {
            params,
            body: body.to_vec(),
            captured: frames.last().cloned().unwrap_or_default(),
        }))
        .bounded()
    }

    /// Evaluate a special form, or `None` if `name` is not one
    fn special_form(
        &mut self,
        name: &str,
        args: &[Expr],
        frames: &mut Vec<Frame>,
    ) -> Result<Option<Value>, InterpretError> {
        let value = match name {
            "quote" => {
                expect_arity(name, args, 1)?;
                quote(&args[0])
            }
            "define" => {
                let (target, rest) = args
                    .split_first()
                    .ok_or_else(|| arity(name, 2, 0))?;
                let (binding, value) = match target {
                    // (define (f a b) body...)
                    Expr::List(signature) => {
                        let (fname, params) = signature
                            .split_first()
                            .ok_or_else(|| InterpretError::Type("empty function signature".into()))?;
                        let fname = fname
                            .as_symbol()
                            .ok_or_else(|| InterpretError::Type("function name must be a symbol".into()))?;
                        let lambda = self.lambda(&Expr::List(params.to_vec()), rest, frames)?;
                        (fname.to_string(), lambda)
                    }
                    Expr::Symbol(var) => {
                        expect_arity(name, args, 2)?;
                        (var.clone(), self.eval(&rest[0], frames)?)
                    }
                    _ => return Err(InterpretError::Type("define needs a symbol".into())),
                };
                match frames.last_mut() {
                    Some(frame) => frame.push((binding, value)),
                    None => {
                        self.globals.insert(binding, value);
                    }
                }
                Value::Nil
            }
            "set!" => {
                expect_arity(name, args, 2)?;
                let var = args[0]
                    .as_symbol()
                    .ok_or_else(|| InterpretError::Type("set! needs a symbol".into()))?;
                let value = self.eval(&args[1], frames)?;
                self.assign(var, value.clone(), frames)?;
                value
            }
            "if" => {
                if args.len() != 2 && args.len() != 3 {
                    return Err(arity(name, 3, args.len()));
                }
                if self.eval(&args[0], frames)?.is_truthy() {
                    self.eval(&args[1], frames)?
                } else if let Some(otherwise) = args.get(2) {
                    self.eval(otherwise, frames)?
                } else {
                    Value::Nil
                }
            }
            "let" => {
                let (bindings, body) = args.split_first().ok_or_else(|| arity(name, 2, 0))?;
                let Expr::List(bindings) = bindings else {
                    return Err(InterpretError::Type("let bindings must be a list".into()));
                };
                let mut added = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    let Expr::List(pair) = binding else {
                        return Err(InterpretError::Type("let binding must be (name value)".into()));
                    };
                    let [var, init] = pair.as_slice() else {
                        return Err(InterpretError::Type("let binding must be (name value)".into()));
                    };
                    let var = var
                        .as_symbol()
                        .ok_or_else(|| InterpretError::Type("let binding needs a symbol".into()))?;
                    let value = self.eval(init, frames)?;
                    added.push((var.to_string(), value));
                }
                if frames.is_empty() {
                    frames.push(Vec::new());
                }
                let base = frames.last().map(Vec::len).unwrap_or(0);
                if let Some(frame) = frames.last_mut() {
                    frame.extend(added);
                }
                let result = self.body(body, frames);
                if let Some(frame) = frames.last_mut() {
                    frame.truncate(base);
                }
                result?
            }
            "begin" => self.body(args, frames)?,
            "lambda" => {
                let (params, body) = args.split_first().ok_or_else(|| arity(name, 2, 0))?;
                self.lambda(params, body, frames)?
            }
            "while" => {
                let (cond, body) = args.split_first().ok_or_else(|| arity(name, 2, 0))?;
                while self.eval(cond, frames)?.is_truthy() {
                    self.body(body, frames)?;
                }
                Value::Nil
            }
            "and" => {
                let mut last = Value::Bool(true);
                for arg in args {
                    last = self.eval(arg, frames)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                last
            }
            "or" => {
                let mut last = Value::Bool(false);
                for arg in args {
                    last = self.eval(arg, frames)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                last
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

fn quote(expr: &Expr) -> Value {
    match expr {
        Expr::Nil => Value::Nil,
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Int(n) => Value::Int(*n),
        Expr::Str(s) | Expr::Symbol(s) => Value::Str(s.clone()),
        Expr::List(items) => Value::List(items.iter().map(quote).collect()),
        Expr::Quote(inner) => quote(inner),
    }
}

fn arity(name: &str, expected: usize, got: usize) -> InterpretError {
    InterpretError::Arity {
        name: name.to_string(),
        expected,
        got,
    }
}

fn expect_arity<T>(name: &str, args: &[T], expected: usize) -> Result<(), InterpretError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(arity(name, expected, args.len()))
    }
}

fn int(name: &str, value: &Value) -> Result<i64, InterpretError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(InterpretError::Type(format!(
            "{} expects int, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn checked(name: &str, result: Option<i64>) -> Result<i64, InterpretError> {
    result.ok_or_else(|| InterpretError::Overflow(name.to_string()))
}

fn fold_ints(
    name: &str,
    args: &[Value],
    init: i64,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, InterpretError> {
    let mut acc = init;
    for arg in args {
        acc = checked(name, op(acc, int(name, arg)?))?;
    }
    Ok(Value::Int(acc))
}

fn compare(name: &str, args: &[Value]) -> Result<Value, InterpretError> {
    expect_arity(name, args, 2)?;
    let ordering = match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (a, b) => {
            return Err(InterpretError::Type(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            )))
        }
    };
    Ok(Value::Bool(match name {
        "<" => ordering.is_lt(),
        ">" => ordering.is_gt(),
        "<=" => ordering.is_le(),
        _ => ordering.is_ge(),
    }))
}

fn key_of(value: &Value) -> Result<String, InterpretError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(n) => Ok(n.to_string()),
        other => Err(InterpretError::Type(format!(
            "map keys must be strings, got {}",
            other.type_name()
        ))),
    }
}

fn index_of(value: &Value, len: usize) -> Result<Option<usize>, InterpretError> {
    let n = int("index", value)?;
    Ok(usize::try_from(n).ok().filter(|i| *i < len))
}

/// Built-in functions. Every builtin is pure; collection updates return new values.
fn builtin(name: &str, args: Vec<Value>) -> Result<Value, InterpretError> {
    match name {
        "+" => fold_ints(name, &args, 0, i64::checked_add),
        "*" => fold_ints(name, &args, 1, i64::checked_mul),
        "-" => match args.split_first() {
            None => Err(arity(name, 1, 0)),
            Some((first, [])) => Ok(Value::Int(checked(name, int(name, first)?.checked_neg())?)),
            Some((first, rest)) => fold_ints(name, rest, int(name, first)?, i64::checked_sub),
        },
        "/" | "%" => {
            expect_arity(name, &args, 2)?;
            let (a, b) = (int(name, &args[0])?, int(name, &args[1])?);
            if b == 0 {
                return Err(InterpretError::DivisionByZero);
            }
            let result = if name == "/" {
                a.checked_div(b)
            } else {
                a.checked_rem(b)
            };
            Ok(Value::Int(checked(name, result)?))
        }
        "=" => {
            expect_arity(name, &args, 2)?;
            Ok(Value::Bool(args[0] == args[1]))
        }
        "!=" => {
            expect_arity(name, &args, 2)?;
            Ok(Value::Bool(args[0] != args[1]))
        }
        "<" | ">" | "<=" | ">=" => compare(name, &args),
        "not" => {
            expect_arity(name, &args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }
        "nil?" => {
            expect_arity(name, &args, 1)?;
            Ok(Value::Bool(args[0] == Value::Nil))
        }
        "list" => Value::List(args).bounded(),
        "dict" => {
            if args.len() % 2 != 0 {
                return Err(InterpretError::Type("dict needs key/value pairs".into()));
            }
            let mut map = BTreeMap::new();
            for pair in args.chunks(2) {
                map.insert(key_of(&pair[0])?, pair[1].clone());
            }
            Value::Map(map).bounded()
        }
        "len" => {
            expect_arity(name, &args, 1)?;
            let len = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                Value::Nil => 0,
                other => {
                    return Err(InterpretError::Type(format!("len of {}", other.type_name())))
                }
            };
            Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
        }
        "get" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(arity(name, 2, args.len()));
            }
            let default = args.get(2).cloned().unwrap_or(Value::Nil);
            let found = match &args[0] {
                Value::Map(map) => map.get(&key_of(&args[1])?).cloned(),
                Value::List(items) => index_of(&args[1], items.len())?.map(|i| items[i].clone()),
                Value::Bytes(bytes) => {
                    index_of(&args[1], bytes.len())?.map(|i| Value::Int(i64::from(bytes[i])))
                }
                Value::Nil => None,
                other => return Err(InterpretError::Type(format!("get on {}", other.type_name()))),
            };
            Ok(found.unwrap_or(default))
        }
        "put" => {
            expect_arity(name, &args, 3)?;
            let mut args = args.into_iter();
            let (target, key, value) = match (args.next(), args.next(), args.next()) {
                (Some(t), Some(k), Some(v)) => (t, k, v),
                _ => return Err(arity(name, 3, 0)),
            };
            match target {
                Value::Map(mut map) => {
                    map.insert(key_of(&key)?, value);
                    Value::Map(map).bounded()
                }
                Value::Nil => {
                    let mut map = BTreeMap::new();
                    map.insert(key_of(&key)?, value);
                    Value::Map(map).bounded()
                }
                Value::List(mut items) => {
                    let index = index_of(&key, items.len())?
                        .ok_or_else(|| InterpretError::Type("list index out of range".into()))?;
                    items[index] = value;
                    Value::List(items).bounded()
                }
                other => Err(InterpretError::Type(format!("put on {}", other.type_name()))),
            }
        }
        "del" => {
            expect_arity(name, &args, 2)?;
            match &args[0] {
                Value::Map(map) => {
                    let mut map = map.clone();
                    map.remove(&key_of(&args[1])?);
                    Ok(Value::Map(map))
                }
                other => Err(InterpretError::Type(format!("del on {}", other.type_name()))),
            }
        }
        "has?" => {
            expect_arity(name, &args, 2)?;
            match &args[0] {
                Value::Map(map) => Ok(Value::Bool(map.contains_key(&key_of(&args[1])?))),
                Value::List(items) => Ok(Value::Bool(items.contains(&args[1]))),
                Value::Nil => Ok(Value::Bool(false)),
                other => Err(InterpretError::Type(format!("has? on {}", other.type_name()))),
            }
        }
        "keys" => {
            expect_arity(name, &args, 1)?;
            match &args[0] {
                Value::Map(map) => Ok(Value::List(map.keys().cloned().map(Value::Str).collect())),
                Value::Nil => Ok(Value::List(Vec::new())),
                other => Err(InterpretError::Type(format!("keys of {}", other.type_name()))),
            }
        }
        "push" => {
            expect_arity(name, &args, 2)?;
            match &args[0] {
                Value::List(items) => {
                    let mut items = items.clone();
                    items.push(args[1].clone());
                    Value::List(items).bounded()
                }
                Value::Nil => Value::List(vec![args[1].clone()]).bounded(),
                other => Err(InterpretError::Type(format!("push on {}", other.type_name()))),
            }
        }
        "concat" => {
            let mut iter = args.into_iter();
            match iter.next() {
                None => Ok(Value::Nil),
                Some(Value::Str(mut s)) => {
                    for v in iter {
                        s.push_str(&v.to_string());
                    }
                    Ok(Value::Str(s))
                }
                Some(Value::Bytes(mut b)) => {
                    for v in iter {
                        match v {
                            Value::Bytes(more) => b.extend(more),
                            other => {
                                return Err(InterpretError::Type(format!(
                                    "cannot concat {} to bytes",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    Ok(Value::Bytes(b))
                }
                Some(Value::List(mut items)) => {
                    for v in iter {
                        match v {
                            Value::List(more) => items.extend(more),
                            other => items.push(other),
                        }
                    }
                    Value::List(items).bounded()
                }
                Some(other) => Err(InterpretError::Type(format!("concat on {}", other.type_name()))),
            }
        }
        "str" => Ok(Value::Str(args.iter().map(Value::to_string).collect())),
        "int" => {
            expect_arity(name, &args, 1)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(*n)),
                Value::Str(s) => s
                    .trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| InterpretError::Type(format!("not an integer: {:?}", s))),
                other => Err(InterpretError::Type(format!("int of {}", other.type_name()))),
            }
        }
        "bytes" => {
            expect_arity(name, &args, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
                Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
                Value::Nil => Ok(Value::Bytes(Vec::new())),
                other => Err(InterpretError::Type(format!("bytes of {}", other.type_name()))),
            }
        }
        "utf8" => {
            expect_arity(name, &args, 1)?;
            match &args[0] {
                Value::Bytes(b) => String::from_utf8(b.clone())
                    .map(Value::Str)
                    .map_err(|_| InterpretError::Type("bytes are not valid UTF-8".into())),
                Value::Str(s) => Ok(Value::Str(s.clone())),
                other => Err(InterpretError::Type(format!("utf8 of {}", other.type_name()))),
            }
        }
        "json-encode" => {
            expect_arity(name, &args, 1)?;
            serde_json::to_string(&args[0].to_json()?)
                .map(Value::Str)
                .map_err(|e| InterpretError::Type(e.to_string()))
        }
        "json-decode" => {
            expect_arity(name, &args, 1)?;
            let text = match &args[0] {
                Value::Str(s) => s.clone(),
                Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                other => {
                    return Err(InterpretError::Type(format!("json-decode of {}", other.type_name())))
                }
            };
            if text.is_empty() {
                return Ok(Value::Nil);
            }
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| InterpretError::Type(e.to_string()))?;
            Value::from_json(&json)
        }
        "error" => Err(InterpretError::Raised(
            args.iter().map(Value::to_string).collect::<Vec<_>>().join(" "),
        )),
        _ => Err(InterpretError::Unbound(name.to_string())),
    }
}
