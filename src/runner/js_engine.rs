//! JavaScript evaluation engine using boa_engine
//!
//! Provides JavaScript evaluation for:
//! - `${...}` interpolation in command fields
//! - evalScript / runScript / defineVariables commands
//! - script conditions in runFlow `when` and repeat `while`
//!
//! Variables live on the Rust side as a stack of frames. Every evaluation
//! runs in a fresh boa `Context` seeded with the visible variables; globals
//! the script creates or changes are copied back afterwards. New names land
//! in the innermost frame, so leaving a scope drops them. `define` always
//! binds in the innermost frame and shadows outer bindings.

use boa_engine::{Context, JsString, JsValue, Source};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Position on the scope stack returned by [`ScriptEngine::enter_scope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a scope must be released with leave_scope"]
pub struct ScopeHandle(usize);

/// Scripting capability consumed by the interpreter
pub trait ScriptEngine: Send {
    /// Drop every variable and start from the root frame
    fn init(&mut self);

    /// Evaluate a script and return its completion value as text
    fn evaluate(&mut self, script: &str) -> Result<String, String>;

    /// Open a nested variable scope
    fn enter_scope(&mut self) -> ScopeHandle;

    /// Close `handle` and every scope opened after it
    fn leave_scope(&mut self, handle: ScopeHandle);

    /// Bind `name` in the innermost scope, shadowing any outer binding
    fn define(&mut self, name: &str, value: &str) -> Result<(), String>;

    /// Replace every `${expr}` in `text` with the evaluated value of `expr`
    ///
    /// Braces inside the expression nest, so object literals and arrow
    /// function bodies are allowed. An unclosed `${` is kept as text.
    fn interpolate(&mut self, text: &str) -> Result<String, String> {
        if !text.contains("${") {
            return Ok(text.to_string());
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            let body = &rest[start + 2..];
            let Some(len) = expression_len(body) else {
                break;
            };
            result.push_str(&rest[..start]);
            result.push_str(&self.evaluate(&body[..len])?);
            rest = &body[len + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }

    /// Run a script body in a throwaway scope seeded with `env`
    fn run_script(&mut self, script: &str, env: &BTreeMap<String, String>) -> Result<(), String> {
        let scope = self.enter_scope();
        let result = env
            .iter()
            .try_for_each(|(name, value)| self.define(name, value))
            .and_then(|_| self.evaluate(script).map(|_| ()));
        self.leave_scope(scope);
        result
    }
}

/// Length of the expression before the `}` that closes a `${`
///
/// Tracks brace depth and skips over string and template literals.
fn expression_len(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Escape text for use inside a single- or double-quoted JS string literal
pub fn sanitize(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
}

const PRELUDE: &str = "var __lumiBuiltins = Object.keys(globalThis);";

const SNAPSHOT: &str = "JSON.stringify(Object.keys(globalThis)
    .filter(function (k) { return k !== '__lumiBuiltins' && __lumiBuiltins.indexOf(k) < 0; })
    .reduce(function (acc, k) { acc[k] = globalThis[k]; return acc; }, {}))";

/// JavaScript evaluation engine
pub struct JsEngine {
    frames: Vec<Map<String, Value>>,
}

impl JsEngine {
    /// Create a new JavaScript engine instance
    pub fn new() -> Self {
        Self {
            frames: vec![root_frame()],
        }
    }

    /// Visible value of a variable
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    fn visible(&self) -> Map<String, Value> {
        let mut all = Map::new();
        for frame in &self.frames {
            for (k, v) in frame {
                all.insert(k.clone(), v.clone());
            }
        }
        all
    }

    fn write_back(&mut self, globals: Map<String, Value>) {
        for (name, value) in globals {
            match self.frames.iter_mut().rev().find(|f| f.contains_key(&name)) {
                Some(frame) => {
                    if frame.get(&name) != Some(&value) {
                        log::debug!("Script updated variable {}", name);
                        frame.insert(name, value);
                    }
                }
                None => {
                    log::debug!("Script defined variable {}", name);
                    if let Some(frame) = self.frames.last_mut() {
                        frame.insert(name, value);
                    }
                }
            }
        }
    }
}

impl Default for JsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for JsEngine {
    fn init(&mut self) {
        self.frames = vec![root_frame()];
    }

    fn evaluate(&mut self, script: &str) -> Result<String, String> {
        let mut context = Context::default();

        context
            .eval(Source::from_bytes(PRELUDE))
            .map_err(|e| format!("JS Error: {}", e))?;

        for (name, value) in self.visible() {
            let js_code = format!(
                "globalThis[{}] = {};",
                Value::String(name.clone()),
                value
            );
            context
                .eval(Source::from_bytes(&js_code))
                .map_err(|e| format!("Failed to set variable {}: {}", name, e))?;
        }

        let result = context
            .eval(Source::from_bytes(script))
            .map_err(|e| format!("JavaScript error: {}", e))?;
        let text = js_value_to_string(&result, &mut context)?;

        let snapshot = context
            .eval(Source::from_bytes(SNAPSHOT))
            .map_err(|e| format!("Failed to read script variables: {}", e))?;
        let globals = snapshot
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
            .unwrap_or_default();

        self.write_back(globals);
        Ok(text)
    }

    fn define(&mut self, name: &str, value: &str) -> Result<(), String> {
        if !is_identifier(name) {
            return Err(format!("Invalid variable name: {}", name));
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), Value::String(value.to_string()));
        }
        Ok(())
    }

    fn enter_scope(&mut self) -> ScopeHandle {
        let handle = ScopeHandle(self.frames.len());
        self.frames.push(Map::new());
        handle
    }

    fn leave_scope(&mut self, handle: ScopeHandle) {
        // The root frame always survives
        self.frames.truncate(handle.0.max(1));
    }
}

fn root_frame() -> Map<String, Value> {
    let mut frame = Map::new();
    frame.insert("output".to_string(), Value::Object(Map::new()));
    frame.insert("lumi".to_string(), Value::Object(Map::new()));
    frame
}

/// Convert JsValue to String representation
fn js_value_to_string(value: &JsValue, context: &mut Context) -> Result<String, String> {
    if value.is_undefined() {
        Ok("undefined".to_string())
    } else if value.is_null() {
        Ok("null".to_string())
    } else if let Some(b) = value.as_boolean() {
        Ok(b.to_string())
    } else if let Some(n) = value.as_number() {
        // Beyond 2^53 whole floats are printed as they are
        if n.fract() == 0.0 && n.abs() < 9.007e15 {
            Ok((n as i64).to_string())
        } else {
            Ok(n.to_string())
        }
    } else if let Some(s) = value.as_string() {
        Ok(s.to_std_string_escaped())
    } else {
        // Objects and arrays: JSON.stringify(value)
        let global = context.global_object();
        let json_obj = global
            .get(JsString::from("JSON"), context)
            .map_err(|e| format!("Failed to get JSON object: {}", e))?;
        let stringify_fn = json_obj
            .as_object()
            .ok_or("JSON is not an object".to_string())?
            .get(JsString::from("stringify"), context)
            .map_err(|e| format!("Failed to get JSON.stringify: {}", e))?;

        if let Some(func) = stringify_fn.as_callable() {
            let json_str_val = func
                .call(&JsValue::undefined(), &[value.clone()], context)
                .map_err(|e| format!("Failed to stringify value: {}", e))?;
            if let Some(s) = json_str_val.as_string() {
                return Ok(s.to_std_string_escaped());
            }
        }
        Ok(format!("{:?}", value))
    }
}
