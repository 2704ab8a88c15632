// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical parameter sets and placeholder evaluation.
//!
//! A [`ParamSet`] is a key/value store with an optional parent chain
//! (task params inherit from group params which inherit from global params).
//! Templates reference values with `%key` or `%{key}`; `%%` escapes a
//! literal percent sign. Keys starting with `!` are reserved for evaluation
//! contexts (instance fields such as `!taskid` or `!returncode`) and are
//! never looked up in the set itself.

use std::collections::HashMap;
use std::sync::Arc;

/// Contextual value source consulted before the set during evaluation.
pub trait ParamsProvider {
    fn param(&self, key: &str) -> Option<String>;
}

/// Empty context for evaluations that have no surrounding instance.
pub struct NoContext;

impl ParamsProvider for NoContext {
    fn param(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Hierarchical key/value parameter store.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    values: HashMap<String, String>,
    parent: Option<Arc<ParamSet>>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a child set over `parent`.
    pub fn with_parent(parent: Arc<ParamSet>) -> Self {
        Self { values: HashMap::new(), parent: Some(parent) }
    }

    /// Rewire the parent chain, keeping own values. Used at config
    /// activation when group/global sets are rebuilt.
    pub fn reparented(&self, parent: Arc<ParamSet>) -> Self {
        Self { values: self.values.clone(), parent: Some(parent) }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Chained insertion for config construction.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Look up a raw (unevaluated) value, walking the parent chain.
    pub fn raw(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(v) => Some(v),
            None => self.parent.as_deref().and_then(|p| p.raw(key)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// Keys defined directly on this set (not inherited).
    pub fn own_keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Evaluate a value by key: looks it up, then substitutes placeholders.
    pub fn value(&self, key: &str, ctx: &dyn ParamsProvider) -> Option<String> {
        if let Some(v) = ctx.param(key) {
            return Some(v);
        }
        self.raw(key).map(|tpl| self.evaluate(tpl, ctx))
    }

    /// Substitute `%key` / `%{key}` placeholders in `template`.
    ///
    /// The context is consulted first; unresolvable placeholders render
    /// empty so that a missing parameter degrades rather than erroring.
    pub fn evaluate(&self, template: &str, ctx: &dyn ParamsProvider) -> String {
        self.evaluate_depth(template, ctx, MAX_EVAL_DEPTH)
    }

    fn evaluate_depth(&self, template: &str, ctx: &dyn ParamsProvider, depth: u8) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some('{') => {
                    chars.next();
                    let mut key = String::new();
                    for k in chars.by_ref() {
                        if k == '}' {
                            break;
                        }
                        key.push(k);
                    }
                    out.push_str(&self.lookup(&key, ctx, depth));
                }
                _ => {
                    let mut key = String::new();
                    while let Some(&k) = chars.peek() {
                        if k.is_ascii_alphanumeric() || matches!(k, '_' | '.' | '-' | '!') {
                            key.push(k);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if key.is_empty() {
                        out.push('%');
                    } else {
                        out.push_str(&self.lookup(&key, ctx, depth));
                    }
                }
            }
        }
        out
    }

    /// Evaluate a command template into an argv list.
    ///
    /// Splits on whitespace, honoring single and double quotes; quoting is
    /// applied after placeholder substitution so a parameter holding spaces
    /// can be quoted in the template.
    pub fn evaluate_split(&self, template: &str, ctx: &dyn ParamsProvider) -> Vec<String> {
        let evaluated = self.evaluate(template, ctx);
        split_command(&evaluated)
    }

    fn lookup(&self, key: &str, ctx: &dyn ParamsProvider, depth: u8) -> String {
        if let Some(v) = ctx.param(key) {
            return v;
        }
        if key.starts_with('!') {
            return String::new();
        }
        match self.raw(key) {
            // Parameters may reference other parameters; the depth budget
            // keeps a self-referential definition from looping forever.
            Some(tpl) if tpl.contains('%') && depth > 0 => {
                self.evaluate_depth(tpl, &NoContext, depth - 1)
            }
            Some(v) => v.to_string(),
            None => String::new(),
        }
    }
}

/// Indirection budget for parameters referencing other parameters.
const MAX_EVAL_DEPTH: u8 = 8;

/// Split an evaluated command string into argv, honoring quotes.
fn split_command(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod tests;