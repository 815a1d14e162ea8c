// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell-style variable expansion for job environments and commands.
//!
//! `Env` and `DateEnv` are ordered lists of `KEY=VALUE` pairs; each
//! value may reference the process environment and any pair defined
//! before it. Order matters, so pairs are resolved strictly
//! left-to-right and never deduplicated.

use std::collections::HashMap;

/// Expand `$VAR` / `${VAR}` references in `s`.
///
/// Missing names expand to the empty string and are reported back so
/// validation can surface them.
pub fn expand<F>(s: &str, get: F) -> (String, Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(s.len());
    let mut missing = Vec::new();
    let mut chars = s.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some((_, c)) = chars.peek().copied() {
            if c == '_' || c.is_ascii_alphanumeric() {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if braced {
            if let Some((_, '}')) = chars.peek().copied() {
                chars.next();
            }
        }
        if name.is_empty() {
            // A lone '$' is literal.
            out.push('$');
            if braced {
                out.push('{');
            }
            continue;
        }
        match get(&name) {
            Some(v) => out.push_str(&v),
            None => missing.push(name),
        }
    }
    (out, missing)
}

/// Result of resolving an ordered environment.
#[derive(Debug, Default, Clone)]
pub struct ResolvedEnv {
    /// Final `(key, value)` pairs, in definition order.
    pub vars: Vec<(String, String)>,
    /// Names referenced but defined neither earlier nor in the process env.
    pub missing: Vec<String>,
}

impl ResolvedEnv {
    pub fn get(&self, key: &str) -> Option<String> {
        // Last definition wins on lookup, mirroring shell semantics.
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

fn lookup(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key).cloned().or_else(|| std::env::var(key).ok())
}

/// Resolve `pairs` (each `KEY=VALUE`) in order on top of `seed` vars.
///
/// Seed vars (e.g. `RPEAT_JOBID`) are visible to every pair; each pair
/// additionally sees pairs resolved before it and the process env.
pub fn resolve_env(seed: &[(String, String)], pairs: &[String]) -> ResolvedEnv {
    let mut resolved = ResolvedEnv::default();
    let mut map: HashMap<String, String> = HashMap::new();

    for (k, v) in seed {
        map.insert(k.clone(), v.clone());
        resolved.vars.push((k.clone(), v.clone()));
    }

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            // A bare name defines nothing; keep going.
            tracing::warn!(pair = %pair, "environment entry without '='");
            continue;
        };
        let (value, mut missing) = expand(raw, |name| lookup(&map, name));
        resolved.missing.append(&mut missing);
        map.insert(key.to_string(), value.clone());
        resolved.vars.push((key.to_string(), value));
    }
    resolved
}

/// Split a command line on whitespace into an executable path and args.
///
/// For shell-wrapped commands the tail after the first flag collapses
/// into a single argument, so `/bin/sh -c echo hello` runs `echo hello`
/// as one `-c` payload.
pub fn split_command(cmd: &str) -> Option<(String, Vec<String>)> {
    let mut parts = cmd.split_whitespace();
    let path = parts.next()?.to_string();
    let rest: Vec<&str> = parts.collect();
    let args = match rest.len() {
        0 => Vec::new(),
        1 => vec![rest[0].to_string()],
        _ => vec![rest[0].to_string(), rest[1..].join(" ")],
    };
    Some((path, args))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
