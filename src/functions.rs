//! Built-in matcher functions and the per-enforcer function registry.
//!
//! Every built-in is total from the pipeline's point of view: a malformed
//! pattern or address yields an error here, and the enforcement pipeline
//! converts it into "this rule does not match" plus an incident line in the
//! explanation list. Nothing in this module panics on user input.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::error::{EngineError, Result};
use crate::expr::Value;

pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Process-wide cache of compiled patterns. Matcher evaluation hits the
/// same handful of patterns for every request, so compile each once.
static PATTERN_CACHE: Lazy<RwLock<HashMap<String, Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn cached_regex(pattern: &str) -> Result<Regex> {
    if let Some(re) = PATTERN_CACHE.read().get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)
        .map_err(|e| EngineError::evaluation(format!("malformed pattern '{pattern}': {e}")))?;
    PATTERN_CACHE.write().insert(pattern.to_string(), re.clone());
    Ok(re)
}

// --- path matching --------------------------------------------------------

/// `keyMatch("/foo/bar", "/foo/*")`: `*` matches any suffix starting at its
/// position; without `*` the match is exact.
pub fn key_match(key1: &str, key2: &str) -> bool {
    match key2.find('*') {
        None => key1 == key2,
        Some(i) => {
            // get() keeps multi-byte keys from splitting mid-character
            let prefix = &key2[..i];
            match key1.get(..i) {
                Some(head) => head == prefix,
                None => key1 == prefix,
            }
        }
    }
}

/// `keyMatch2("/res/123", "/res/:id")`: `:name` matches one path segment,
/// `/*` matches any suffix.
pub fn key_match2(key1: &str, key2: &str) -> Result<bool> {
    let mut pat = key2.replace("/*", "/.*");
    static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r":[^/]+").expect("static pattern"));
    pat = PARAM.replace_all(&pat, "[^/]+").to_string();
    Ok(cached_regex(&format!("^{}$", pat))?.is_match(key1))
}

/// `keyMatch3("/res/123", "/res/{id}")`: `{name}` matches one path segment.
pub fn key_match3(key1: &str, key2: &str) -> Result<bool> {
    let mut pat = key2.replace("/*", "/.*");
    static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^/]+\}").expect("static pattern"));
    pat = PARAM.replace_all(&pat, "[^/]+").to_string();
    Ok(cached_regex(&format!("^{}$", pat))?.is_match(key1))
}

/// `keyMatch4`: like `keyMatch3`, but repeated `{name}` tokens must bind
/// the same value: `/parent/{id}/child/{id}` matches `/parent/1/child/1`
/// and rejects `/parent/1/child/2`.
pub fn key_match4(key1: &str, key2: &str) -> Result<bool> {
    static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^/]+)\}").expect("static pattern"));
    let pat = key2.replace("/*", "/.*");
    let mut names: Vec<String> = Vec::new();
    for cap in PARAM.captures_iter(&pat) {
        names.push(cap[1].to_string());
    }
    let regex_src = format!("^{}$", PARAM.replace_all(&pat, "([^/]+)"));
    let re = cached_regex(&regex_src)?;
    let Some(caps) = re.captures(key1) else { return Ok(false) };
    let mut bound: HashMap<&str, &str> = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let got = caps.get(i + 1).map(|m| m.as_str()).unwrap_or("");
        match bound.get(name.as_str()) {
            Some(prev) if *prev != got => return Ok(false),
            _ => {
                bound.insert(name, got);
            }
        }
    }
    Ok(true)
}

/// `keyGet("/foo/bar", "/foo/*")` returns the part of `key1` matched by
/// `*`, or the empty string when there is no match.
pub fn key_get(key1: &str, key2: &str) -> String {
    match key2.find('*') {
        None => String::new(),
        Some(i) => match (key1.get(..i), key1.get(i..)) {
            (Some(head), Some(tail)) if head == &key2[..i] => tail.to_string(),
            _ => String::new(),
        },
    }
}

fn key_get_named(key1: &str, key2: &str, name: &str, param: &Regex) -> Result<String> {
    let pat = key2.replace("/*", "/.*");
    let mut names: Vec<String> = Vec::new();
    for cap in param.captures_iter(&pat) {
        names.push(cap[1].to_string());
    }
    let regex_src = format!("^{}$", param.replace_all(&pat, "([^/]+)"));
    let re = cached_regex(&regex_src)?;
    let Some(caps) = re.captures(key1) else { return Ok(String::new()) };
    for (i, n) in names.iter().enumerate() {
        if n == name {
            return Ok(caps.get(i + 1).map(|m| m.as_str().to_string()).unwrap_or_default());
        }
    }
    Ok(String::new())
}

/// `keyGet2("/res/123", "/res/:id", "id")` returns `"123"`.
pub fn key_get2(key1: &str, key2: &str, name: &str) -> Result<String> {
    static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r":([^/]+)").expect("static pattern"));
    key_get_named(key1, key2, name, &PARAM)
}

/// `keyGet3("/res/123", "/res/{id}", "id")` returns `"123"`.
pub fn key_get3(key1: &str, key2: &str, name: &str) -> Result<String> {
    static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^/]+?)\}").expect("static pattern"));
    key_get_named(key1, key2, name, &PARAM)
}

// --- regex / glob ---------------------------------------------------------

pub fn regex_match(key: &str, pattern: &str) -> Result<bool> {
    Ok(cached_regex(pattern)?.is_match(key))
}

/// Shell glob: `*` within one segment, `?` one character, `**` across
/// segment boundaries.
pub fn glob_match(path: &str, pattern: &str) -> Result<bool> {
    let mut regex_src = String::with_capacity(pattern.len() * 2 + 2);
    regex_src.push('^');
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    regex_src.push_str(".*");
                    i += 2;
                    continue;
                }
                regex_src.push_str("[^/]*");
            }
            '?' => regex_src.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                regex_src.push('\\');
                regex_src.push(c);
            }
            other => regex_src.push(other),
        }
        i += 1;
    }
    regex_src.push('$');
    Ok(cached_regex(&regex_src)?.is_match(path))
}

// --- ip matching ----------------------------------------------------------

fn parse_ip(s: &str) -> Result<IpAddr> {
    s.trim()
        .parse::<IpAddr>()
        .map_err(|_| EngineError::evaluation(format!("malformed ip address '{s}'")))
}

/// `ipMatch("192.168.2.1", "192.168.2.0/24")`. A pattern without a prefix
/// length is an exact address match.
pub fn ip_match(addr: &str, pattern: &str) -> Result<bool> {
    let ip = parse_ip(addr)?;
    let Some((base, prefix)) = pattern.split_once('/') else {
        return Ok(ip == parse_ip(pattern)?);
    };
    let base_ip = parse_ip(base)?;
    let prefix: u32 = prefix
        .trim()
        .parse()
        .map_err(|_| EngineError::evaluation(format!("malformed cidr '{pattern}'")))?;
    match (ip, base_ip) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            if prefix > 32 {
                return Err(EngineError::evaluation(format!("malformed cidr '{pattern}'")));
            }
            let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            Ok(u32::from(a) & mask == u32::from(b) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            if prefix > 128 {
                return Err(EngineError::evaluation(format!("malformed cidr '{pattern}'")));
            }
            let mask: u128 = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            Ok(u128::from(a) & mask == u128::from(b) & mask)
        }
        // address families differ: no inclusion possible
        _ => Ok(false),
    }
}

// --- time matching --------------------------------------------------------

fn parse_time_bound(s: &str) -> Result<Option<DateTime<Utc>>> {
    let s = s.trim();
    if s == "_" {
        return Ok(None);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(Utc.from_utc_datetime(&naive)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(Some(Utc.from_utc_datetime(&naive)));
    }
    Err(EngineError::evaluation(format!("malformed time '{s}'")))
}

/// Inclusive time window check against the current UTC time. `_` on either
/// side leaves that side unbounded.
pub fn time_match(start: &str, end: &str) -> Result<bool> {
    time_match_at(start, end, Utc::now())
}

pub fn time_match_at(start: &str, end: &str, now: DateTime<Utc>) -> Result<bool> {
    if let Some(s) = parse_time_bound(start)? {
        if now < s {
            return Ok(false);
        }
    }
    if let Some(e) = parse_time_bound(end)? {
        if now > e {
            return Ok(false);
        }
    }
    Ok(true)
}

// --- registry -------------------------------------------------------------

/// Name-to-handler map consulted by matcher evaluation. Seeded with the
/// built-in library; callers may add custom predicates at enforcer
/// construction. Registrations survive policy reloads.
#[derive(Clone)]
pub struct FunctionRegistry {
    map: HashMap<String, (usize, Function)>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        FunctionRegistry { map: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut reg = FunctionRegistry::empty();
        reg.register("keyMatch", 2, |a| Ok(Value::Bool(key_match(&a[0].to_text(), &a[1].to_text()))));
        reg.register("keyMatch2", 2, |a| Ok(Value::Bool(key_match2(&a[0].to_text(), &a[1].to_text())?)));
        reg.register("keyMatch3", 2, |a| Ok(Value::Bool(key_match3(&a[0].to_text(), &a[1].to_text())?)));
        reg.register("keyMatch4", 2, |a| Ok(Value::Bool(key_match4(&a[0].to_text(), &a[1].to_text())?)));
        reg.register("keyGet", 2, |a| Ok(Value::Str(key_get(&a[0].to_text(), &a[1].to_text()))));
        reg.register("keyGet2", 3, |a| {
            Ok(Value::Str(key_get2(&a[0].to_text(), &a[1].to_text(), &a[2].to_text())?))
        });
        reg.register("keyGet3", 3, |a| {
            Ok(Value::Str(key_get3(&a[0].to_text(), &a[1].to_text(), &a[2].to_text())?))
        });
        reg.register("regexMatch", 2, |a| Ok(Value::Bool(regex_match(&a[0].to_text(), &a[1].to_text())?)));
        reg.register("ipMatch", 2, |a| Ok(Value::Bool(ip_match(&a[0].to_text(), &a[1].to_text())?)));
        reg.register("globMatch", 2, |a| Ok(Value::Bool(glob_match(&a[0].to_text(), &a[1].to_text())?)));
        reg.register("timeMatch", 2, |a| Ok(Value::Bool(time_match(&a[0].to_text(), &a[1].to_text())?)));
        reg
    }

    /// Register (or replace) a function under `name` with a fixed arity.
    pub fn register<F>(&mut self, name: &str, arity: usize, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.map.insert(name.to_string(), (arity, Arc::new(f)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn arity(&self, name: &str) -> Option<usize> {
        self.map.get(name).map(|(a, _)| *a)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let Some((arity, f)) = self.map.get(name) else {
            return Err(EngineError::evaluation(format!("unknown function '{name}'")));
        };
        if args.len() != *arity {
            return Err(EngineError::evaluation(format!(
                "function '{name}' expects {arity} arguments, got {}",
                args.len()
            )));
        }
        f(args)
    }
}
