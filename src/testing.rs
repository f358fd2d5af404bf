//! In-memory stand-in for a Dgraph alpha, used by unit tests.
//!
//! Understands the query shapes the stores issue (`eq`, `match`, `uid`,
//! `has` root functions, `@filter(has(..))`, `var` blocks collecting `~role`
//! members, pagination),
//! JSON set/delete mutations with blank nodes, conditional upsert blocks,
//! and transactions with commit-time conflict detection on `@upsert` keys.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::db::{
    Mutation, MutationResponse, Operation, QueryRequest, QueryResponse, Transport, TxnContext,
    Vars,
};
use crate::error::{Result, StoreError};

const UPSERT_PREDS: [&str; 3] = ["email", "user_name", "role_name"];

lazy_static! {
    static ref ROOT_RE: Regex = Regex::new(
        r"(?s)[{}]\s*(\w+)\(func:\s*(\w+)\(([^)]*)\)\s*(?:,\s*first:\s*(\d+))?\s*(?:,\s*offset:\s*(\d+))?\s*\)\s*(@filter\(has\(([\w.]+)\)\))?"
    )
    .unwrap();
    static ref VAR_RE: Regex = Regex::new(
        r"var\(func:\s*eq\(role_name,\s*([^)]*?)\)\)\s*\{\s*(\w+)\s+as\s+~role\s*\}"
    )
    .unwrap();
    static ref UPSERT_RE: Regex = Regex::new(
        r"(\w+)\(func:\s*uid\((0x[0-9a-f]+)\)\)\s*@filter\(has\((\w+)\)\)\s*\{\s*(\w+)\s+as\s+uid"
    )
    .unwrap();
    static ref COND_RE: Regex = Regex::new(r"@if\(eq\(len\((\w+)\),\s*(\d+)\)\)").unwrap();
}

type Node = Map<String, Value>;

#[derive(Debug, Clone)]
enum Write {
    Set(Value),
    Delete(Value),
}

#[derive(Default)]
struct Pending {
    writes: Vec<Write>,
    keys: HashSet<String>,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<u64, Node>,
    next_uid: u64,
    ts: u64,
    pending: HashMap<u64, Pending>,
    commits: Vec<(u64, HashSet<String>)>,
    schema: Option<String>,
    closed: bool,
}

#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
    fail_queries: AtomicU32,
    queries: AtomicU32,
    mutations: AtomicU32,
    alters: AtomicU32,
    closes: AtomicU32,
}

impl MemoryGraph {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` queries fail with a transport error.
    pub fn fail_next_queries(&self, n: u32) {
        self.fail_queries.store(n, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn mutation_count(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn alter_count(&self) -> u32 {
        self.alters.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Open write transactions still holding uncommitted state.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn schema(&self) -> Option<String> {
        self.lock().schema.clone()
    }

    /// Committed nodes whose `pred` equals `value`.
    pub fn count_where(&self, pred: &str, value: &str) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|n| n.get(pred).and_then(Value::as_str) == Some(value))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Transport for MemoryGraph {
    async fn query(&self, req: QueryRequest<'_>) -> Result<QueryResponse> {
        tokio::task::yield_now().await;
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Transport("connection refused".into()));
        }

        let mut st = self.lock();
        st.ensure_open()?;
        let start_ts = st.begin(req.start_ts, req.read_only);
        let view = st.view(start_ts);
        let data = run_query(&view, req.query, req.vars)?;
        Ok(QueryResponse {
            json: data,
            txn: TxnContext {
                start_ts,
                ..Default::default()
            },
        })
    }

    async fn mutate(&self, start_ts: u64, mu: &Mutation) -> Result<MutationResponse> {
        tokio::task::yield_now().await;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        let mut st = self.lock();
        st.ensure_open()?;
        let start_ts = st.begin(start_ts, false);
        let view = st.view(start_ts);

        let mut bindings: HashMap<String, Vec<String>> = HashMap::new();
        let mut queries = Map::new();
        if let Some(q) = &mu.query {
            for cap in UPSERT_RE.captures_iter(q) {
                let uid = parse_uid(&cap[2]).unwrap_or(0);
                let hit = view
                    .get(&uid)
                    .map(|n| n.contains_key(&cap[3]))
                    .unwrap_or(false);
                let matched: Vec<String> = if hit { vec![cap[2].to_string()] } else { vec![] };
                queries.insert(
                    cap[1].to_string(),
                    Value::Array(matched.iter().map(|u| json!({ "uid": u })).collect()),
                );
                bindings.insert(cap[4].to_string(), matched);
            }
        }

        let proceed = match mu.cond.as_deref().and_then(|c| COND_RE.captures(c)) {
            Some(cap) => {
                let want: usize = cap[2].parse().unwrap_or(0);
                bindings.get(&cap[1]).map_or(0, Vec::len) == want
            }
            None => true,
        };

        let mut uids = HashMap::new();
        let mut writes = Vec::new();
        if proceed {
            if let Some(set) = &mu.set_json {
                let mut doc = set.clone();
                resolve_uids(&mut doc, &bindings, &mut st, &mut uids);
                writes.push(Write::Set(doc));
            }
            if let Some(del) = &mu.delete_json {
                let mut doc = del.clone();
                resolve_uids(&mut doc, &bindings, &mut st, &mut uids);
                writes.push(Write::Delete(doc));
            }
        }

        let mut keys = HashSet::new();
        for w in &writes {
            collect_keys(w, &mut keys);
        }
        {
            let pending = st.pending.entry(start_ts).or_default();
            pending.writes.extend(writes);
            pending.keys.extend(keys.iter().cloned());
        }

        if mu.commit_now {
            st.commit(start_ts)?;
        }

        Ok(MutationResponse {
            uids,
            queries: Value::Object(queries),
            txn: TxnContext {
                start_ts,
                keys: keys.into_iter().collect(),
                ..Default::default()
            },
        })
    }

    async fn commit(&self, txn: &TxnContext) -> Result<TxnContext> {
        tokio::task::yield_now().await;
        let mut st = self.lock();
        st.ensure_open()?;
        let commit_ts = st.commit(txn.start_ts)?;
        Ok(TxnContext {
            start_ts: txn.start_ts,
            commit_ts,
            ..Default::default()
        })
    }

    async fn abort(&self, start_ts: u64) -> Result<()> {
        let mut st = self.lock();
        st.pending.remove(&start_ts);
        Ok(())
    }

    async fn alter(&self, op: &Operation) -> Result<()> {
        self.alters.fetch_add(1, Ordering::SeqCst);
        let mut st = self.lock();
        st.ensure_open()?;
        match op {
            Operation::Schema(s) => st.schema = Some(s.clone()),
            Operation::DropData => st.nodes.clear(),
            Operation::DropAll => {
                st.nodes.clear();
                st.schema = None;
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.lock().closed = true;
    }
}

impl State {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Transport("connection closed".into()));
        }
        Ok(())
    }

    fn begin(&mut self, start_ts: u64, read_only: bool) -> u64 {
        if start_ts != 0 {
            return start_ts;
        }
        self.ts += 1;
        if !read_only {
            self.pending.insert(self.ts, Pending::default());
        }
        self.ts
    }

    /// Committed nodes overlaid with the transaction's own pending writes.
    fn view(&self, start_ts: u64) -> BTreeMap<u64, Node> {
        let mut nodes = self.nodes.clone();
        if let Some(p) = self.pending.get(&start_ts) {
            for w in &p.writes {
                apply(&mut nodes, w);
            }
        }
        nodes
    }

    fn commit(&mut self, start_ts: u64) -> Result<u64> {
        let pending = self.pending.remove(&start_ts).unwrap_or_default();
        let conflict = self
            .commits
            .iter()
            .any(|(ts, keys)| *ts > start_ts && !keys.is_disjoint(&pending.keys));
        if conflict {
            return Err(StoreError::TxnAborted);
        }
        for w in &pending.writes {
            apply(&mut self.nodes, w);
        }
        self.ts += 1;
        let commit_ts = self.ts;
        self.commits.push((commit_ts, pending.keys));
        Ok(commit_ts)
    }
}

fn parse_uid(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok()
}

fn fmt_uid(n: u64) -> String {
    format!("{n:#x}")
}

/// Replace blank nodes and `uid(var)` references with concrete uids.
fn resolve_uids(
    doc: &mut Value,
    bindings: &HashMap<String, Vec<String>>,
    st: &mut State,
    uids: &mut HashMap<String, String>,
) {
    match doc {
        Value::Array(items) => {
            for item in items {
                resolve_uids(item, bindings, st, uids);
            }
        }
        Value::Object(obj) => {
            if let Some(Value::String(uid)) = obj.get("uid").cloned() {
                if let Some(blank) = uid.strip_prefix("_:") {
                    let assigned = uids.entry(blank.to_string()).or_insert_with(|| {
                        st.next_uid += 1;
                        fmt_uid(st.next_uid)
                    });
                    obj.insert("uid".into(), Value::String(assigned.clone()));
                } else if let Some(var) = uid.strip_prefix("uid(").and_then(|s| s.strip_suffix(')')) {
                    let bound = bindings.get(var).and_then(|v| v.first()).cloned();
                    obj.insert("uid".into(), bound.map_or(Value::Null, Value::String));
                }
            }
            for (_, v) in obj.iter_mut() {
                if v.is_object() || v.is_array() {
                    resolve_uids(v, bindings, st, uids);
                }
            }
        }
        _ => {}
    }
}

fn collect_keys(w: &Write, keys: &mut HashSet<String>) {
    let doc = match w {
        Write::Set(d) | Write::Delete(d) => d,
    };
    for obj in as_objects(doc) {
        if let Some(uid) = obj.get("uid").and_then(Value::as_str) {
            keys.insert(format!("uid={uid}"));
        }
        for p in UPSERT_PREDS {
            if let Some(v) = obj.get(p).and_then(Value::as_str) {
                keys.insert(format!("{p}={v}"));
            }
        }
    }
}

fn as_objects(doc: &Value) -> Vec<&Map<String, Value>> {
    match doc {
        Value::Object(o) => vec![o],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => vec![],
    }
}

fn apply(nodes: &mut BTreeMap<u64, Node>, w: &Write) {
    match w {
        Write::Set(doc) => {
            for obj in as_objects(doc) {
                set_node(nodes, obj);
            }
        }
        Write::Delete(doc) => {
            for obj in as_objects(doc) {
                if let Some(uid) = obj.get("uid").and_then(Value::as_str).and_then(parse_uid) {
                    nodes.remove(&uid);
                }
            }
        }
    }
}

fn set_node(nodes: &mut BTreeMap<u64, Node>, obj: &Map<String, Value>) -> Option<u64> {
    let uid = obj.get("uid").and_then(Value::as_str).and_then(parse_uid)?;
    let mut fields = Vec::new();
    for (k, v) in obj {
        if k == "uid" {
            continue;
        }
        match v {
            Value::Object(child) => {
                if let Some(c) = set_node(nodes, child) {
                    fields.push((k.clone(), Value::Array(vec![json!({ "uid": fmt_uid(c) })])));
                }
            }
            Value::Array(items) if items.iter().all(Value::is_object) => {
                let mut refs = Vec::new();
                for item in items.iter().filter_map(Value::as_object) {
                    if let Some(c) = set_node(nodes, item) {
                        refs.push(json!({ "uid": fmt_uid(c) }));
                    }
                }
                fields.push((k.clone(), Value::Array(refs)));
            }
            other => fields.push((k.clone(), other.clone())),
        }
    }

    let node = nodes.entry(uid).or_default();
    for (k, v) in fields {
        let is_edge = matches!(&v, Value::Array(items) if items.iter().all(Value::is_object));
        if is_edge {
            if let (Some(Value::Array(existing)), Value::Array(new)) = (node.get_mut(&k), &v) {
                // [uid] edges accumulate
                for r in new {
                    if !existing.contains(r) {
                        existing.push(r.clone());
                    }
                }
                continue;
            }
        }
        node.insert(k, v);
    }
    Some(uid)
}

fn run_query(nodes: &BTreeMap<u64, Node>, q: &str, vars: &Vars) -> Result<Value> {
    let lookup = |arg: &str| -> Vec<String> {
        let arg = arg.trim();
        if let Some(list) = arg.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            return list
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_string())
                .collect();
        }
        if arg.starts_with('$') {
            return vec![vars.get(arg).cloned().unwrap_or_default()];
        }
        vec![arg.trim_matches('"').to_string()]
    };

    // var blocks bind the users holding any of the named roles
    let mut bound: HashMap<String, Vec<u64>> = HashMap::new();
    for cap in VAR_RE.captures_iter(q) {
        let wanted = lookup(&cap[1]);
        let roles: Vec<u64> = nodes
            .iter()
            .filter(|(_, n)| {
                n.get("role_name")
                    .and_then(Value::as_str)
                    .map_or(false, |v| wanted.iter().any(|w| w == v))
            })
            .map(|(uid, _)| *uid)
            .collect();
        let members = nodes
            .iter()
            .filter(|(_, n)| roles.iter().any(|r| references(n, "role", *r)))
            .map(|(uid, _)| *uid)
            .collect();
        bound.insert(cap[2].to_string(), members);
    }

    let cap = ROOT_RE
        .captures_iter(q)
        .find(|c| &c[1] != "var")
        .ok_or_else(|| StoreError::Server(format!("unsupported query: {q}")))?;
    let block = cap[1].to_string();
    let func = &cap[2];
    let args: Vec<&str> = split_args(&cap[3]);
    let first = cap.get(4).and_then(|m| m.as_str().parse::<usize>().ok());
    let offset = cap.get(5).and_then(|m| m.as_str().parse::<usize>().ok()).unwrap_or(0);
    let filter_has = cap.get(7).map(|m| m.as_str().to_string());

    let mut hits: Vec<u64> = match func {
        "eq" => {
            let pred = args.first().copied().unwrap_or_default();
            let wanted = args.get(1).map(|a| lookup(a)).unwrap_or_default();
            nodes
                .iter()
                .filter(|(_, n)| {
                    n.get(pred)
                        .and_then(Value::as_str)
                        .map_or(false, |v| wanted.iter().any(|w| w == v))
                })
                .map(|(uid, _)| *uid)
                .collect()
        }
        "match" => {
            let pred = args.first().copied().unwrap_or_default();
            let wanted = args.get(1).map(|a| lookup(a)).unwrap_or_default();
            let wanted = wanted.first().cloned().unwrap_or_default();
            let dist: usize = args.get(2).and_then(|d| d.trim().parse().ok()).unwrap_or(0);
            nodes
                .iter()
                .filter(|(_, n)| {
                    n.get(pred)
                        .and_then(Value::as_str)
                        .map_or(false, |v| levenshtein(v, &wanted) <= dist)
                })
                .map(|(uid, _)| *uid)
                .collect()
        }
        "uid" => {
            let arg = args.first().copied().unwrap_or_default();
            match bound.get(arg) {
                Some(members) => members.clone(),
                None => lookup(arg)
                    .iter()
                    .filter_map(|s| parse_uid(s))
                    .filter(|uid| nodes.contains_key(uid))
                    .collect(),
            }
        }
        "has" => {
            let pred = args.first().copied().unwrap_or_default();
            nodes
                .iter()
                .filter(|(_, n)| n.contains_key(pred))
                .map(|(uid, _)| *uid)
                .collect()
        }
        other => return Err(StoreError::Server(format!("unsupported function {other}"))),
    };

    if let Some(pred) = &filter_has {
        hits.retain(|uid| nodes.get(uid).map_or(false, |n| n.contains_key(pred)));
    }
    let out: Vec<Value> = window(hits, first, offset)
        .into_iter()
        .map(|uid| Value::Object(project(nodes, uid)))
        .collect();

    let mut data = Map::new();
    data.insert(block, Value::Array(out));
    Ok(Value::Object(data))
}

fn split_args(raw: &str) -> Vec<&str> {
    // a bracketed list is a single argument
    let mut out = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                out.push(raw[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(raw[start..].trim());
    out
}

fn window(uids: Vec<u64>, first: Option<usize>, offset: usize) -> Vec<u64> {
    uids.into_iter()
        .skip(offset)
        .take(first.unwrap_or(usize::MAX))
        .collect()
}

fn references(node: &Node, pred: &str, target: u64) -> bool {
    node.get(pred)
        .and_then(Value::as_array)
        .map_or(false, |refs| {
            refs.iter()
                .filter_map(|r| r.get("uid").and_then(Value::as_str))
                .any(|u| parse_uid(u) == Some(target))
        })
}

/// Node as returned by a query: scalars plus one level of expanded edges.
fn project(nodes: &BTreeMap<u64, Node>, uid: u64) -> Node {
    let mut out = Node::new();
    out.insert("uid".into(), Value::String(fmt_uid(uid)));
    let Some(node) = nodes.get(&uid) else {
        return out;
    };
    for (k, v) in node {
        match v {
            Value::Array(refs) if refs.iter().all(Value::is_object) => {
                let expanded = refs
                    .iter()
                    .filter_map(|r| r.get("uid").and_then(Value::as_str).and_then(parse_uid))
                    .filter_map(|c| {
                        nodes.get(&c).map(|child| {
                            let mut m = Node::new();
                            m.insert("uid".into(), Value::String(fmt_uid(c)));
                            for (ck, cv) in child {
                                if !cv.is_array() {
                                    m.insert(ck.clone(), cv.clone());
                                }
                            }
                            Value::Object(m)
                        })
                    })
                    .collect();
                out.insert(k.clone(), Value::Array(expanded));
            }
            other => {
                out.insert(k.clone(), other.clone());
            }
        }
    }
    out
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("ada", "ada"), 0);
        assert_eq!(levenshtein("ada", "adb"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn split_keeps_lists_whole() {
        assert_eq!(
            split_args(r#"role_name, ["admin", "user"]"#),
            vec!["role_name", r#"["admin", "user"]"#]
        );
    }
}
