//! Tensors grouped by their dotted name prefix.
//!
//! `blk.0.attn_q.weight` lands in the `blk.0` layer, `output.weight` in
//! `output`. Layers borrow descriptors from the file's tensor table; nothing
//! is copied and the tree must not outlive the parsed file.

use regex::Regex;

use crate::decode::tensor::{TensorInfo, TensorInfos};

#[derive(Debug, Clone)]
pub struct GgufLayer<'a> {
    pub name: String,
    pub tensors: Vec<&'a TensorInfo>,
}

impl<'a> GgufLayer<'a> {
    pub fn get(&self, suffix: &str) -> Option<&'a TensorInfo> {
        self.tensors
            .iter()
            .find(|t| {
                t.name
                    .strip_prefix(&self.name)
                    .and_then(|rest| rest.strip_prefix('.'))
                    == Some(suffix)
            })
            .copied()
    }

    pub fn bytes(&self) -> u64 {
        self.tensors.iter().map(|t| t.bytes()).sum()
    }

    pub fn elements(&self) -> u64 {
        self.tensors.iter().map(|t| t.elements()).sum()
    }

    pub fn bytes_where(&self, filter: impl Fn(&str) -> bool) -> u64 {
        self.tensors
            .iter()
            .filter(|t| filter(&t.name))
            .map(|t| t.bytes())
            .sum()
    }

    pub fn elements_where(&self, filter: impl Fn(&str) -> bool) -> u64 {
        self.tensors
            .iter()
            .filter(|t| filter(&t.name))
            .map(|t| t.elements())
            .sum()
    }

    pub fn search(&self, re: &Regex) -> Vec<&'a TensorInfo> {
        self.tensors
            .iter()
            .filter(|t| re.is_match(&t.name))
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GgufLayers<'a> {
    layers: Vec<GgufLayer<'a>>,
}

impl<'a> GgufLayers<'a> {
    pub fn from_tensors(tensors: &'a [TensorInfo]) -> Self {
        let mut layers: Vec<GgufLayer<'a>> = Vec::new();
        for t in tensors {
            let key = layer_key(&t.name);
            match layers.iter_mut().find(|l| l.name == key) {
                Some(layer) => layer.tensors.push(t),
                None => layers.push(GgufLayer {
                    name: key,
                    tensors: vec![t],
                }),
            }
        }
        Self { layers }
    }

    fn from_refs(tensors: Vec<&'a TensorInfo>) -> Self {
        let mut layers: Vec<GgufLayer<'a>> = Vec::new();
        for t in tensors {
            let key = layer_key(&t.name);
            match layers.iter_mut().find(|l| l.name == key) {
                Some(layer) => layer.tensors.push(t),
                None => layers.push(GgufLayer {
                    name: key,
                    tensors: vec![t],
                }),
            }
        }
        Self { layers }
    }

    pub fn layers(&self) -> &[GgufLayer<'a>] {
        &self.layers
    }

    pub fn layer(&self, key: &str) -> Option<&GgufLayer<'a>> {
        self.layers.iter().find(|l| l.name == key)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Number of `blk.N`-style layers.
    pub fn count_blocks(&self) -> u64 {
        self.layers
            .iter()
            .filter(|l| l.name.starts_with("blk.") || l.name.contains(".blk."))
            .count() as u64
    }

    /// Partition by glob patterns over full tensor names. `*` matches any
    /// run of characters. Returns (matching, rest).
    pub fn cut(&self, patterns: &[&str]) -> (Self, Self) {
        let compiled: Vec<Regex> = patterns.iter().map(|p| glob_to_regex(p)).collect();
        let mut matching = Vec::new();
        let mut rest = Vec::new();
        for layer in &self.layers {
            for &t in &layer.tensors {
                if compiled.iter().any(|re| re.is_match(&t.name)) {
                    matching.push(t);
                } else {
                    rest.push(t);
                }
            }
        }
        (Self::from_refs(matching), Self::from_refs(rest))
    }

    pub fn bytes_where(&self, filter: impl Fn(&str) -> bool) -> u64 {
        self.layers
            .iter()
            .map(|l| l.bytes_where(&filter))
            .sum()
    }

    pub fn elements_where(&self, filter: impl Fn(&str) -> bool) -> u64 {
        self.layers
            .iter()
            .map(|l| l.elements_where(&filter))
            .sum()
    }
}

impl TensorInfos for GgufLayers<'_> {
    fn tensor_count(&self) -> u64 {
        self.layers.iter().map(|l| l.tensors.len() as u64).sum()
    }

    fn bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.bytes()).sum()
    }

    fn elements(&self) -> u64 {
        self.layers.iter().map(|l| l.elements()).sum()
    }

    fn search(&self, re: &Regex) -> Vec<&TensorInfo> {
        self.layers.iter().flat_map(|l| l.search(re)).collect()
    }

    fn get(&self, name: &str) -> Option<&TensorInfo> {
        self.layers
            .iter()
            .flat_map(|l| l.tensors.iter())
            .find(|t| t.name == name)
            .copied()
    }
}

/// Group key of a tensor name: `blk.N` keeps its index segment, clip-style
/// `v.blk.N` / `a.blk.N` keep theirs, everything else groups on the first
/// segment.
fn layer_key(name: &str) -> String {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 1 && parts[0] == "blk" {
        format!("{}.{}", parts[0], parts[1])
    } else if parts.len() > 2 && parts[1] == "blk" {
        format!("{}.{}.{}", parts[0], parts[1], parts[2])
    } else {
        parts[0].to_string()
    }
}

fn glob_to_regex(pattern: &str) -> Regex {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).unwrap_or_else(|_| Regex::new("$^").unwrap())
}
