//! Tensor-override placement: user rules that pin named tensors to a
//! specific buffer before the standard layer partitioning runs.

use regex::Regex;

use crate::estimate::config::{OverrideBuffer, TensorOverride};

pub(super) struct OverridePlan {
    rules: Vec<(Regex, usize)>,
}

impl OverridePlan {
    /// Resolve each rule's buffer to a device index. Local GPUs come after
    /// the RPC servers; endpoints that match no configured server fall back
    /// to the host, as do GPU ordinals past the device array.
    pub fn compile(
        overrides: &[TensorOverride],
        rpc_count: usize,
        device_count: usize,
        rpc_servers: &[String],
    ) -> Self {
        let mut rules = Vec::with_capacity(overrides.len());
        for rule in overrides {
            let device = match &rule.buffer {
                OverrideBuffer::Cpu => 0,
                OverrideBuffer::Gpu(ordinal) => {
                    let index = 1 + rpc_count + ordinal;
                    if index < device_count {
                        index
                    } else {
                        tracing::warn!(ordinal, "override GPU out of range; pinning to host");
                        0
                    }
                }
                OverrideBuffer::Rpc(endpoint) => {
                    match rpc_servers.iter().position(|s| s == endpoint) {
                        Some(j) => 1 + j,
                        None => {
                            tracing::warn!(endpoint = %endpoint, "override RPC unknown; pinning to host");
                            0
                        }
                    }
                }
            };
            rules.push((glob_to_regex(&rule.pattern), device));
        }
        Self { rules }
    }

    /// Device index claiming `name`, if any rule matches. First rule wins.
    pub fn target(&self, name: &str) -> Option<usize> {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(name))
            .map(|&(_, device)| device)
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
