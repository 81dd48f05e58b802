//! cpuset core-list helpers, the `0-3,5,7-8` format used by cgroup files.

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CoreListError {
    #[error("invalid core id in list: {0:?}")]
    InvalidId(String),
    #[error("descending core range: {0:?}")]
    DescendingRange(String),
}

/// Parse a cpuset list string into an ordered core set.
pub fn parse_core_list(list: &str) -> Result<BTreeSet<usize>, CoreListError> {
    let mut cores = BTreeSet::new();
    for part in list.trim().split(',') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo
                    .trim()
                    .parse()
                    .map_err(|_| CoreListError::InvalidId(part.to_string()))?;
                let hi: usize = hi
                    .trim()
                    .parse()
                    .map_err(|_| CoreListError::InvalidId(part.to_string()))?;
                if lo > hi {
                    return Err(CoreListError::DescendingRange(part.to_string()));
                }
                cores.extend(lo..=hi);
            }
            None => {
                let id: usize = part
                    .trim()
                    .parse()
                    .map_err(|_| CoreListError::InvalidId(part.to_string()))?;
                cores.insert(id);
            }
        }
    }
    Ok(cores)
}

/// Format a core set back into the compact cpuset list form.
pub fn format_core_list(cores: &BTreeSet<usize>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = cores.iter().copied();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;

    for core in iter {
        if core == end + 1 {
            end = core;
        } else {
            parts.push(render_range(start, end));
            start = core;
            end = core;
        }
    }
    parts.push(render_range(start, end));
    parts.join(",")
}

fn render_range(start: usize, end: usize) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}
