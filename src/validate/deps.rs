//! Static scan of generated Python for third-party imports.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// `from pkg.sub import x`; relative imports never match.
static FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^from\s+([A-Za-z_][A-Za-z0-9_]*)(?:\.[A-Za-z_][A-Za-z0-9_]*)*\s+import\b")
        .expect("Valid regex pattern")
});

/// `import a.b, c as d`
static PLAIN_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^import\s+(.+)$").expect("Valid regex pattern")
});

static MODULE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?:\.[A-Za-z_][A-Za-z0-9_]*)*(?:\s+as\s+[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("Valid regex pattern")
});

const BUILTIN_MODULES: &[&str] = &[
    "__future__",
    "abc",
    "asyncio",
    "base64",
    "collections",
    "contextlib",
    "copy",
    "csv",
    "dataclasses",
    "datetime",
    "email",
    "enum",
    "functools",
    "gc",
    "hashlib",
    "http",
    "inspect",
    "io",
    "itertools",
    "json",
    "logging",
    "math",
    "multiprocessing",
    "operator",
    "os",
    "pathlib",
    "pickle",
    "random",
    "re",
    "socket",
    "sqlite3",
    "string",
    "struct",
    "sys",
    "threading",
    "time",
    "traceback",
    "typing",
    "urllib",
    "uuid",
    "warnings",
    "weakref",
    "xml",
];

/// Import name to installable package name, where they differ.
const PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("langchain_anthropic", "langchain-anthropic"),
    ("langchain_community", "langchain-community"),
    ("langchain_core", "langchain-core"),
    ("langchain_openai", "langchain-openai"),
    ("typing_extensions", "typing-extensions"),
];

pub fn is_builtin(module: &str) -> bool {
    BUILTIN_MODULES.contains(&module)
}

fn package_for(module: &str) -> String {
    PACKAGE_ALIASES
        .iter()
        .find(|(import, _)| *import == module)
        .map(|(_, package)| package.to_string())
        .unwrap_or_else(|| module.to_string())
}

/// Root module names imported on one line. Lines that are not import
/// statements, or are malformed, yield nothing.
fn imported_roots(line: &str) -> Vec<&str> {
    if let Some(caps) = FROM_IMPORT.captures(line) {
        return caps.get(1).map(|m| vec![m.as_str()]).unwrap_or_default();
    }

    let Some(caps) = PLAIN_IMPORT.captures(line) else {
        return Vec::new();
    };
    let Some(targets) = caps.get(1) else {
        return Vec::new();
    };
    // Drop a trailing comment before splitting the target list.
    let targets = targets.as_str().split('#').next().unwrap_or_default();
    targets
        .split(',')
        .filter_map(|target| {
            MODULE_PATH
                .captures(target.trim())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
        })
        .collect()
}

/// Installable packages imported by `source`, sorted and de-duplicated.
pub fn extract_packages(source: &str) -> BTreeSet<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(imported_roots)
        .filter(|root| !is_builtin(root))
        .map(package_for)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
from __future__ import annotations

import json
import asyncio, logging
from typing import Any
from pydantic import BaseModel
from langchain_core.runnables import RunnableConfig
from langgraph.graph import StateGraph, START
import numpy as np
from cuteagent import WindowsAgent  # type: ignore
from . import helpers
# import pandas
    import httpx
import
from import x
"#;

    #[test]
    fn test_import_patterns_compile() {
        assert!(FROM_IMPORT.is_match("from a.b import c"));
        assert!(PLAIN_IMPORT.is_match("import a"));
        assert!(MODULE_PATH.is_match("a.b as c"));
    }

    #[test]
    fn test_extracts_third_party_packages() {
        let packages: Vec<String> = extract_packages(SAMPLE).into_iter().collect();
        assert_eq!(
            packages,
            ["cuteagent", "httpx", "langchain-core", "langgraph", "numpy", "pydantic"]
        );
    }

    #[test]
    fn test_builtins_are_excluded() {
        let source = "import os\nimport sys\nfrom datetime import datetime\nimport re";
        assert!(extract_packages(source).is_empty());
    }

    #[test]
    fn test_output_is_order_independent() {
        let forward = "import requests\nimport aiohttp\nfrom openai import OpenAI";
        let reversed = "from openai import OpenAI\nimport aiohttp\nimport requests";
        assert_eq!(extract_packages(forward), extract_packages(reversed));
        assert_eq!(extract_packages(forward), extract_packages(forward));
    }

    #[test]
    fn test_comma_separated_imports_with_aliases() {
        let packages = extract_packages("import typing_extensions as te, yaml, os.path");
        let packages: Vec<_> = packages.into_iter().collect();
        assert_eq!(packages, ["typing-extensions", "yaml"]);
    }

    #[test]
    fn test_words_that_only_look_like_imports() {
        let source = "important = True\nfromage = 'brie'\nprint('import nothing')";
        assert!(extract_packages(source).is_empty());
    }
}
