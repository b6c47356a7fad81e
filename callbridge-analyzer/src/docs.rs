// Copyright 2025 Callbridge (https://github.com/callbridge/callbridge)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structural documentation parsing.
//!
//! The scorer needs more than "is there a doc string": structured
//! documentation (a description plus parameter/return sections) outranks raw
//! length. This module parses the common sectioned style
//! (`Args:`/`Parameters:` and `Returns:`) into a [`DocBlock`]. Parsing is
//! tolerant; anything unrecognized folds into the description.

use regex::Regex;

/// One documented parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocParam {
    pub name: String,
    /// Declared type from the parenthesized annotation, when present.
    pub type_name: Option<String>,
    pub optional: bool,
    pub description: String,
}

/// Documented return value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocReturn {
    pub type_name: Option<String>,
    pub description: String,
}

/// A parsed documentation block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocBlock {
    /// First paragraph of the description.
    pub short: Option<String>,
    /// Remaining description text before any section.
    pub long: Option<String>,
    pub params: Vec<DocParam>,
    pub returns: Option<DocReturn>,
}

impl DocBlock {
    /// A description plus at least one parameter or return section.
    pub fn is_structured(&self) -> bool {
        self.short.is_some() && (!self.params.is_empty() || self.returns.is_some())
    }

    pub fn param(&self, name: &str) -> Option<&DocParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether any parameter or the return value carries a documented type.
    pub fn has_documented_types(&self) -> bool {
        self.params.iter().any(|p| p.type_name.is_some())
            || self
                .returns
                .as_ref()
                .is_some_and(|r| r.type_name.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Description,
    Params,
    Returns,
}

/// Parser with the section/entry patterns compiled once.
#[derive(Debug)]
pub struct DocParser {
    params_header: Regex,
    returns_header: Regex,
    param_entry: Regex,
}

impl Default for DocParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocParser {
    pub fn new() -> Self {
        Self {
            params_header: Regex::new(r"(?i)^\s*(args|arguments|parameters|params)\s*:\s*(.*)$")
                .expect("params header pattern"),
            returns_header: Regex::new(r"(?i)^\s*(returns?|yields?)\s*:\s*(.*)$")
                .expect("returns header pattern"),
            param_entry: Regex::new(
                r"^\s*(\*{0,2}[A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*(?::\s*(.*))?$",
            )
            .expect("param entry pattern"),
        }
    }

    pub fn parse(&self, text: &str) -> DocBlock {
        let mut block = DocBlock::default();
        let mut section = Section::Description;
        let mut description_lines: Vec<String> = Vec::new();
        let mut returns_lines: Vec<String> = Vec::new();

        for raw_line in text.lines() {
            let line = raw_line.trim_end();
            if let Some(caps) = self.params_header.captures(line) {
                section = Section::Params;
                let rest = caps.get(2).map_or("", |m| m.as_str());
                if !rest.trim().is_empty() {
                    self.push_param(&mut block, rest);
                }
                continue;
            }
            if let Some(caps) = self.returns_header.captures(line) {
                section = Section::Returns;
                let rest = caps.get(2).map_or("", |m| m.as_str());
                if !rest.trim().is_empty() {
                    returns_lines.push(rest.trim().to_string());
                }
                continue;
            }
            match section {
                Section::Description => description_lines.push(line.to_string()),
                Section::Params => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if !self.push_param(&mut block, line) {
                        // Continuation of the previous entry's description.
                        if let Some(last) = block.params.last_mut() {
                            if !last.description.is_empty() {
                                last.description.push(' ');
                            }
                            last.description.push_str(line.trim());
                        }
                    }
                }
                Section::Returns => {
                    if !line.trim().is_empty() {
                        returns_lines.push(line.trim().to_string());
                    }
                }
            }
        }

        let (short, long) = split_description(&description_lines);
        block.short = short;
        block.long = long;
        if section == Section::Returns || !returns_lines.is_empty() {
            block.returns = Some(parse_return(&returns_lines.join(" ")));
        }
        block
    }

    fn push_param(&self, block: &mut DocBlock, line: &str) -> bool {
        let Some(caps) = self.param_entry.captures(line) else {
            return false;
        };
        let name = caps[1].trim_start_matches('*').to_string();
        if name.is_empty() {
            return false;
        }
        let annotation = caps.get(2).map(|m| m.as_str());
        let (type_name, optional) = parse_annotation(annotation);
        block.params.push(DocParam {
            name,
            type_name,
            optional,
            description: caps.get(3).map_or("", |m| m.as_str().trim()).to_string(),
        });
        true
    }
}

/// Split `(str, optional)`-style annotations into a type and an optionality
/// marker.
fn parse_annotation(annotation: Option<&str>) -> (Option<String>, bool) {
    let Some(annotation) = annotation else {
        return (None, false);
    };
    let mut type_name = None;
    let mut optional = false;
    for part in annotation.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.to_lowercase().as_str() {
            "optional" => optional = true,
            "required" => {}
            _ if type_name.is_none() => type_name = Some(part.to_string()),
            _ => {}
        }
    }
    (type_name, optional)
}

fn parse_return(text: &str) -> DocReturn {
    let text = text.trim();
    if let Some((head, rest)) = text.split_once(':') {
        let head = head.trim();
        let is_type_like = !head.is_empty()
            && !head.contains(' ')
            && head
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
        if is_type_like {
            return DocReturn {
                type_name: Some(head.to_string()),
                description: rest.trim().to_string(),
            };
        }
    }
    DocReturn {
        type_name: None,
        description: text.to_string(),
    }
}

fn split_description(lines: &[String]) -> (Option<String>, Option<String>) {
    let text = lines.join("\n");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (None, None);
    }
    match trimmed.split_once("\n\n") {
        Some((first, rest)) => {
            let long = rest.trim();
            (
                Some(first.trim().replace('\n', " ")),
                (!long.is_empty()).then(|| long.to_string()),
            )
        }
        None => (Some(trimmed.replace('\n', " ")), None),
    }
}
