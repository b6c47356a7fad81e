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

//! Surface assembly.
//!
//! Turns surviving descriptors into the final [`ApiSurface`] document.
//! Path parameters always ride in the route. The rest split by verb:
//! read/delete-like verbs carry them as query parameters, create/update-like
//! verbs fold them into a structured request body. Operations flagged as
//! returning an opaque object get the fixed handle envelope as their
//! response schema instead of a declared return shape.

use std::collections::BTreeMap;

use callbridge_core::descriptor::{OperationDescriptor, ParameterShape};
use callbridge_core::shape::TypeShape;
use callbridge_core::surface::{
    handle_envelope_shape, ApiSurface, Endpoint, ParamSpec, SurfaceStats,
};

const SUMMARY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct SurfaceBuilder {
    title: String,
    version: String,
}

impl SurfaceBuilder {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
        }
    }

    pub fn build(&self, descriptors: &[OperationDescriptor], stats: SurfaceStats) -> ApiSurface {
        let mut surface = ApiSurface::new(&self.title, &self.version);
        surface.description = render_description(&self.title, &stats);
        for descriptor in descriptors {
            surface.insert(build_endpoint(descriptor));
        }
        surface.stats = stats;
        surface
    }
}

pub fn build_endpoint(descriptor: &OperationDescriptor) -> Endpoint {
    let (summary, description) = summarize(descriptor);
    let path_params: Vec<ParamSpec> = descriptor.path_params().map(param_spec).collect();
    let (query_params, body) = if descriptor.verb.carries_body() {
        (Vec::new(), body_shape(descriptor))
    } else {
        (descriptor.data_params().map(param_spec).collect(), None)
    };
    let response = if descriptor.returns_handle {
        handle_envelope_shape(&descriptor.handle_methods)
    } else {
        descriptor.return_shape.clone().unwrap_or_default()
    };

    Endpoint {
        operation_id: descriptor.operation_id(),
        route: descriptor.route.clone(),
        verb: descriptor.verb,
        summary,
        description,
        is_async: descriptor.is_async,
        path_params,
        query_params,
        body,
        response,
    }
}

fn param_spec(param: &ParameterShape) -> ParamSpec {
    ParamSpec {
        name: param.name.clone(),
        required: param.required,
        shape: param.shape.clone(),
    }
}

/// Non-path parameters folded into one object schema, `None` when there are
/// none.
fn body_shape(descriptor: &OperationDescriptor) -> Option<TypeShape> {
    let mut properties = BTreeMap::new();
    let mut required = Vec::new();
    for param in descriptor.data_params() {
        properties.insert(param.name.clone(), param.shape.clone());
        if param.required {
            required.push(param.name.clone());
        }
    }
    if properties.is_empty() {
        None
    } else {
        Some(TypeShape::object_of(properties, required))
    }
}

/// Summary is the first doc line (truncated), falling back to the
/// title-cased operation name. The full doc rides along as the description
/// only when it would not fit the summary.
fn summarize(descriptor: &OperationDescriptor) -> (String, Option<String>) {
    if let Some(doc) = descriptor.doc.as_deref() {
        let trimmed = doc.trim();
        if !trimmed.is_empty() {
            let first = trimmed.lines().next().unwrap_or_default();
            let summary: String = first.chars().take(SUMMARY_LIMIT).collect();
            let description = (doc.len() > SUMMARY_LIMIT).then(|| doc.to_string());
            return (summary, description);
        }
    }
    (title_case(&descriptor.name), None)
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_description(title: &str, stats: &SurfaceStats) -> String {
    let mut desc = format!("Auto-generated API surface for {title}");
    if stats.scanned == 0 {
        return desc;
    }
    desc.push_str(&format!(
        "\n\n## Quality Statistics\n\n\
         - Operations scanned: {}\n\
         - Operations exposed: {}\n\
         - Skipped before scoring: {}\n\
         - Average quality score: {:.1}/100",
        stats.scanned, stats.admitted, stats.skipped, stats.average_score
    ));
    desc.push_str("\n\n### Score Distribution\n");
    for (label, count) in [
        ("90-100", stats.buckets.s90_100),
        ("80-89", stats.buckets.s80_89),
        ("70-79", stats.buckets.s70_79),
        ("60-69", stats.buckets.s60_69),
    ] {
        desc.push_str(&format!("\n- {label}: {count} operations"));
    }
    if !stats.top.is_empty() {
        desc.push_str("\n\n### Top Operations\n");
        for (rank, entry) in stats.top.iter().enumerate() {
            desc.push_str(&format!(
                "\n{}. {} (score: {})",
                rank + 1,
                entry.qualified_name,
                entry.score
            ));
        }
    }
    desc
}
