//! Generates the fluentd configuration of a collector
//!
//! The configuration consists of three zones: the preamble with the system settings, the
//! metrics sources and the concatenation of partial lines, the sources of the referenced inputs
//! and finally the labels which route the records through the inputs and pipelines to the
//! outputs.
//!
//! Everything the generator needs is passed in the [`Context`]; the same context always yields
//! the same configuration.

use snafu::Snafu;
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    cluster_info::ClusterInfo,
    crd::{common::FluentdBufferSpec, observability::v1},
    outputs::OutputPlugins,
    secrets::Secrets,
};

pub mod buffer;
pub mod elements;
pub mod filters;
pub mod preamble;
pub mod routing;
pub mod security;
pub mod sources;
pub mod template;
pub mod trace_context;

/// Fluentd plugin which joins partial container log lines
pub const CONCAT_PARTIAL_PLUGIN: &str = include_str!("assets/filter_concat_partial.rb");

/// Entrypoint of the collector container
pub const RUN_SCRIPT: &str = include_str!("assets/run.sh");

const HEADER: &str = "## CLO GENERATED CONFIGURATION ###\n\
    # This file is generated by the cluster logging operator.\n\
    # Changes are overwritten on the next reconciliation.";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("output {output:?} contains an invalid template"))]
    InvalidTemplate {
        source: template::Error,
        output: String,
    },

    #[snafu(display("output {output:?} contains the invalid URL {url:?}"))]
    ParseUrl {
        source: url::ParseError,
        output: String,
        url: String,
    },

    #[snafu(display("output {output:?} of type {output_type} lacks its {output_type} block"))]
    MissingOutputBlock {
        output: String,
        output_type: v1::OutputType,
    },

    #[snafu(display("output {output:?} has the unsupported type {output_type}"))]
    UnsupportedOutputType {
        output: String,
        output_type: v1::OutputType,
    },

    #[snafu(display("pipeline {pipeline:?} references the unknown input {name:?}"))]
    UnknownInput { pipeline: String, name: String },

    #[snafu(display("pipeline {pipeline:?} references the unknown filter {name:?}"))]
    UnknownFilter { pipeline: String, name: String },

    #[snafu(display("pipeline {pipeline:?} references the unknown output {name:?}"))]
    UnknownOutput { pipeline: String, name: String },

    #[snafu(display("{kind} {name:?} would use the label {label} which is already taken"))]
    DuplicateLabel {
        kind: &'static str,
        name: String,
        label: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The validated and migrated forwarder with everything it references
pub struct Context<'a> {
    pub forwarder_name: &'a str,
    pub namespace: &'a str,
    pub spec: &'a v1::ClusterLogForwarderSpec,
    pub secrets: &'a Secrets,
    pub cluster_info: &'a ClusterInfo,
    pub plugins: &'a OutputPlugins,
}

impl Context<'_> {
    pub fn collector_buffer(&self) -> Option<&FluentdBufferSpec> {
        self.spec
            .collector
            .as_ref()
            .and_then(|collector| collector.buffer.as_ref())
    }

    /// The declared input or the implicit input of a reserved name
    pub fn input(&self, name: &str) -> Option<v1::InputSpec> {
        self.spec.resolve_input(name)
    }

    pub fn filter(&self, name: &str) -> Option<&v1::FilterSpec> {
        self.spec.filter(name)
    }

    pub fn output(&self, name: &str) -> Option<&v1::OutputSpec> {
        self.spec.output(name)
    }

    /// The inputs referenced by any pipeline, in the order of their first reference
    pub fn referenced_inputs(&self) -> Result<Vec<v1::InputSpec>> {
        let mut inputs: Vec<v1::InputSpec> = vec![];
        for pipeline in &self.spec.pipelines {
            for name in &pipeline.input_refs {
                if inputs.iter().any(|input| &input.name == name) {
                    continue;
                }
                let input = self.input(name).ok_or_else(|| Error::UnknownInput {
                    pipeline: pipeline.name.clone(),
                    name: name.clone(),
                })?;
                inputs.push(input);
            }
        }
        Ok(inputs)
    }

    /// The outputs referenced by any pipeline, in the order of their declaration
    pub fn referenced_outputs(&self) -> Vec<&v1::OutputSpec> {
        self.spec
            .outputs
            .iter()
            .filter(|output| {
                self.spec
                    .pipelines
                    .iter()
                    .any(|pipeline| pipeline.output_refs.contains(&output.name))
            })
            .collect()
    }

    /// The pipelines which reference the given input
    pub fn pipelines_of_input(&self, input_name: &str) -> Vec<&v1::PipelineSpec> {
        self.spec
            .pipelines
            .iter()
            .filter(|pipeline| pipeline.input_refs.iter().any(|name| name == input_name))
            .collect()
    }
}

/// Generates `fluent.conf`
pub fn generate(ctx: &Context<'_>) -> Result<String> {
    use elements::{blocks, literal, sequence};

    routing::ensure_unique_labels(ctx)?;

    sequence(vec![
        literal(HEADER),
        blocks(preamble::system),
        blocks(preamble::metrics_sources),
        blocks(sources::sources),
        blocks(preamble::concat_partial_lines),
        blocks(routing::ingress),
        blocks(routing::source_types),
        blocks(routing::inputs),
        blocks(routing::pipelines),
        blocks(routing::outputs),
    ])(ctx)
}

#[cfg(test)]
pub mod test_support {
    use super::Context;
    use crate::{
        cluster_info::ClusterInfo, crd::observability::v1, outputs::OutputPlugins,
        secrets::Secrets,
    };

    /// Runs `f` with the context of an empty forwarder
    pub fn with_context<T>(f: impl FnOnce(&Context<'_>) -> T) -> T {
        with_spec(&spec("{serviceAccount: {name: logcollector}, pipelines: []}"), f)
    }

    pub fn with_spec<T>(
        spec: &v1::ClusterLogForwarderSpec,
        f: impl FnOnce(&Context<'_>) -> T,
    ) -> T {
        let secrets = Secrets::new();
        let cluster_info = ClusterInfo {
            version: "4.16.0".to_owned(),
            id: "a-cluster-id".to_owned(),
        };
        let plugins = OutputPlugins::register_all();
        let ctx = Context {
            forwarder_name: "collector",
            namespace: "openshift-logging",
            spec,
            secrets: &secrets,
            cluster_info: &cluster_info,
            plugins: &plugins,
        };
        f(&ctx)
    }

    pub fn spec(yaml: &str) -> v1::ClusterLogForwarderSpec {
        serde_yaml::from_str(yaml).expect("should be a valid ClusterLogForwarder spec")
    }
}
