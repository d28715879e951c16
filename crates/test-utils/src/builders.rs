#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use stax::config::{ConfigSection, RawServiceConfig, ServiceConfig};
use stax::definition::{
    ActionNode, ArgDocument, FunctionDocument, JobDefinition, JobDocument, ScriptDocument,
    SignalHandlerDocument,
};
use stax::types::FunctionScope;

/// File name recorded in definitions built by [`JobDocumentBuilder`].
pub const TEST_FILE: &str = "test-job.toml";

pub fn script(code: &str) -> ActionNode {
    ActionNode::new("script").text(code)
}

pub fn sequence(children: impl IntoIterator<Item = ActionNode>) -> ActionNode {
    ActionNode::new("sequence").children(children)
}

pub fn parallel(children: impl IntoIterator<Item = ActionNode>) -> ActionNode {
    ActionNode::new("parallel").children(children)
}

/// `block` whose name is the literal `name`.
pub fn block(name: &str, body: ActionNode) -> ActionNode {
    ActionNode::new("block")
        .attr("name", format!("'{name}'"))
        .child(body)
}

pub fn call(function: &str) -> ActionNode {
    ActionNode::new("call").attr("function", format!("'{function}'"))
}

pub fn call_with(function: &str, args: &str) -> ActionNode {
    call(function).attr("args", args)
}

/// `throw` of the literal exception name `name`.
pub fn throw(name: &str) -> ActionNode {
    ActionNode::new("throw").attr("exception", format!("'{name}'"))
}

/// `catch` of the literal exception name `name`.
pub fn catch(name: &str, body: ActionNode) -> ActionNode {
    ActionNode::new("catch")
        .attr("exception", format!("'{name}'"))
        .child(body)
}

pub fn ret(value: &str) -> ActionNode {
    ActionNode::new("return").attr("value", value)
}

/// `stafcmd` to the local `DELAY` service.
pub fn delay(millis: u64) -> ActionNode {
    ActionNode::new("stafcmd")
        .attr("location", "'local'")
        .attr("service", "'DELAY'")
        .attr("request", format!("'DELAY {millis}'"))
}

/// Builder for `FunctionDocument`.
pub struct FunctionBuilder {
    function: FunctionDocument,
}

impl FunctionBuilder {
    pub fn new(name: &str, body: ActionNode) -> Self {
        Self {
            function: FunctionDocument {
                name: name.to_string(),
                scope: FunctionScope::default(),
                prolog: None,
                args: Vec::new(),
                requires: Vec::new(),
                body,
                line: 0,
            },
        }
    }

    pub fn scope(mut self, scope: FunctionScope) -> Self {
        self.function.scope = scope;
        self
    }

    pub fn arg(mut self, name: &str) -> Self {
        self.function.args.push(ArgDocument {
            name: name.to_string(),
            required: None,
            default: None,
            description: None,
        });
        self
    }

    pub fn arg_default(mut self, name: &str, default: &str) -> Self {
        self.function.args.push(ArgDocument {
            name: name.to_string(),
            required: None,
            default: Some(default.to_string()),
            description: None,
        });
        self
    }

    pub fn requires(mut self, name: &str) -> Self {
        self.function.requires.push(name.to_string());
        self
    }

    pub fn build(self) -> FunctionDocument {
        self.function
    }
}

/// Builder for `JobDocument` and the definitions built from it.
pub struct JobDocumentBuilder {
    document: JobDocument,
}

impl JobDocumentBuilder {
    pub fn new() -> Self {
        Self {
            document: JobDocument::default(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.document.job.name = Some(name.to_string());
        self
    }

    pub fn start(mut self, function: &str) -> Self {
        self.document.job.function = Some(function.to_string());
        self
    }

    pub fn args(mut self, args: &str) -> Self {
        self.document.job.args = Some(args.to_string());
        self
    }

    pub fn max_threads(mut self, max: u32) -> Self {
        self.document.job.max_threads = Some(max);
        self
    }

    pub fn script(mut self, code: &str) -> Self {
        self.document.script.push(ScriptDocument {
            code: code.to_string(),
            line: 0,
        });
        self
    }

    pub fn signal_handler(mut self, signal: &str, body: ActionNode) -> Self {
        self.document.signalhandler.push(SignalHandlerDocument {
            signal: format!("'{signal}'"),
            body,
            line: 0,
        });
        self
    }

    pub fn function(mut self, function: FunctionDocument) -> Self {
        self.document.function.push(function);
        self
    }

    /// Add a function with no arguments.
    pub fn simple_function(self, name: &str, body: ActionNode) -> Self {
        self.function(FunctionBuilder::new(name, body).build())
    }

    pub fn build(self) -> JobDocument {
        self.document
    }

    pub fn definition(self) -> Arc<JobDefinition> {
        Arc::new(
            JobDefinition::from_document(&self.document, Path::new(TEST_FILE), "local")
                .expect("Failed to build valid job definition from builder"),
        )
    }
}

impl Default for JobDocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition whose only function `main` runs `body`.
pub fn single_function_job(body: ActionNode) -> Arc<JobDefinition> {
    JobDocumentBuilder::new().simple_function("main", body).definition()
}

/// Builder for `ServiceConfig`.
pub struct ServiceConfigBuilder {
    config: RawServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawServiceConfig {
                config: ConfigSection::default(),
            },
        }
    }

    pub fn max_threads(mut self, max: u32) -> Self {
        self.config.config.max_stax_threads = max;
        self
    }

    pub fn breakpoints(mut self, enabled: bool) -> Self {
        self.config.config.breakpoints = enabled;
        self
    }

    pub fn log_tc_start_stop(mut self, enabled: bool) -> Self {
        self.config.config.log_tc_start_stop = enabled;
        self
    }

    pub fn build(self) -> ServiceConfig {
        ServiceConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ServiceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
