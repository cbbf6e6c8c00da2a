//! Error reports rendered to the log.

use crate::registry::PluginDirectory;
use sourcepawn_runtime::{ContextTrace, DebugListener, DebugLookup, PluginContext, SpError};
use std::rc::Rc;
use tracing::error;

const UNKNOWN: &str = "<unknown>";

/// Debug listener that logs execution errors, one `error!` per line.
pub struct LogReporter {
    directory: Rc<PluginDirectory>,
}

impl LogReporter {
    pub fn new(directory: Rc<PluginDirectory>) -> Self {
        Self { directory }
    }

    fn plugin_name(&self, context: &PluginContext) -> String {
        self.directory
            .display_name(context.id())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    fn debug_advice(plugin: &str, lines: &mut Vec<String>) {
        lines.push(format!("[SM] Debug mode is not enabled for \"{}\"", plugin));
        lines.push("[SM] To enable debug mode, set runtime.debug = true in config.toml".to_string());
    }

    /// Lines reported for a failed execution.
    pub fn render_execute_error(&self, context: &PluginContext, trace: &mut ContextTrace<'_>) -> Vec<String> {
        let plugin = self.plugin_name(context);
        let mut lines = Vec::new();

        if trace.error() != SpError::Native {
            lines.push(format!(
                "[SM] Plugin encountered error {}: {}",
                trace.error_code(),
                trace.error_string()
            ));
        }

        if let Some((_, native)) = trace.last_native() {
            match trace.custom_error_string() {
                Some(message) => lines.push(format!("[SM] Native \"{}\" reported: {}", native, message)),
                None => lines.push(format!("[SM] Native \"{}\" encountered a generic error.", native)),
            }
        }

        if !trace.debug_info_available() {
            Self::debug_advice(&plugin, &mut lines);
            return lines;
        }

        lines.push(format!("[SM] Displaying call stack trace for plugin \"{}\":", plugin));
        trace.reset_trace();
        for (i, frame) in trace.by_ref().enumerate() {
            let line = frame.line.map_or_else(|| "?".to_string(), |l| l.to_string());
            lines.push(format!(
                "[SM]   [{}]  Line {}, {}::{}()",
                i,
                line,
                frame.filename.unwrap_or(UNKNOWN),
                frame.function.unwrap_or(UNKNOWN)
            ));
        }
        lines
    }

    /// Lines reported for a problem found around an execution.
    pub fn render_code_error(&self, context: &PluginContext, code_addr: u32, err: SpError, message: &str) -> Vec<String> {
        let plugin = self.plugin_name(context);
        let mut lines = vec![
            format!(
                "[SM] Plugin \"{}\" encountered error {}: {}",
                plugin,
                err.code(),
                err.message()
            ),
            format!("[SM] {}", message),
        ];

        let Some(debug) = context.debug_info() else {
            Self::debug_advice(&plugin, &mut lines);
            return lines;
        };

        match debug.lookup_function(code_addr) {
            Ok(name) => lines.push(format!(
                "[SM] Unable to call function \"{}\" due to above error(s).",
                name
            )),
            Err(_) => lines.push(format!(
                "[SM] Unable to call function (name unknown, address \"{:x}\").",
                code_addr
            )),
        }
        lines
    }
}

impl DebugListener for LogReporter {
    fn on_context_execute_error(&self, context: &PluginContext, trace: &mut ContextTrace<'_>) {
        for line in self.render_execute_error(context, trace) {
            error!(context = %context.id(), "{}", line);
        }
    }

    fn on_code_error(&self, context: &PluginContext, code_addr: u32, err: SpError, message: &str) {
        for line in self.render_code_error(context, code_addr, err, message) {
            error!(context = %context.id(), "{}", line);
        }
    }
}
