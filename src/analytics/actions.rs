//! User-action extraction: slash commands and hook invocations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analytics::{ConversationSlice, NamedCount, top_n};

const TOP_ACTIONS: usize = 10;

/// Stock commands shipped with the assistant CLI. These are excluded from
/// the slash-command statistics so that only user-defined commands are
/// counted.
pub const BUILTIN_COMMANDS: &[&str] = &[
    "/clear", "/compact", "/config", "/cost", "/doctor", "/exit", "/help", "/init", "/login",
    "/logout", "/mcp", "/memory", "/model", "/quit", "/resume", "/status",
];

pub fn is_builtin_command(name: &str) -> bool {
    BUILTIN_COMMANDS.contains(&name)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStats {
    pub total: u64,
    pub by_command: BTreeMap<String, u64>,
    pub top_commands: Vec<NamedCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookStats {
    pub total: u64,
    pub by_hook: BTreeMap<String, u64>,
    pub top_hooks: Vec<NamedCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActions {
    pub slash_commands: CommandStats,
    pub hooks: HookStats,
}

impl UserActions {
    pub fn build<'a, I>(slices: I) -> UserActions
    where
        I: IntoIterator<Item = &'a ConversationSlice>,
    {
        let mut out = UserActions::default();

        for slice in slices {
            for (command, count) in &slice.commands {
                out.slash_commands.total += count;
                *out.slash_commands
                    .by_command
                    .entry(command.clone())
                    .or_insert(0) += count;
            }
            for (hook, count) in &slice.hooks {
                out.hooks.total += count;
                *out.hooks.by_hook.entry(hook.clone()).or_insert(0) += count;
            }
        }

        out.slash_commands.top_commands = top_n(&out.slash_commands.by_command, TOP_ACTIONS);
        out.hooks.top_hooks = top_n(&out.hooks.by_hook, TOP_ACTIONS);
        out
    }
}
