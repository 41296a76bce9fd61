//! Pattern-matched handler registrations.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::error::RegistryError;
use crate::message::{BotContext, InboundMessage};

/// Handler callback. Receives the session view, the message, and the capture
/// groups of the match (whole match excluded, unmatched groups as `None`).
pub type HandlerFn =
    dyn Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Any group-chat message.
    Message,
    /// Messages that `@`-mention the bot.
    Mention,
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub pattern: Regex,
    pub flags: String,
    pub handler: Arc<HandlerFn>,
    /// Plugin that registered the handler.
    pub owner: Option<String>,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("pattern", &self.pattern.as_str())
            .field("flags", &self.flags)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Two append-only, ordered handler lists.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    message: Vec<HandlerEntry>,
    mention: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        kind: HandlerKind,
        pattern: &str,
        flags: &str,
        handler: F,
        owner: Option<&str>,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        let entry = HandlerEntry {
            pattern: compile_pattern(pattern, flags)?,
            flags: flags.to_string(),
            handler: Arc::new(handler),
            owner: owner.map(str::to_string),
        };
        tracing::debug!(?kind, pattern, owner, "Registered handler");
        self.entries_mut(kind).push(entry);
        Ok(())
    }

    pub fn on_message<F>(&mut self, pattern: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(HandlerKind::Message, pattern, "", handler, None)
    }

    pub fn on_mention<F>(&mut self, pattern: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(HandlerKind::Mention, pattern, "", handler, None)
    }

    /// Registration scope whose handlers are attributed to plugin `name`.
    pub fn plugin(&mut self, name: &str) -> PluginScope<'_> {
        PluginScope {
            registry: self,
            name: name.to_string(),
        }
    }

    /// Append every entry of `other` after the existing ones.
    pub fn extend(&mut self, other: HandlerRegistry) {
        self.message.extend(other.message);
        self.mention.extend(other.mention);
    }

    pub fn entries(&self, kind: HandlerKind) -> &[HandlerEntry] {
        match kind {
            HandlerKind::Message => &self.message,
            HandlerKind::Mention => &self.mention,
        }
    }

    pub fn len(&self) -> usize {
        self.message.len() + self.mention.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries_mut(&mut self, kind: HandlerKind) -> &mut Vec<HandlerEntry> {
        match kind {
            HandlerKind::Message => &mut self.message,
            HandlerKind::Mention => &mut self.mention,
        }
    }
}

pub struct PluginScope<'a> {
    registry: &'a mut HandlerRegistry,
    name: String,
}

impl PluginScope<'_> {
    pub fn register<F>(
        &mut self,
        kind: HandlerKind,
        pattern: &str,
        flags: &str,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.registry
            .register(kind, pattern, flags, handler, Some(&self.name))
    }

    pub fn on_message<F>(&mut self, pattern: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(HandlerKind::Message, pattern, "", handler)
    }

    pub fn on_mention<F>(&mut self, pattern: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&BotContext<'_>, &InboundMessage, &[Option<String>]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.register(HandlerKind::Mention, pattern, "", handler)
    }
}

/// Compile `pattern` with single-letter flags: `i` case-insensitive, `m`
/// multi-line anchors, `s` dot matches newline, `x` verbose. `u` and `g` are
/// accepted and have no effect.
pub fn compile_pattern(pattern: &str, flags: &str) -> Result<Regex, RegistryError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'u' | 'g' => &mut builder,
            other => {
                return Err(RegistryError::UnsupportedFlag {
                    flag: other,
                    flags: flags.to_string(),
                })
            }
        };
    }
    builder
        .build()
        .map_err(|source| RegistryError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}
