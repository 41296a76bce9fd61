//! Routing of group-chat messages to registered handlers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use regex::Regex;
use tracing::{debug, error};

use crate::message::{BotContext, InboundMessage};
use crate::registry::{HandlerEntry, HandlerKind, HandlerRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyBody,
    SelfOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(SkipReason),
    Completed {
        invoked: usize,
        failed: usize,
        mentioned: bool,
    },
}

/// Whether `message` was written by the bot itself.
pub fn is_self_origin(ctx: &BotContext<'_>, message: &InboundMessage) -> bool {
    let identity = ctx.identity();
    identity.is_own_jid(&message.sender)
        || message
            .nick
            .as_deref()
            .is_some_and(|nick| identity.is_own_nick(nick))
}

/// Run every matching message handler, then every matching mention handler
/// when the body mentions the bot. Handler failures are logged and counted.
pub fn dispatch(
    ctx: &BotContext<'_>,
    registry: &HandlerRegistry,
    mention: Option<&Regex>,
    message: &InboundMessage,
) -> DispatchOutcome {
    if message.body.is_empty() {
        return DispatchOutcome::Skipped(SkipReason::EmptyBody);
    }
    if is_self_origin(ctx, message) {
        return DispatchOutcome::Skipped(SkipReason::SelfOrigin);
    }

    let mut invoked = 0;
    let mut failed = 0;

    run_handlers(
        ctx,
        registry.entries(HandlerKind::Message),
        message,
        &mut invoked,
        &mut failed,
    );

    let mentioned = mention.is_some_and(|pattern| pattern.is_match(&message.body));
    if mentioned {
        debug!(room = %message.room, sender = %message.sender, "Bot mentioned");
        run_handlers(
            ctx,
            registry.entries(HandlerKind::Mention),
            message,
            &mut invoked,
            &mut failed,
        );
    }

    DispatchOutcome::Completed {
        invoked,
        failed,
        mentioned,
    }
}

fn run_handlers(
    ctx: &BotContext<'_>,
    entries: &[HandlerEntry],
    message: &InboundMessage,
    invoked: &mut usize,
    failed: &mut usize,
) {
    for entry in entries {
        let Some(captures) = entry.pattern.captures(&message.body) else {
            continue;
        };
        let groups: Vec<Option<String>> = captures
            .iter()
            .skip(1)
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();

        *invoked += 1;
        if let Err(reason) = invoke(entry, ctx, message, &groups) {
            *failed += 1;
            error!(
                plugin = entry.owner.as_deref().unwrap_or("-"),
                pattern = entry.pattern.as_str(),
                error = %reason,
                "Handler failed"
            );
        }
    }
}

fn invoke(
    entry: &HandlerEntry,
    ctx: &BotContext<'_>,
    message: &InboundMessage,
    groups: &[Option<String>],
) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(ctx, message, groups))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
