//! Handlers shipped with the bot.

use leonard::{HandlerKind, HandlerRegistry, RegistryError};

/// Registry holding every built-in plugin.
pub fn builtin() -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    register_ping(&mut registry)?;
    register_rooms(&mut registry)?;
    register_whois(&mut registry)?;
    Ok(registry)
}

fn register_ping(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry
        .plugin("ping")
        .register(HandlerKind::Mention, r"\bping\b", "i", |ctx, msg, _| {
            ctx.reply(msg, "pong");
            Ok(())
        })
}

fn register_rooms(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry
        .plugin("rooms")
        .register(HandlerKind::Mention, r"\brooms\b", "i", |ctx, msg, _| {
            let names: Vec<&str> = ctx
                .joined_rooms()
                .iter()
                .map(|jid| {
                    ctx.rooms()
                        .get(jid)
                        .map_or(jid.as_str(), |room| room.name.as_str())
                })
                .collect();
            let reply = if names.is_empty() {
                "I'm not in any rooms".to_string()
            } else {
                format!("I'm in: {}", names.join(", "))
            };
            ctx.reply(msg, reply);
            Ok(())
        })
}

fn register_whois(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry
        .plugin("whois")
        .register(HandlerKind::Mention, r"\bwhois\s+@?(\S+)", "i", |ctx, msg, groups| {
            let name = groups
                .first()
                .and_then(Option::as_deref)
                .ok_or_else(|| anyhow::anyhow!("whois pattern matched without a name"))?;
            let reply = match ctx.users().find_by_name(name) {
                Some(user) => match user.mention_name.as_deref() {
                    Some(mention) => format!("{} is @{mention}", user.display_name),
                    None => format!("{} has no mention name yet", user.display_name),
                },
                None => format!("I haven't seen {name}"),
            };
            ctx.reply(msg, reply);
            Ok(())
        })
}
