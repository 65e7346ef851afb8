use dialoguer::{Confirm, theme::ColorfulTheme};

use engage_config::EngageConfig;
use engage_core::{EngageError, Result};

use super::MemoryAction;

pub(super) fn cmd_memory(config: EngageConfig, action: MemoryAction) -> Result<()> {
    let store = super::open_store(&config)?;

    match action {
        MemoryAction::List => {
            let handles = store.handles();
            if handles.is_empty() {
                println!("No conversations stored.");
                return Ok(());
            }
            println!("\x1b[1mConversations\x1b[0m ({})", handles.len());
            println!("{}", "-".repeat(80));
            for handle in handles {
                let Some(conversation) = store.get(&handle) else {
                    continue;
                };
                let last = conversation
                    .last_interaction
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{:<24} {:>4} dms  {:>4} mentions  {:>3} summaries  \x1b[90m{}\x1b[0m",
                    handle,
                    conversation.dms.len(),
                    conversation.mentions.len(),
                    conversation.summaries.len(),
                    last
                );
            }
        }
        MemoryAction::Show {
            handle,
            limit,
            json,
        } => {
            let conversation = store
                .get(&handle)
                .ok_or_else(|| EngageError::Memory(format!("no conversation with {handle}")))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conversation)?);
                return Ok(());
            }

            println!("\x1b[1m{}\x1b[0m", conversation.handle);
            println!(
                "   interactions: {}  first seen: {}",
                conversation.metadata.total_interactions,
                conversation
                    .metadata
                    .first_seen
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".into())
            );
            println!("{}", "-".repeat(80));
            for message in store.recent_context(&handle, limit) {
                let who = if message.is_from_us { "us" } else { "them" };
                let at = message
                    .timestamp
                    .map(|t| t.format("%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("\x1b[90m{at:>11}\x1b[0m  {who:<4}  {}", message.text);
            }
            for summary in conversation.summaries.iter().rev().take(3).rev() {
                println!("   \x1b[36msummary\x1b[0m  {}", summary.text);
            }
        }
        MemoryAction::Clear { handle, all, yes } => {
            let target = if all { None } else { handle.as_deref() };
            let prompt = match target {
                Some(h) => format!("Forget everything about {h}?"),
                None => "Forget every stored conversation?".to_string(),
            };
            if !yes {
                let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt(prompt)
                    .default(false)
                    .interact()
                    .map_err(|e| EngageError::Other(e.into()))?;
                if !confirmed {
                    println!("Nothing cleared.");
                    return Ok(());
                }
            }
            store.clear(target);
            let pending = store.flush();
            if pending > 0 {
                return Err(EngageError::Memory(format!(
                    "{pending} conversations could not be written"
                )));
            }
            println!("✅ Cleared {}", target.unwrap_or("all conversations"));
        }
    }
    Ok(())
}
