use engage_config::EngageConfig;
use engage_core::Result;
use engage_memory::PostStatus;

use super::PostAction;

pub(super) fn cmd_post(config: EngageConfig, action: PostAction) -> Result<()> {
    let store = super::open_store(&config)?;
    let queue = store.post_queue();

    match action {
        PostAction::Add { text } => {
            let post = queue.enqueue(&text)?;
            println!("✅ Queued post {} ({} pending)", post.id, queue.pending_count()?);
            if config.cycle.post_interval_secs == 0 {
                println!("   💡 cycle.post_interval_secs is 0, so `engage run` will not publish it");
            }
        }
        PostAction::List { limit } => {
            let posts = queue.list(limit)?;
            if posts.is_empty() {
                println!("No posts queued.");
                return Ok(());
            }
            for post in posts {
                let (color, label) = match post.status {
                    PostStatus::Pending => ("\x1b[33m", "pending"),
                    PostStatus::Posted => ("\x1b[32m", "posted"),
                    PostStatus::Failed => ("\x1b[31m", "failed"),
                };
                println!(
                    "\x1b[90m{}\x1b[0m  {color}{label:<7}\x1b[0m  {}",
                    post.created_at.format("%Y-%m-%d %H:%M"),
                    post.text
                );
                if let Some(error) = post.error {
                    println!("   \x1b[90m{error}\x1b[0m");
                }
            }
        }
    }
    Ok(())
}
