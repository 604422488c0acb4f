//! `ctxpack status` — Show store, pack and stamp status.

use ctxpack_config::CtxpackConfig;
use ctxpack_sync::PackSession;

pub async fn run(session: &mut PackSession) -> Result<(), Box<dyn std::error::Error>> {
    let status = session.status().await?;
    let config = session.config();

    println!("📦 ctxpack Status");
    println!("=================");
    println!("  Config dir:   {}", CtxpackConfig::config_dir().display());
    println!("  State dir:    {}", config.state_dir().display());
    println!("  Object:       {}", status.object);
    println!("  Store:        {} ({}/{})", status.store, config.store.owner, config.store.repo);
    println!("  Branch:       {}", status.branch);
    println!("  Head:         {}", status.head);
    println!("  Pack:         {}", status.pack_path);

    match (&status.pack_bytes, &status.stamp) {
        (None, _) => println!("\n  ⚠️  No context pack yet — run `ctxpack rebuild`"),
        (Some(bytes), None) => {
            println!("  Size:         {bytes} bytes");
            println!("\n  ⚠️  Pack has no version stamp");
        }
        (Some(bytes), Some(stamp)) => {
            println!("  Size:         {bytes} bytes");
            println!("  Stamp:        {} ({})", stamp.content_hash, stamp.direction);
            println!("  Source ref:   {}", stamp.source_ref);
            if status.stamp_valid {
                println!("\n  ✅ Stamp matches pack content");
            } else {
                println!("\n  ⚠️  Stamp does not match pack content (edited outside ctxpack?)");
            }
            if status.decompose_pending {
                println!("  ⚠️  Pack edits not yet decomposed — run `ctxpack decompose`");
            }
        }
    }
    Ok(())
}
