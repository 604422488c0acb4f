//! `ctxpack rebuild` — Regenerate the context pack from its sources.

use ctxpack_sync::PackSession;

pub async fn run(session: &mut PackSession) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔨 Rebuilding context pack...");

    let report = session.rebuild().await?;
    if report.decomposed {
        println!("   🧩 Wrote pending pack edits back to their sources first");
    }
    match &report.commit_id {
        Some(id) => println!(
            "   ✅ Committed {id} (hash {}, source {})",
            report.stamp.content_hash, report.stamp.source_ref
        ),
        None => println!("   ✅ Already current (hash {})", report.stamp.content_hash),
    }
    for path in &report.missing {
        println!("   ⚠️  Source missing: {path}");
    }
    Ok(())
}
