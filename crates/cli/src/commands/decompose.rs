//! `ctxpack decompose` — Write pack edits back to their source files.

use ctxpack_sync::{DecomposeStatus, PackSession, SkipReason};

pub async fn run(session: &mut PackSession) -> Result<(), Box<dyn std::error::Error>> {
    println!("🧩 Decomposing context pack...");

    let outcome = session.decompose().await?;
    let hash = outcome.stamp_hash.as_deref().unwrap_or("-");
    match &outcome.status {
        DecomposeStatus::Applied => match &outcome.commit_id {
            Some(id) => println!("   ✅ Committed {id} for stamp {hash}"),
            None => println!("   ✅ Sources already match stamp {hash}"),
        },
        DecomposeStatus::AlreadyDone { at } => {
            println!("   ⏭️  Stamp {hash} already decomposed at {}", at.to_rfc3339());
        }
        DecomposeStatus::BuiltFromSources => {
            println!("   ⏭️  Pack was built from sources, nothing to do");
        }
        DecomposeStatus::Unstamped => {
            println!("   ⚠️  Pack has no version stamp, run `ctxpack rebuild` first");
        }
    }

    for path in &outcome.written {
        println!("      wrote {path}");
    }
    for skipped in &outcome.skipped {
        let why = match &skipped.reason {
            SkipReason::NoMarker => "no source marker".to_string(),
            SkipReason::Inline => "inline".to_string(),
            SkipReason::Combined => "combined view".to_string(),
            SkipReason::Placeholder => "source does not exist yet".to_string(),
            SkipReason::Unchanged => "unchanged".to_string(),
            SkipReason::Rejected(reason) => format!("rejected: {reason}"),
        };
        println!("      skipped {} ({why})", skipped.heading);
    }
    Ok(())
}
