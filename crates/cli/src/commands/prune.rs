//! `ctxpack prune` — Print the context pack fitted to a size budget.

use std::path::Path;

use ctxpack_sync::PackSession;

pub async fn run(
    session: &mut PackSession,
    budget: Option<usize>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some((pack, report)) = session.pruned_pack(budget).await? else {
        return Err("No context pack yet — run `ctxpack rebuild` first".into());
    };

    // The pack itself goes to stdout, so the summary goes to stderr
    eprintln!(
        "✂️  {} → {} bytes (budget {}), steps: {:?}",
        report.original_len, report.final_len, report.budget, report.steps
    );

    match output {
        Some(path) => std::fs::write(path, &pack)
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?,
        None => print!("{pack}"),
    }
    Ok(())
}
