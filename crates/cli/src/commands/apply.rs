//! `ctxpack apply` — Commit a batch of write intents atomically.

use std::io::Read;

use ctxpack_core::error::Error;
use ctxpack_core::intent::WriteIntent;
use ctxpack_sync::PackSession;
use serde::Deserialize;

/// Accepted shapes of an intent batch file.
#[derive(Deserialize)]
#[serde(untagged)]
enum IntentInput {
    Batch(Vec<WriteIntent>),
    Wrapped { intents: Vec<WriteIntent> },
    Single(WriteIntent),
}

/// Parse an intent batch: an array, `{"intents": [...]}`, or one intent.
pub fn parse_intents(raw: &str) -> Result<Vec<WriteIntent>, serde_json::Error> {
    Ok(match serde_json::from_str::<IntentInput>(raw)? {
        IntentInput::Batch(intents) | IntentInput::Wrapped { intents } => intents,
        IntentInput::Single(intent) => vec![intent],
    })
}

/// Read a file, or stdin when `input` is `-`.
pub fn read_input(input: &str) -> Result<String, Box<dyn std::error::Error>> {
    if input == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        std::fs::read_to_string(input)
            .map_err(|e| format!("Failed to read intents from {input}: {e}").into())
    }
}

pub async fn run(session: &mut PackSession, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let intents = parse_intents(&read_input(input)?)
        .map_err(|e| format!("Invalid intent JSON: {e}"))?;

    println!("📝 Applying {} intent(s)...", intents.len());

    match session.commit(&intents).await {
        Ok(receipt) => {
            match &receipt.commit_id {
                Some(id) => println!("   ✅ Committed {id} ({} file(s))", receipt.files.len()),
                None => println!("   ✅ Nothing to commit"),
            }
            for file in &receipt.files {
                println!("      {file}");
            }
            if receipt.attempts > 1 {
                println!("   🔁 Needed {} attempts (reference conflicts)", receipt.attempts);
            }
            for path in &receipt.truncated {
                println!("   ⚠️  Content truncated for {path}");
            }
            Ok(())
        }
        Err(Error::InvalidBatch { total, rejected }) => {
            println!("   ❌ {} of {total} intent(s) rejected, nothing written:", rejected.len());
            for r in &rejected {
                println!("      #{} {}: {}", r.index, r.intent.path, r.reason);
            }
            Err("invalid intent batch".into())
        }
        Err(e) => {
            println!("   ❌ Commit failed, nothing written: {e}");
            Err(e.into())
        }
    }
}
